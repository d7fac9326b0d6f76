//! Run collections over every partition of a set of managed systems.

use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use tracing::{error, info, warn};

use crate::model::{ManagedSystem, Target};
use crate::target::{CollectedArchive, FailureKind, TargetCollector};
use crate::tool::ToolReference;
use crate::ui;

/// A partition that needs manual collection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailureRecord {
    /// Copy of the partition, renamed `<system>-<target>` when the system
    /// is known.
    pub target: Target,
    pub kind: FailureKind,
}

/// Outcome of a batch.
#[derive(Debug, Default)]
pub struct BatchReport {
    pub collected: Vec<CollectedArchive>,
    pub failed: Vec<FailureRecord>,
    /// Manifest path, when any partition failed.
    pub manifest: Option<PathBuf>,
}

impl BatchReport {
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Sequential driver over many partitions.
pub struct CollectionBatch {
    collector: TargetCollector,
}

impl CollectionBatch {
    #[must_use]
    pub fn new(collector: TargetCollector) -> Self {
        Self { collector }
    }

    /// Collect every partition of every system.
    ///
    /// Detected environments are written back onto the partitions.
    ///
    /// # Errors
    ///
    /// Returns an error when no collection tool is found, the manifest
    /// cannot be written, or the operator aborted at a credential prompt.
    /// Other per-partition failures end up in the report. An abort still
    /// writes the manifest for the partitions that failed before it.
    pub async fn run_systems(&self, systems: &mut [ManagedSystem]) -> Result<BatchReport> {
        let tool = self.resolve_tool()?;
        ui::print_section("LPAR OS-level collection");
        info!("LPAR OS-level collection started");

        let mut report = BatchReport::default();
        for system in systems.iter_mut() {
            if system.partition_list.is_empty() {
                ui::print_warning(&format!("No LPARs defined for System: {}", system.name));
                info!(system = %system.name, "No LPARs defined for system");
                continue;
            }
            ui::print_step(&format!(
                "LPAR OS-level collection for System: {} started",
                system.name
            ));
            info!(system = %system.name, "System collection started");
            for target in &mut system.partition_list {
                if let Err(e) = self
                    .collect_one(target, Some(&system.name), &tool, &mut report)
                    .await
                {
                    self.finish(report)?;
                    return Err(e);
                }
            }
            info!(system = %system.name, "System collection completed");
        }

        self.finish(report)
    }

    /// Collect a flat list of partitions with no owning system.
    ///
    /// # Errors
    ///
    /// Same as [`Self::run_systems`].
    pub async fn run_targets(&self, targets: &mut [Target]) -> Result<BatchReport> {
        let tool = self.resolve_tool()?;
        ui::print_section("LPAR OS-level collection");
        info!(count = targets.len(), "LPAR OS-level collection started");

        let mut report = BatchReport::default();
        for target in targets.iter_mut() {
            if let Err(e) = self.collect_one(target, None, &tool, &mut report).await {
                self.finish(report)?;
                return Err(e);
            }
        }

        self.finish(report)
    }

    fn resolve_tool(&self) -> Result<ToolReference> {
        let dir = &self.collector.config().tool_dir;
        ToolReference::resolve(dir)
            .inspect_err(|e| ui::print_error(&e.to_string()))
            .with_context(|| format!("No collection tool available in {}", dir.display()))
    }

    /// Collect one partition into `report`. Only an abort is an error.
    async fn collect_one(
        &self,
        target: &mut Target,
        system: Option<&str>,
        tool: &ToolReference,
        report: &mut BatchReport,
    ) -> Result<()> {
        ui::print_step(&format!("LPAR: {}'s OS-level collection started", target.name));
        let outcome = self.collector.collect(target, system, tool).await;
        info!(target = %target.name, "LPAR OS-level collection ended");

        let failure = match outcome {
            Ok(archive) => {
                report.collected.push(archive);
                return Ok(());
            }
            Err(failure) => failure,
        };

        let mut record = target.clone();
        if let Some(system) = system {
            record.name = format!("{system}-{}", target.name);
        }
        report.failed.push(FailureRecord {
            target: record,
            kind: failure.kind(),
        });
        if failure.is_abort() {
            warn!(target = %target.name, "Batch aborted by the operator");
            bail!(failure);
        }
        Ok(())
    }

    fn finish(&self, mut report: BatchReport) -> Result<BatchReport> {
        if report.failed.is_empty() {
            ui::print_success("LPAR OS-level collection completed.");
            info!(collected = report.collected.len(), "LPAR OS-level collection completed");
            return Ok(report);
        }

        error!(
            "Unable to collect OS-level data for the following LPARs, \
             please run oscollector manually on each one"
        );
        for record in &report.failed {
            info!(
                "System LPAR: {} rmc_ip: {} state: {}",
                record.target.name, record.target.management_ip, record.target.state
            );
        }

        let manifest = self.collector.config().manifest_path();
        write_manifest(&manifest, &report.failed)?;
        warn!(
            manifest = %manifest.display(),
            failed = report.failed.len(),
            "Manual collection required"
        );
        ui::print_warning(&format!(
            "Unable to collect OS-level data for {} LPAR(s). List written to {}",
            report.failed.len(),
            manifest.display()
        ));
        ui::print_failure_table(&report.failed);
        ui::print_manual_followup(&manifest);
        report.manifest = Some(manifest);
        Ok(report)
    }
}

/// Write one JSON object per line.
///
/// # Errors
///
/// Returns an error when the file cannot be written.
pub fn write_manifest(path: &Path, records: &[FailureRecord]) -> Result<()> {
    let mut file = std::fs::File::create(path)
        .with_context(|| format!("Failed to create {}", path.display()))?;
    for record in records {
        let line = serde_json::to_string(&record.target)?;
        writeln!(file, "{line}")
            .with_context(|| format!("Failed to write {}", path.display()))?;
    }
    info!("List of LPARs that require manual collection written to file: {}", path.display());
    Ok(())
}

/// Read a manifest, or any list of targets in the same format.
///
/// # Errors
///
/// Returns an error when the file cannot be read or a line is not a
/// target record.
pub fn read_manifest(path: &Path) -> Result<Vec<Target>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    content
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(number, line)| {
            serde_json::from_str(line).with_context(|| {
                format!("{}:{}: invalid target record", path.display(), number + 1)
            })
        })
        .collect()
}
