//! Subcommands and the setup they share.

pub mod hmc;
pub mod lpar;
pub mod resume;

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Local;
use clap::Args;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

use powercollector::config::{self, CollectorConfig};
use powercollector::{
    BatchReport, CollectionBatch, CredentialPrompt, DialoguerPrompt, PingProbe,
    ProposedCredentials, SshSessionFactory, TargetCollector,
};
use powercollector::ui;

/// Options every subcommand accepts.
#[derive(Args, Debug, Clone)]
pub struct OutputArgs {
    /// Output path for all generated files
    #[arg(long, value_name = "PATH")]
    pub output: Option<PathBuf>,

    /// Directory holding oscollector.v<version>.ksh (defaults to the
    /// executable's directory)
    #[arg(long, value_name = "PATH")]
    pub tool_dir: Option<PathBuf>,

    /// Skip credential prompts and use the proposed values
    #[arg(long)]
    pub non_interactive: bool,
}

/// Where the run writes and what it calls itself.
pub struct RunContext {
    pub output_dir: PathBuf,
    pub tool_dir: PathBuf,
    pub run_date: String,
    pub non_interactive: bool,
    /// Flushes the log file when dropped.
    _log_guard: WorkerGuard,
}

impl RunContext {
    /// Resolve directories and start file logging.
    ///
    /// # Errors
    ///
    /// Returns an error when no writable output directory can be found.
    pub fn prepare(
        args: &OutputArgs,
        input: Option<&Path>,
        label: &str,
        verbose: bool,
    ) -> Result<Self> {
        let now = Local::now();
        let base_dir = base_dir();
        let output_dir = config::resolve_output_dir(
            args.output.as_deref(),
            input,
            &base_dir,
            label,
            &config::run_stamp(&now),
        )?;
        let log_guard = init_logging(&output_dir, verbose)?;

        let tool_dir = args.tool_dir.clone().unwrap_or_else(|| base_dir.clone());
        ui::print_info(&format!("Base directory: {}", base_dir.display()));
        ui::print_info(&format!("Output directory: {}", output_dir.display()));
        tracing::info!(
            version = env!("CARGO_PKG_VERSION"),
            base_dir = %base_dir.display(),
            output_dir = %output_dir.display(),
            "powercollector started"
        );

        Ok(Self {
            output_dir,
            tool_dir,
            run_date: config::run_date(&now),
            non_interactive: args.non_interactive,
            _log_guard: log_guard,
        })
    }

    /// Collection driver for this run.
    #[must_use]
    pub fn batch(&self, username: Option<String>, password: Option<String>) -> CollectionBatch {
        let config = CollectorConfig::with_defaults(
            self.tool_dir.clone(),
            self.output_dir.clone(),
            &self.run_date,
        )
        .with_credentials(username, password);
        let prompt: Box<dyn CredentialPrompt> = if self.non_interactive {
            Box::new(ProposedCredentials)
        } else {
            Box::new(DialoguerPrompt::new())
        };
        let collector = TargetCollector::new(
            Box::new(SshSessionFactory::default()),
            Box::new(PingProbe::default()),
            prompt,
            config,
        );
        CollectionBatch::new(collector)
    }
}

/// Directory of the running executable, or the working directory.
fn base_dir() -> PathBuf {
    std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(Path::to_path_buf))
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Send `tracing` events to a daily log file in the output directory.
fn init_logging(output_dir: &Path, verbose: bool) -> Result<WorkerGuard> {
    let filter = if verbose {
        EnvFilter::new("powercollector=debug,info")
    } else {
        EnvFilter::new("powercollector=info,warn")
    };

    let appender = tracing_appender::rolling::daily(output_dir, "powercollector.log");
    let (writer, guard) = tracing_appender::non_blocking(appender);

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(writer).with_ansi(false))
        .with(filter)
        .try_init()
        .context("Failed to initialize logging")?;
    Ok(guard)
}

/// Final console line for a batch.
pub fn print_summary(report: &BatchReport) {
    if report.is_complete() {
        ui::print_success(&format!(
            "powercollector has completed successfully ({} archive(s) collected).",
            report.collected.len()
        ));
    } else {
        ui::print_warning(&format!(
            "powercollector has completed: {} collected, {} need manual collection.",
            report.collected.len(),
            report.failed.len()
        ));
    }
}
