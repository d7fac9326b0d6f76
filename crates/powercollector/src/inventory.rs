//! HMC inventory: console identity, event dumps, managed systems and their
//! partitions, plus VIOS error logs.
//!
//! Everything except the managed system list is best effort. A command that
//! fails is logged and the inventory carries on with what it has.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use tracing::{error, info, warn};

use crate::adaptive::run_adaptive;
use crate::model::{EnclosureTopology, Fsp, Hmc, IoSlot, ManagedSystem, Target, TargetEnvironment};
use crate::session::{CommandOutput, RemoteSession, SessionError, ShellMode};
use crate::ui;

/// VPD line that identifies an HMC.
pub const HMC_DESCRIPTION: &str = "*DS Hardware Management Console";

const SHORT: Duration = Duration::from_secs(10);
const MEDIUM: Duration = Duration::from_secs(30);
const LONG: Duration = Duration::from_secs(60);
const DUMP: Duration = Duration::from_secs(120);

const OPEN_EVENTS: &str = "lssvcevents -t hardware --filter \"status=open\" \
    -F refcode:first_time:last_time:sys_name:text:\
    analyzing_mtms:ref_code_extn:sys_refcode:fru_details \
    --header";

/// Event and connection dumps written next to the inventory.
const DUMPS: [(&str, &str, Duration, bool); 4] = [
    ("FSPlist", "lssysconn -r all", DUMP, false),
    ("AllSVCEvents", "lssvcevents -t hardware -F --header", DUMP, false),
    ("OpenSVCEvents", OPEN_EVENTS, DUMP, true),
    ("ConsoleEvents", "lssvcevents -t console", LONG, false),
];

/// Inventory collection over an authenticated HMC session.
pub struct InventoryCollector<'a> {
    session: &'a mut dyn RemoteSession,
    /// Name the operator used for the HMC; prefixes every output file.
    label: String,
    output_dir: PathBuf,
}

impl<'a> InventoryCollector<'a> {
    pub fn new(session: &'a mut dyn RemoteSession, label: &str, output_dir: &Path) -> Self {
        Self {
            session,
            label: label.to_string(),
            output_dir: output_dir.to_path_buf(),
        }
    }

    async fn run(
        &mut self,
        command: &str,
        timeout: Duration,
    ) -> Result<CommandOutput, SessionError> {
        self.session
            .run_command(command, timeout, ShellMode::Standard)
            .await
    }

    /// Whether the host describes itself as an HMC.
    ///
    /// # Errors
    ///
    /// Returns the session error when the query cannot run, including
    /// authentication failures on the first connect.
    pub async fn verify_console(&mut self) -> Result<bool, SessionError> {
        let output = self.run("lshmc -v | grep Console", SHORT).await?;
        Ok(output.stdout.iter().any(|line| line.contains(HMC_DESCRIPTION)))
    }

    /// Collect identity, dumps and every managed system.
    ///
    /// # Errors
    ///
    /// Fails only when the managed system list cannot be read.
    pub async fn collect(&mut self) -> Result<Hmc> {
        let mut hmc = Hmc::default();
        self.collect_identity(&mut hmc).await;
        self.dump_events().await;
        ui::print_info("HMC VPD and events collection finished.");

        ui::print_step("Managed Systems collection started");
        hmc.managed_systems = self.list_managed_systems().await?;
        for system in &mut hmc.managed_systems {
            self.collect_system(system).await;
        }
        Ok(hmc)
    }

    async fn collect_identity(&mut self, hmc: &mut Hmc) {
        match self.run("lshmc -n", SHORT).await {
            Ok(output) => match output.stdout.first().and_then(|line| parse_network(line)) {
                Some((hostname, domain)) => {
                    hmc.hostname = hostname;
                    hmc.domain = domain;
                }
                None => warn!("lshmc -n returned no hostname"),
            },
            Err(e) => report("HMC VPD collection incomplete", &e),
        }

        match self.run("lshmc -v", SHORT).await {
            Ok(output) => apply_vpd(hmc, &output.stdout),
            Err(e) => report("HMC VPD collection incomplete", &e),
        }
        info!(hostname = %hmc.hostname, version = %hmc.version, "HMC identity collected");
    }

    async fn dump_events(&mut self) {
        for (name, command, timeout, adaptive) in DUMPS {
            let output = if adaptive {
                run_adaptive(&mut *self.session, command, timeout).await
            } else {
                self.run(command, timeout).await
            };
            let path = self.output_dir.join(format!("{}-{name}.json", self.label));
            match output {
                Ok(output) => {
                    if let Err(e) = write_lines(&path, &output.stdout) {
                        error!(error = %e, "Failed to write {}", path.display());
                        ui::print_error(&format!("HMC {name} collection incomplete: {e:#}"));
                    }
                }
                Err(e) => report(&format!("HMC {name} collection incomplete"), &e),
            }
        }
    }

    async fn list_managed_systems(&mut self) -> Result<Vec<ManagedSystem>> {
        let output = self
            .run("lssyscfg -r sys -F name:type_model:serial_num", LONG)
            .await
            .context("HMC Managed Systems collection failed")?;
        let systems: Vec<ManagedSystem> = output
            .stdout
            .iter()
            .filter_map(|line| parse_system(line))
            .collect();
        info!(count = systems.len(), "Managed systems found");
        Ok(systems)
    }

    async fn collect_system(&mut self, system: &mut ManagedSystem) {
        ui::print_step(&format!("Collection started for System: {}", system.name));
        let m = quote(&system.name);

        let primary = format!(
            "lslic -t sys -m {m} -F temp_ecnumber_primary:temp_level_primary:\
             perm_ecnumber_primary:perm_level_primary"
        );
        match self.run(&primary, MEDIUM).await {
            Ok(output) => {
                if let Some(fsp) = output.stdout.first().and_then(|line| parse_fsp(line)) {
                    system.fsp_primary = fsp;
                }
            }
            Err(e) => report("Error obtaining primary FSP's data", &e),
        }

        let secondary = format!(
            "lslic -t sys -m {m} -F temp_ecnumber_secondary:temp_level_secondary:\
             perm_ecnumber_secondary:perm_level_secondary"
        );
        match self.run(&secondary, MEDIUM).await {
            Ok(output) => {
                let unavailable = output.stdout.iter().any(|line| line.contains("unavailable"));
                if let Some(fsp) = output
                    .stdout
                    .first()
                    .filter(|_| !unavailable)
                    .and_then(|line| parse_fsp(line))
                {
                    system.fsp_secondary = fsp;
                }
            }
            Err(e) => report("Error obtaining secondary FSP's data", &e),
        }

        // Older consoles answer with an error text; it is stored as-is.
        let capabilities = format!("lssyscfg -r sys -m {m} -F capabilities");
        if let Ok(output) = self.run(&capabilities, MEDIUM).await {
            system.capabilities = output.first_line().unwrap_or_default().to_string();
        }

        let state = format!("lssyscfg -r sys -m {m} -F state");
        let state = match self.run(&state, MEDIUM).await {
            Ok(output) => output.first_line().unwrap_or_default().to_string(),
            Err(e) => {
                report("Error obtaining system state", &e);
                String::new()
            }
        };
        if !is_collectable_state(&state) {
            let message = format!(
                "System: {} must be \"Operating\" or \"Standby\" for complete collection",
                system.name
            );
            warn!("{message}");
            ui::print_warning(&message);
            return;
        }

        let slots = format!(
            "lshwres -m {m} -r io --rsubtype slot \
             -F feature_codes:description:unit_phys_loc:phys_loc:drc_name"
        );
        match self.run(&slots, LONG).await {
            Ok(output) => {
                system.io_slots = output.stdout.iter().filter_map(|l| parse_io_slot(l)).collect();
            }
            Err(e) => report(
                &format!("Error during IO Slot collection for System: {}", system.name),
                &e,
            ),
        }

        self.collect_partitions(system).await;

        let topology =
            format!("lsiotopo -m {m} -F slot_enclosure:leading_hub_port:trailing_hub_port");
        match self.run(&topology, MEDIUM).await {
            Ok(output) => system.enclosure_topo = parse_topology(&output.stdout),
            Err(e) => report(
                &format!("Error during IO Topology collection for System: {}", system.name),
                &e,
            ),
        }

        info!(
            system = %system.name,
            partitions = system.partition_list.len(),
            "System collection finished"
        );
    }

    async fn collect_partitions(&mut self, system: &mut ManagedSystem) {
        let m = quote(&system.name);
        let list = format!("lssyscfg -r lpar -m {m} -F lpar_id:name:lpar_env:state");
        match self.run(&list, DUMP).await {
            Ok(output) => {
                system.partition_list = output
                    .stdout
                    .iter()
                    .filter_map(|l| parse_partition(l))
                    .collect();
            }
            Err(e) => {
                report(
                    &format!(
                        "Error during LPAR information collection for System: {}",
                        system.name
                    ),
                    &e,
                );
                return;
            }
        }

        for partition in &mut system.partition_list {
            let command = format!(
                "lssyscfg -r lpar -m {m} --filter \"lpar_names={}\" \
                 -F os_version:rmc_ipaddr --header --osrefresh",
                partition.name
            );
            match run_adaptive(&mut *self.session, &command, DUMP).await {
                Ok(output) => apply_os_info(partition, &output.stdout),
                Err(e) => report(
                    &format!("Error reading OS level of LPAR: {}", partition.name),
                    &e,
                ),
            }
        }
    }

    /// Save error logs and VPD of every running VIOS.
    pub async fn collect_vios_logs(&mut self, hmc: &Hmc) {
        for system in &hmc.managed_systems {
            let m = quote(&system.name);
            for vios in system
                .partition_list
                .iter()
                .filter(|p| p.env == TargetEnvironment::Vios && p.is_running())
            {
                let base = format!("{}-{}", system.name, vios.name);
                let errlog = format!("viosvrcmd -m {m} --id {} -c \"errlog\"", vios.id);
                let errlog_ls = format!("viosvrcmd -m {m} --id {} -c \"errlog -ls\"", vios.id);
                let logs = async {
                    let mut lines = self.run(&errlog, DUMP).await?.stdout;
                    lines.extend(self.run(&errlog_ls, DUMP).await?.stdout);
                    Ok::<_, SessionError>(lines)
                }
                .await;
                self.save_vios_dump(&base, "ErrorLog", logs);

                let vpd = format!("viosvrcmd -m {m} --id {} -c \"lsdev -vpd\"", vios.id);
                let vpd = self.run(&vpd, DUMP).await.map(|output| output.stdout);
                self.save_vios_dump(&base, "vpd", vpd);
            }
        }
    }

    fn save_vios_dump(&self, base: &str, kind: &str, lines: Result<Vec<String>, SessionError>) {
        let path = self.output_dir.join(format!("{base}-{kind}.json"));
        let result = lines
            .map_err(anyhow::Error::from)
            .and_then(|lines| write_lines(&path, &lines));
        if let Err(e) = result {
            error!(vios = %base, error = %e, "VIOS {kind} collection failed");
            ui::print_error(&format!("Error trying to get {kind} from VIOS: {base}"));
        }
    }
}

fn report(context: &str, e: &SessionError) {
    error!(error = %e, "{context}");
    ui::print_error(&format!("{context}. Please check the log file."));
}

fn quote(name: &str) -> String {
    format!("\"{name}\"")
}

/// Write command output as a pretty JSON array of lines.
fn write_lines(path: &Path, lines: &[String]) -> Result<()> {
    let json = serde_json::to_string_pretty(lines)?;
    std::fs::write(path, json).with_context(|| format!("Failed to write {}", path.display()))
}

/// `hostname=<h>,domain=<d>,...` from `lshmc -n`.
#[must_use]
pub fn parse_network(line: &str) -> Option<(String, String)> {
    let mut hostname = None;
    let mut domain = String::new();
    for field in line.split(',') {
        match field.split_once('=') {
            Some(("hostname", value)) => hostname = Some(value.trim().to_string()),
            Some(("domain", value)) => domain = value.trim().to_string(),
            _ => {}
        }
    }
    hostname.filter(|h| !h.is_empty()).map(|h| (h, domain))
}

/// Machine type, serial and release from `lshmc -v`.
pub fn apply_vpd(hmc: &mut Hmc, lines: &[String]) {
    for line in lines {
        if let Some(value) = vpd_value(line, "*TM") {
            hmc.mt = value;
        } else if let Some(value) = vpd_value(line, "*SE") {
            hmc.serial = value;
        } else if let Some(value) = vpd_value(line, "*RM") {
            hmc.version = value;
        }
    }
}

fn vpd_value(line: &str, keyword: &str) -> Option<String> {
    line.find(keyword)
        .map(|start| line[start + keyword.len()..].trim().to_string())
}

/// `name:type_model:serial_num`.
#[must_use]
pub fn parse_system(line: &str) -> Option<ManagedSystem> {
    match line.trim().split(':').collect::<Vec<_>>().as_slice() {
        [name, mt, serial] => Some(ManagedSystem::new(name, mt, serial)),
        _ => {
            warn!(line, "Unexpected managed system line");
            None
        }
    }
}

/// `temp_ecnumber:temp_level:perm_ecnumber:perm_level`.
#[must_use]
pub fn parse_fsp(line: &str) -> Option<Fsp> {
    match line.trim().split(':').collect::<Vec<_>>().as_slice() {
        [temp_ecnumber, temp_level, perm_ecnumber, perm_level] => Some(Fsp {
            temp_ecnumber: (*temp_ecnumber).to_string(),
            temp_level: (*temp_level).to_string(),
            perm_ecnumber: (*perm_ecnumber).to_string(),
            perm_level: (*perm_level).to_string(),
        }),
        _ => None,
    }
}

/// `feature_codes:description:unit_phys_loc:phys_loc:drc_name`.
#[must_use]
pub fn parse_io_slot(line: &str) -> Option<IoSlot> {
    match line.trim().split(':').collect::<Vec<_>>().as_slice() {
        [feature_codes, description, unit_phys_loc, phys_loc, drc_name] => Some(IoSlot {
            feature_codes: (*feature_codes).to_string(),
            description: (*description).to_string(),
            unit_phys_loc: (*unit_phys_loc).to_string(),
            phys_loc: (*phys_loc).to_string(),
            drc_name: (*drc_name).to_string(),
        }),
        _ => None,
    }
}

/// `lpar_id:name:lpar_env:state`.
#[must_use]
pub fn parse_partition(line: &str) -> Option<Target> {
    match line.trim().split(':').collect::<Vec<_>>().as_slice() {
        [id, name, env, state] => Some(Target {
            name: (*name).to_string(),
            id: (*id).to_string(),
            env: TargetEnvironment::from(*env),
            state: (*state).to_string(),
            ..Target::default()
        }),
        _ => {
            warn!(line, "Unexpected partition line");
            None
        }
    }
}

/// Fill `os_level` and `management_ip` from a `--header` listing whose
/// fields may have been trimmed by adaptive execution.
pub fn apply_os_info(partition: &mut Target, lines: &[String]) {
    let (Some(header), Some(values)) = (lines.first(), lines.get(1)) else {
        return;
    };
    let fields: Vec<&str> = header.trim().split(':').collect();
    for (field, value) in fields.iter().zip(values.trim().splitn(fields.len(), ':')) {
        match *field {
            "os_version" => partition.os_level = value.to_string(),
            "rmc_ipaddr" => partition.management_ip = value.to_string(),
            _ => {}
        }
    }
}

/// `slot_enclosure:leading_hub_port:trailing_hub_port`, first occurrence
/// of each line kept.
#[must_use]
pub fn parse_topology(lines: &[String]) -> Vec<EnclosureTopology> {
    let mut seen: Vec<&str> = Vec::new();
    let mut topology = Vec::new();
    for line in lines {
        let line = line.trim();
        if seen.contains(&line) {
            continue;
        }
        seen.push(line);
        if let [enclosure, leading, trailing] = line.split(':').collect::<Vec<_>>().as_slice() {
            topology.push(EnclosureTopology {
                enclosure: (*enclosure).to_string(),
                leading_hub_port: (*leading).to_string(),
                trailing_hub_port: (*trailing).to_string(),
            });
        }
    }
    topology
}

#[must_use]
pub fn is_collectable_state(state: &str) -> bool {
    state.contains("Operating") || state.contains("Standby")
}

/// Inventory file name for an HMC.
#[must_use]
pub fn inventory_file_name(label: &str, hmc: &Hmc) -> String {
    format!("{label}-SystemsManagedByHMC-{}.json", hmc.hostname)
}

/// Write the inventory, then read it back and compare.
///
/// # Errors
///
/// Returns an error when the file cannot be written or does not read back
/// identical.
pub fn save_inventory(output_dir: &Path, label: &str, hmc: &Hmc) -> Result<PathBuf> {
    let path = output_dir.join(inventory_file_name(label, hmc));
    let json = serde_json::to_string_pretty(hmc)?;
    std::fs::write(&path, json).with_context(|| format!("Failed to write {}", path.display()))?;

    ui::print_info("Reading written file for consistency.");
    let written = load_inventory(&path)?;
    if &written != hmc {
        bail!("Failure checking file consistency of {}", path.display());
    }
    info!(path = %path.display(), "File is consistent");
    Ok(path)
}

/// Load an inventory written by [`save_inventory`].
///
/// # Errors
///
/// Returns an error when the file cannot be read or parsed.
pub fn load_inventory(path: &Path) -> Result<Hmc> {
    info!("Attempting to open JSON File: {}", path.display());
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let hmc: Hmc = serde_json::from_str(&content)
        .with_context(|| format!("Invalid input file {}", path.display()))?;
    info!(systems = hmc.managed_systems.len(), "HMC and Managed Systems loaded successfully");
    Ok(hmc)
}
