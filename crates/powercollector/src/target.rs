//! OS-level collection on a single partition.
//!
//! [`TargetCollector::collect`] walks one [`Target`] through the
//! [`CollectionStep`]s: preconditions, credentials, authentication,
//! environment detection, tool execution, archive retrieval and cleanup.
//! Every failure comes back as a [`CollectionFailure`]. Only
//! [`CollectionFailure::Aborted`] asks the batch to stop.

use std::path::PathBuf;
use std::sync::LazyLock;

use regex::Regex;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::config::CollectorConfig;
use crate::model::{Target, TargetEnvironment};
use crate::probe::ReachabilityProbe;
use crate::prompt::CredentialPrompt;
use crate::session::{
    Credentials, RemoteSession, SessionError, SessionFactory, SessionGuard, ShellMode,
};
use crate::tool::ToolReference;
use crate::ui;

/// Default VIOS account.
pub const VIOS_DEFAULT_USER: &str = "padmin";
pub const VIOS_DEFAULT_PASSWORD: &str = "padmin";
/// Default AIX account.
pub const ROOT_DEFAULT_USER: &str = "root";
pub const ROOT_DEFAULT_PASSWORD: &str = "password";

/// Marker the collector prints right before the archive name.
pub const ARCHIVE_MARKER: &str = "genero el archivo";

/// Side files the collector leaves next to its archive.
const SIDE_FILE_SUFFIXES: [&str; 3] = ["-config.txt", "-error.txt", "-lsgcl.txt"];

static ARCHIVE_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"genero el archivo\s+(\S+\.tar)").expect("archive-name pattern")
});

/// Steps of a single collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum CollectionStep {
    /// State, OS and address checks. No connection yet.
    CheckingPreconditions,
    /// Picking default or explicit credentials.
    SelectingCredentials,
    /// Credential attempts against the partition.
    Authenticating,
    /// `uname -s`, then the VIOS device probe.
    DetectingEnvironment,
    /// Replace, upload and run the collector.
    RunningCollector,
    /// Find the archive name in the collector output.
    ExtractingArchiveName,
    /// Rename and download the archive.
    RetrievingArchive,
    /// Remove everything the run left on the partition.
    CleaningUp,
    Complete,
}

impl CollectionStep {
    /// Get the next step in the sequence.
    #[must_use]
    pub fn next(&self) -> Self {
        match self {
            Self::CheckingPreconditions => Self::SelectingCredentials,
            Self::SelectingCredentials => Self::Authenticating,
            Self::Authenticating => Self::DetectingEnvironment,
            Self::DetectingEnvironment => Self::RunningCollector,
            Self::RunningCollector => Self::ExtractingArchiveName,
            Self::ExtractingArchiveName => Self::RetrievingArchive,
            Self::RetrievingArchive => Self::CleaningUp,
            Self::CleaningUp | Self::Complete => Self::Complete,
        }
    }

    /// Get a human-readable description of the step.
    #[must_use]
    pub fn description(&self) -> &'static str {
        match self {
            Self::CheckingPreconditions => "Checking preconditions",
            Self::SelectingCredentials => "Selecting credentials",
            Self::Authenticating => "Authenticating",
            Self::DetectingEnvironment => "Detecting operating system",
            Self::RunningCollector => "Running oscollector",
            Self::ExtractingArchiveName => "Locating generated archive",
            Self::RetrievingArchive => "Retrieving archive",
            Self::CleaningUp => "Cleaning up",
            Self::Complete => "Complete",
        }
    }

    /// Get the step number for progress display.
    #[must_use]
    pub fn step_number(&self) -> u8 {
        match self {
            Self::CheckingPreconditions => 1,
            Self::SelectingCredentials => 2,
            Self::Authenticating => 3,
            Self::DetectingEnvironment => 4,
            Self::RunningCollector => 5,
            Self::ExtractingArchiveName => 6,
            Self::RetrievingArchive => 7,
            Self::CleaningUp => 8,
            Self::Complete => 9,
        }
    }

    /// Total number of steps.
    pub const TOTAL_STEPS: u8 = 9;
}

impl std::fmt::Display for CollectionStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.description())
    }
}

/// Why a partition could not be collected.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CollectionFailure {
    #[error("LPAR: {target} must be running to be collected (state: {state})")]
    NotRunning { target: String, state: String },

    #[error("LPAR: {target} is running {os}, cannot run oscollector")]
    UnsupportedOs { target: String, os: String },

    #[error(
        "LPAR: {target} is running but doesn't have an RMC IP address. \
         Check RMC services if this is an AIX or VIOS LPAR"
    )]
    NoManagementAddress { target: String },

    #[error("LPAR: {target} is not reachable at {address}")]
    Unreachable { target: String, address: String },

    #[error("Authentication to LPAR: {target} failed after {attempts} attempts")]
    AuthExhausted { target: String, attempts: u32 },

    #[error("Error during connection to LPAR: {target}: {source}")]
    ConnectionError {
        target: String,
        #[source]
        source: SessionError,
    },

    #[error("Error during execution of oscollector on LPAR: {target}: {reason}")]
    ScriptExecutionError { target: String, reason: String },

    #[error("Error during transfer on LPAR: {target}: {reason}")]
    TransferError { target: String, reason: String },

    #[error("Error during cleanup on LPAR: {target}, delete manually: {}", .files.join(", "))]
    CleanupError { target: String, files: Vec<String> },

    /// The operator interrupted the credential prompt.
    #[error("Collection aborted at LPAR: {target}: {reason}")]
    Aborted { target: String, reason: String },
}

/// Failure category, stable for reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureKind {
    NotRunning,
    UnsupportedOs,
    NoManagementAddress,
    Unreachable,
    AuthExhausted,
    ConnectionError,
    ScriptExecutionError,
    TransferError,
    CleanupError,
    Aborted,
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::NotRunning => "not_running",
            Self::UnsupportedOs => "unsupported_os",
            Self::NoManagementAddress => "no_management_address",
            Self::Unreachable => "unreachable",
            Self::AuthExhausted => "auth_exhausted",
            Self::ConnectionError => "connection_error",
            Self::ScriptExecutionError => "script_execution_error",
            Self::TransferError => "transfer_error",
            Self::CleanupError => "cleanup_error",
            Self::Aborted => "aborted",
        };
        write!(f, "{name}")
    }
}

impl CollectionFailure {
    #[must_use]
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::NotRunning { .. } => FailureKind::NotRunning,
            Self::UnsupportedOs { .. } => FailureKind::UnsupportedOs,
            Self::NoManagementAddress { .. } => FailureKind::NoManagementAddress,
            Self::Unreachable { .. } => FailureKind::Unreachable,
            Self::AuthExhausted { .. } => FailureKind::AuthExhausted,
            Self::ConnectionError { .. } => FailureKind::ConnectionError,
            Self::ScriptExecutionError { .. } => FailureKind::ScriptExecutionError,
            Self::TransferError { .. } => FailureKind::TransferError,
            Self::CleanupError { .. } => FailureKind::CleanupError,
            Self::Aborted { .. } => FailureKind::Aborted,
        }
    }

    /// Whether the rest of the batch should be skipped.
    #[must_use]
    pub fn is_abort(&self) -> bool {
        matches!(self, Self::Aborted { .. })
    }
}

/// A retrieved archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectedArchive {
    /// Where the archive landed locally.
    pub local_path: PathBuf,
    /// Name the collector gave the archive.
    pub original_name: String,
    /// Name after the rename, also the local file name.
    pub renamed: String,
}

/// Files a run has put on the partition, in removal order.
///
/// Names are recorded once a step has produced them, or is about to.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RemoteArtifacts {
    tool: String,
    archive_base: Option<String>,
    renamed: Option<String>,
}

impl RemoteArtifacts {
    #[must_use]
    pub fn new(tool: &str) -> Self {
        Self {
            tool: tool.to_string(),
            ..Self::default()
        }
    }

    /// Record the archive name reported by the collector.
    pub fn record_archive(&mut self, archive: &str) {
        let base = archive.strip_suffix(".tar").unwrap_or(archive);
        self.archive_base = Some(base.to_string());
    }

    /// Record the rename target before the `mv` is issued.
    pub fn record_renamed(&mut self, renamed: &str) {
        self.renamed = Some(renamed.to_string());
    }

    /// Everything to remove: side files, the tool, the original archive
    /// and the renamed archive.
    #[must_use]
    pub fn removal_list(&self) -> Vec<String> {
        let mut files = Vec::with_capacity(6);
        if let Some(base) = &self.archive_base {
            files.extend(SIDE_FILE_SUFFIXES.iter().map(|suffix| format!("{base}{suffix}")));
        }
        files.push(self.tool.clone());
        if let Some(base) = &self.archive_base {
            files.push(format!("{base}.tar"));
        }
        if let Some(renamed) = &self.renamed {
            files.push(renamed.clone());
        }
        files
    }
}

/// Credentials to propose for a partition before operator confirmation.
#[must_use]
pub fn default_credentials(
    env: TargetEnvironment,
    username: Option<&str>,
    password: Option<&str>,
) -> (String, String) {
    let (user, pass) = if env.is_vios() {
        (VIOS_DEFAULT_USER, VIOS_DEFAULT_PASSWORD)
    } else {
        (ROOT_DEFAULT_USER, ROOT_DEFAULT_PASSWORD)
    };
    (
        username.unwrap_or(user).to_string(),
        password.unwrap_or(pass).to_string(),
    )
}

/// Archive name from the first output line carrying the collector's marker.
#[must_use]
pub fn extract_archive_name(lines: &[String]) -> Option<String> {
    let line = lines.iter().find(|line| line.contains(ARCHIVE_MARKER))?;
    ARCHIVE_NAME
        .captures(line)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}

/// `<system>-<target>-<date>.tar`, or `<target>-<date>.tar` without a
/// system. Spaces become dashes.
#[must_use]
pub fn renamed_archive(system: Option<&str>, target: &str, run_date: &str) -> String {
    let target = target.replace(' ', "-");
    match system {
        Some(system) => format!("{}-{target}-{run_date}.tar", system.replace(' ', "-")),
        None => format!("{target}-{run_date}.tar"),
    }
}

/// Drives collections, one partition at a time.
pub struct TargetCollector {
    sessions: Box<dyn SessionFactory>,
    probe: Box<dyn ReachabilityProbe>,
    prompt: Box<dyn CredentialPrompt>,
    config: CollectorConfig,
}

impl TargetCollector {
    #[must_use]
    pub fn new(
        sessions: Box<dyn SessionFactory>,
        probe: Box<dyn ReachabilityProbe>,
        prompt: Box<dyn CredentialPrompt>,
        config: CollectorConfig,
    ) -> Self {
        Self {
            sessions,
            probe,
            prompt,
            config,
        }
    }

    #[must_use]
    pub fn config(&self) -> &CollectorConfig {
        &self.config
    }

    /// Collect one partition.
    ///
    /// A detected environment is written back onto `target`.
    ///
    /// # Errors
    ///
    /// Returns the [`CollectionFailure`] that stopped the collection. The
    /// failure has already been logged and printed.
    pub async fn collect(
        &self,
        target: &mut Target,
        system: Option<&str>,
        tool: &ToolReference,
    ) -> Result<CollectedArchive, CollectionFailure> {
        let result = self.run_steps(target, system, tool).await;
        match &result {
            Ok(archive) => {
                info!(
                    target = %target.name,
                    archive = %archive.local_path.display(),
                    "OS-level collection succeeded"
                );
                ui::print_target_collected(&target.name, &archive.local_path);
            }
            Err(failure) => {
                error!(target = %target.name, kind = %failure.kind(), "{failure}");
                ui::print_target_failed(&target.name, failure.kind(), &failure.to_string());
            }
        }
        result
    }

    async fn run_steps(
        &self,
        target: &mut Target,
        system: Option<&str>,
        tool: &ToolReference,
    ) -> Result<CollectedArchive, CollectionFailure> {
        self.enter(&target.name, CollectionStep::CheckingPreconditions);
        self.check_preconditions(target).await?;

        self.enter(&target.name, CollectionStep::SelectingCredentials);
        let (username, password) = default_credentials(
            target.env,
            self.config.username.as_deref(),
            self.config.password.as_deref(),
        );

        self.enter(&target.name, CollectionStep::Authenticating);
        let mut guard = self.authenticate(target, username, password).await?;

        if target.env == TargetEnvironment::Unknown {
            self.enter(&target.name, CollectionStep::DetectingEnvironment);
            target.env = self.detect_environment(guard.session()).await;
        }
        let mode = ShellMode::for_vios(target.env.is_vios());

        let mut artifacts = RemoteArtifacts::new(&tool.file_name);
        let outcome = self
            .run_collector(guard.session(), target, system, tool, mode, &mut artifacts)
            .await;

        self.enter(&target.name, CollectionStep::CleaningUp);
        let leftovers = self.cleanup(guard.session(), &artifacts, mode).await;

        match (outcome, leftovers.is_empty()) {
            (Ok(archive), true) => Ok(archive),
            (Ok(_), false) => Err(CollectionFailure::CleanupError {
                target: target.name.clone(),
                files: leftovers,
            }),
            (Err(failure), clean) => {
                if !clean {
                    warn!(
                        target = %target.name,
                        files = ?leftovers,
                        "Cleanup incomplete after a failed collection"
                    );
                }
                Err(failure)
            }
        }
    }

    fn enter(&self, target: &str, step: CollectionStep) {
        debug!(target, step = ?step, "Entering collection step");
        ui::print_progress_step(
            target,
            step.step_number(),
            CollectionStep::TOTAL_STEPS,
            step.description(),
        );
    }

    async fn check_preconditions(&self, target: &Target) -> Result<(), CollectionFailure> {
        if !target.is_running() {
            return Err(CollectionFailure::NotRunning {
                target: target.name.clone(),
                state: target.state.clone(),
            });
        }
        if target.env == TargetEnvironment::IbmI {
            return Err(CollectionFailure::UnsupportedOs {
                target: target.name.clone(),
                os: "IBM i".into(),
            });
        }
        if target.os_level.contains("Linux") {
            return Err(CollectionFailure::UnsupportedOs {
                target: target.name.clone(),
                os: "Linux".into(),
            });
        }
        if target.management_ip.trim().is_empty() {
            return Err(CollectionFailure::NoManagementAddress {
                target: target.name.clone(),
            });
        }
        if !self.probe.probe(&target.management_ip).await.is_reachable() {
            return Err(CollectionFailure::Unreachable {
                target: target.name.clone(),
                address: target.management_ip.clone(),
            });
        }
        Ok(())
    }

    async fn authenticate(
        &self,
        target: &Target,
        mut username: String,
        mut password: String,
    ) -> Result<SessionGuard, CollectionFailure> {
        let attempts = self.config.max_auth_attempts;
        for attempt in 1..=attempts {
            match self.prompt.confirm(&target.name, &username, &password) {
                Ok((user, pass)) => {
                    username = user;
                    password = pass;
                }
                Err(e) => {
                    return Err(CollectionFailure::Aborted {
                        target: target.name.clone(),
                        reason: format!("credential prompt failed: {e:#}"),
                    });
                }
            }

            let credentials = Credentials::new(&target.management_ip, &username, &password)
                .with_remote_dir(&self.config.remote_dir);
            let mut guard = SessionGuard::new(self.sessions.open(credentials));

            match self.verify_login(guard.session()).await {
                Ok(()) => {
                    info!(target = %target.name, attempt, "Authentication successful");
                    return Ok(guard);
                }
                Err(e) if e.is_authentication() => {
                    warn!(target = %target.name, attempt, attempts, "Authentication error");
                    if attempt < attempts {
                        ui::print_error(&format!(
                            "Authentication error. Retrying connection with LPAR {}, \
                             attempt {} of {attempts}",
                            target.name,
                            attempt + 1
                        ));
                    }
                }
                Err(source) => {
                    return Err(CollectionFailure::ConnectionError {
                        target: target.name.clone(),
                        source,
                    });
                }
            }
        }

        Err(CollectionFailure::AuthExhausted {
            target: target.name.clone(),
            attempts,
        })
    }

    async fn verify_login(&self, session: &mut dyn RemoteSession) -> Result<(), SessionError> {
        session.connect().await?;
        session
            .run_command("hostname", self.config.timeouts.probe_command, ShellMode::Standard)
            .await?;
        Ok(())
    }

    async fn detect_environment(&self, session: &mut dyn RemoteSession) -> TargetEnvironment {
        info!("Detecting LPAR OS");
        let timeout = self.config.timeouts.detect;

        let uname = session
            .run_command("uname -s", timeout, ShellMode::Standard)
            .await;
        if matches!(&uname, Ok(output) if output.has_output()) {
            info!("Detected an AIX/Linux LPAR");
            return TargetEnvironment::AixOrLinux;
        }

        let vios0 = session
            .run_command("lsdev | grep vios0", timeout, ShellMode::Vios)
            .await;
        if matches!(&vios0, Ok(output) if output.has_output()) {
            info!("Detected a VIOS LPAR");
            TargetEnvironment::Vios
        } else {
            info!("Detected an AIX/Linux LPAR");
            TargetEnvironment::AixOrLinux
        }
    }

    async fn run_collector(
        &self,
        session: &mut dyn RemoteSession,
        target: &Target,
        system: Option<&str>,
        tool: &ToolReference,
        mode: ShellMode,
        artifacts: &mut RemoteArtifacts,
    ) -> Result<CollectedArchive, CollectionFailure> {
        self.enter(&target.name, CollectionStep::RunningCollector);
        let timeouts = &self.config.timeouts;
        let script_failure = |e: SessionError| CollectionFailure::ScriptExecutionError {
            target: target.name.clone(),
            reason: e.to_string(),
        };
        let transfer_failure = |e: SessionError| CollectionFailure::TransferError {
            target: target.name.clone(),
            reason: e.to_string(),
        };

        session
            .run_command(&format!("rm -f {}", tool.file_name), timeouts.remove, mode)
            .await
            .map_err(script_failure)?;
        session
            .upload_file(&tool.local_path())
            .await
            .map_err(transfer_failure)?;
        session
            .run_command(&format!("chmod 755 {}", tool.file_name), timeouts.chmod, mode)
            .await
            .map_err(script_failure)?;
        let output = session
            .run_command(&format!("ksh ./{}", tool.file_name), timeouts.script, mode)
            .await
            .map_err(script_failure)?;

        self.enter(&target.name, CollectionStep::ExtractingArchiveName);
        let Some(archive) = extract_archive_name(&output.stdout) else {
            return Err(CollectionFailure::ScriptExecutionError {
                target: target.name.clone(),
                reason: format!("no '{ARCHIVE_MARKER}' line in the collector output"),
            });
        };
        artifacts.record_archive(&archive);
        info!(target = %target.name, archive = %archive, "Collector produced archive");

        self.enter(&target.name, CollectionStep::RetrievingArchive);
        let renamed = renamed_archive(system, &target.name, &self.config.run_date);
        // A failed or timed-out mv may still have renamed the file remotely.
        artifacts.record_renamed(&renamed);
        session
            .run_command(&format!("mv {archive} {renamed}"), timeouts.rename, mode)
            .await
            .map_err(transfer_failure)?;

        let local_path = session
            .download_file(&renamed, &self.config.output_dir)
            .await
            .map_err(transfer_failure)?;

        Ok(CollectedArchive {
            local_path,
            original_name: archive,
            renamed,
        })
    }

    /// Try every removal; return the files that could not be removed.
    async fn cleanup(
        &self,
        session: &mut dyn RemoteSession,
        artifacts: &RemoteArtifacts,
        mode: ShellMode,
    ) -> Vec<String> {
        info!(host = session.host(), "Starting cleanup");
        let mut leftovers = Vec::new();
        for file in artifacts.removal_list() {
            let command = format!("rm -f {file}");
            if let Err(e) = session
                .run_command(&command, self.config.timeouts.cleanup, mode)
                .await
            {
                error!(file = %file, error = %e, "Cleanup removal failed");
                leftovers.push(file);
            }
        }
        leftovers
    }
}
