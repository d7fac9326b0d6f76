//! Run configuration for a collection batch.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Local};
use tracing::{error, info};

/// Bound on credential attempts per target.
pub const MAX_AUTH_ATTEMPTS: u32 = 5;

/// Manifest of targets that need manual collection.
pub const MANIFEST_FILE: &str = "NonCollectedLPARList.json";

/// Per-command timeouts used on partitions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Timeouts {
    /// `hostname` sent right after connecting.
    pub probe_command: Duration,
    /// `uname -s` and the VIOS `lsdev` fallback.
    pub detect: Duration,
    /// Removal of a stale copy of the tool.
    pub remove: Duration,
    pub chmod: Duration,
    /// The collection script itself.
    pub script: Duration,
    pub rename: Duration,
    /// Each removal during cleanup.
    pub cleanup: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            probe_command: Duration::from_secs(10),
            detect: Duration::from_secs(30),
            remove: Duration::from_secs(60),
            chmod: Duration::from_secs(30),
            script: Duration::from_secs(900),
            rename: Duration::from_secs(60),
            cleanup: Duration::from_secs(30),
        }
    }
}

/// Settings shared by every target in a batch.
#[derive(Debug, Clone)]
pub struct CollectorConfig {
    /// Directory scanned for `oscollector.v<version>.ksh`.
    pub tool_dir: PathBuf,
    /// Where archives, the manifest and the log land.
    pub output_dir: PathBuf,
    /// Date stamp used in renamed archives, e.g. `20240101`.
    pub run_date: String,
    /// Explicit partition username; overrides the per-environment default.
    pub username: Option<String>,
    /// Explicit partition password; overrides the per-environment default.
    pub password: Option<String>,
    /// Remote working directory on partitions.
    pub remote_dir: String,
    pub max_auth_attempts: u32,
    pub timeouts: Timeouts,
}

impl CollectorConfig {
    /// Config with default credentials handling and timeouts.
    #[must_use]
    pub fn with_defaults(tool_dir: PathBuf, output_dir: PathBuf, run_date: &str) -> Self {
        Self {
            tool_dir,
            output_dir,
            run_date: run_date.to_string(),
            username: None,
            password: None,
            remote_dir: ".".into(),
            max_auth_attempts: MAX_AUTH_ATTEMPTS,
            timeouts: Timeouts::default(),
        }
    }

    /// Set explicit partition credentials. Empty values are ignored.
    #[must_use]
    pub fn with_credentials(mut self, username: Option<String>, password: Option<String>) -> Self {
        self.username = username.filter(|u| !u.is_empty());
        self.password = password.filter(|p| !p.is_empty());
        self
    }

    /// Path of the follow-up manifest.
    #[must_use]
    pub fn manifest_path(&self) -> PathBuf {
        self.output_dir.join(MANIFEST_FILE)
    }
}

/// Date used in renamed archives.
#[must_use]
pub fn run_date(now: &DateTime<Local>) -> String {
    now.format("%Y%m%d").to_string()
}

/// Stamp used in generated output directory names.
#[must_use]
pub fn run_stamp(now: &DateTime<Local>) -> String {
    now.format("%Y%m%d-%H-%M").to_string()
}

/// Pick and prepare the output directory.
///
/// An explicit directory wins, then the directory of the input file, then
/// `<base>/<label>-<stamp>`. The choice is created and probed with a
/// scratch file; when that fails the generated default is used instead.
///
/// # Errors
///
/// Returns an error when even the fallback directory is not writable.
pub fn resolve_output_dir(
    explicit: Option<&Path>,
    input: Option<&Path>,
    base: &Path,
    label: &str,
    stamp: &str,
) -> Result<PathBuf> {
    let fallback = base.join(format!("{label}-{stamp}"));
    let preferred = explicit
        .map(Path::to_path_buf)
        .or_else(|| {
            input
                .and_then(Path::parent)
                .map(|parent| {
                    if parent.as_os_str().is_empty() {
                        PathBuf::from(".")
                    } else {
                        parent.to_path_buf()
                    }
                })
        })
        .unwrap_or_else(|| fallback.clone());

    if probe_writable(&preferred).is_ok() {
        return Ok(preferred);
    }

    error!(
        "Output directory {} is invalid. Defaulting to {}",
        preferred.display(),
        fallback.display()
    );
    probe_writable(&fallback)
        .with_context(|| format!("Output directory {} is not writable", fallback.display()))?;
    info!("Output directory: {}", fallback.display());
    Ok(fallback)
}

fn probe_writable(dir: &Path) -> std::io::Result<()> {
    std::fs::create_dir_all(dir)?;
    let scratch = dir.join("temp.file");
    std::fs::write(&scratch, b"")?;
    std::fs::remove_file(&scratch)
}
