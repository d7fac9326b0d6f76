//! Locate the newest `oscollector.v<version>.ksh` in a tool directory.

use std::cmp::Ordering;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{error, info};

const TOOL_PREFIX: &str = "oscollector.v";
const TOOL_SUFFIX: &str = ".ksh";

/// Errors resolving the collection tool.
#[derive(Error, Debug)]
pub enum ToolError {
    /// The tool directory does not exist or cannot be listed.
    #[error("Tool directory {path} is not readable: {source}")]
    Unreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// No file matched the naming pattern.
    #[error("No oscollector.v<version>.ksh found in {0}")]
    NotFound(PathBuf),
}

/// The collection script chosen for a batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolReference {
    /// Directory holding the script.
    pub dir: PathBuf,
    /// File name, e.g. `oscollector.v1.10.ksh`.
    pub file_name: String,
    /// Parsed numeric version segments.
    pub version: Vec<u64>,
}

impl ToolReference {
    /// Pick the highest version in `dir`.
    ///
    /// Entries are visited in name order and only a strictly higher version
    /// replaces the current pick, so the same directory always yields the
    /// same file.
    ///
    /// # Errors
    ///
    /// Returns [`ToolError`] when the directory cannot be read or holds no
    /// matching file.
    pub fn resolve(dir: &Path) -> Result<Self, ToolError> {
        let entries = std::fs::read_dir(dir).map_err(|source| {
            error!("Path: {} is not a path.", dir.display());
            ToolError::Unreadable {
                path: dir.to_path_buf(),
                source,
            }
        })?;

        let mut names: Vec<String> = entries
            .filter_map(Result::ok)
            .filter(|entry| entry.path().is_file())
            .map(|entry| entry.file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();

        let mut best: Option<(String, Vec<u64>)> = None;
        for name in names {
            let Some(version) = parse_version(&name) else {
                continue;
            };
            let replace = best
                .as_ref()
                .map_or(true, |(_, current)| {
                    compare_versions(&version, current) == Ordering::Greater
                });
            if replace {
                best = Some((name, version));
            }
        }

        let Some((file_name, version)) = best else {
            error!("oscollector not found in {}", dir.display());
            return Err(ToolError::NotFound(dir.to_path_buf()));
        };
        info!("Found oscollector file: {file_name}");
        Ok(Self {
            dir: dir.to_path_buf(),
            file_name,
            version,
        })
    }

    /// Full local path of the script.
    #[must_use]
    pub fn local_path(&self) -> PathBuf {
        self.dir.join(&self.file_name)
    }
}

/// Parse the `<version>` of `oscollector.v<version>.ksh` into numeric
/// segments. Returns `None` for any other name.
#[must_use]
pub fn parse_version(file_name: &str) -> Option<Vec<u64>> {
    let version = file_name
        .strip_prefix(TOOL_PREFIX)?
        .strip_suffix(TOOL_SUFFIX)?;
    if version.is_empty() {
        return None;
    }
    version
        .split('.')
        .map(|segment| segment.parse::<u64>().ok())
        .collect()
}

/// Compare versions segment by segment; missing segments count as zero.
#[must_use]
pub fn compare_versions(a: &[u64], b: &[u64]) -> Ordering {
    let len = a.len().max(b.len());
    (0..len)
        .map(|i| {
            let left = a.get(i).copied().unwrap_or(0);
            let right = b.get(i).copied().unwrap_or(0);
            left.cmp(&right)
        })
        .find(|ordering| ordering.is_ne())
        .unwrap_or(Ordering::Equal)
}
