//! Remote sessions: command execution and file transfer on one host.
//!
//! [`RemoteSession`] is the seam the collection workflow talks to. The SSH
//! implementation lives in [`ssh`]; tests substitute scripted sessions.

pub mod ssh;

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

pub use ssh::{SshSession, SshSessionFactory};

/// Default SSH port.
pub const DEFAULT_SSH_PORT: u16 = 22;

/// Command that switches a VIOS `padmin` shell to a root shell.
pub const VIOS_BOOTSTRAP: &str = "ioscli oem_setup_env";

/// Errors raised by a remote session.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// The host rejected the credentials.
    #[error("Authentication failed for {user}@{host}")]
    Authentication { host: String, user: String },

    /// Name resolution, TCP connection or SSH handshake failed.
    #[error("Host {host} is unreachable: {reason}")]
    HostUnreachable { host: String, reason: String },

    /// The TCP connection did not complete in time.
    #[error("Timed out connecting to {host} after {secs}s")]
    ConnectTimeout { host: String, secs: u64 },

    /// A command exceeded its timeout.
    #[error("Command '{command}' timed out after {secs}s")]
    CommandTimeout { command: String, secs: u64 },

    /// A command could not be executed.
    #[error("Command '{command}' failed: {reason}")]
    CommandExecution { command: String, reason: String },

    /// A file copy in either direction failed.
    #[error("Transfer of {path} failed: {reason}")]
    Transfer { path: String, reason: String },
}

impl SessionError {
    /// Whether retrying with different credentials could help.
    #[must_use]
    pub fn is_authentication(&self) -> bool {
        matches!(self, Self::Authentication { .. })
    }
}

/// Shell context a command runs in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ShellMode {
    /// Plain `exec` of the command line.
    #[default]
    Standard,
    /// VIOS: `ioscli oem_setup_env` first, then the command and `exit`
    /// are written to the same input stream.
    Vios,
}

impl ShellMode {
    /// Pick the mode for a partition environment.
    #[must_use]
    pub fn for_vios(is_vios: bool) -> Self {
        if is_vios {
            Self::Vios
        } else {
            Self::Standard
        }
    }
}

/// Captured result of one remote command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Standard output, one entry per line without terminators.
    pub stdout: Vec<String>,
    /// Standard error, one entry per line without terminators.
    pub stderr: Vec<String>,
    /// Exit status when the remote side reported one.
    pub exit_status: Option<i32>,
}

impl CommandOutput {
    /// Build an output from raw stdout text.
    #[must_use]
    pub fn from_stdout(text: &str) -> Self {
        Self {
            stdout: split_lines(text),
            ..Self::default()
        }
    }

    /// First line that reports the outcome: stdout, or stderr when stdout
    /// is empty.
    #[must_use]
    pub fn first_line(&self) -> Option<&str> {
        self.stdout
            .first()
            .or_else(|| self.stderr.first())
            .map(String::as_str)
    }

    /// Whether stdout carried any non-blank line.
    #[must_use]
    pub fn has_output(&self) -> bool {
        self.stdout.iter().any(|line| !line.trim().is_empty())
    }
}

/// Split captured text into lines, dropping `\r\n` / `\n` terminators.
#[must_use]
pub fn split_lines(text: &str) -> Vec<String> {
    text.lines().map(|line| line.trim_end_matches('\r').to_string()).collect()
}

/// Credentials and working directory for one session.
#[derive(Clone)]
pub struct Credentials {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    /// Remote directory used for uploads and downloads.
    pub remote_dir: String,
}

impl Credentials {
    /// Credentials on the default port, working in the login directory.
    #[must_use]
    pub fn new(host: &str, username: &str, password: &str) -> Self {
        Self {
            host: host.to_string(),
            port: DEFAULT_SSH_PORT,
            username: username.to_string(),
            password: password.to_string(),
            remote_dir: ".".to_string(),
        }
    }

    /// Override the remote working directory.
    #[must_use]
    pub fn with_remote_dir(mut self, remote_dir: &str) -> Self {
        self.remote_dir = remote_dir.to_string();
        self
    }

    /// Remote path of a file in the working directory.
    #[must_use]
    pub fn remote_path(&self, name: &str) -> String {
        if name.starts_with('/') {
            return name.to_string();
        }
        format!("{}/{name}", self.remote_dir.trim_end_matches('/'))
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("remote_dir", &self.remote_dir)
            .finish()
    }
}

/// An authenticated channel to exactly one remote host.
///
/// Connection is lazy: `run_command` and the transfer operations connect
/// on first use. `disconnect` is idempotent.
#[async_trait]
pub trait RemoteSession: Send {
    /// Host this session talks to.
    fn host(&self) -> &str;

    /// Establish the connection. A no-op when already connected.
    async fn connect(&mut self) -> Result<(), SessionError>;

    /// Run one command line and capture its output.
    async fn run_command(
        &mut self,
        command: &str,
        timeout: Duration,
        mode: ShellMode,
    ) -> Result<CommandOutput, SessionError>;

    /// Copy a local file, or a directory tree, into the remote working
    /// directory.
    async fn upload_file(&mut self, local_path: &Path) -> Result<(), SessionError>;

    /// Copy a file from the remote working directory into `local_dir`.
    async fn download_file(
        &mut self,
        remote_name: &str,
        local_dir: &Path,
    ) -> Result<PathBuf, SessionError>;

    /// Close the connection.
    fn disconnect(&mut self);
}

/// Opens unconnected sessions for a set of credentials.
pub trait SessionFactory: Send + Sync {
    fn open(&self, credentials: Credentials) -> Box<dyn RemoteSession>;
}

/// Disconnects the wrapped session when dropped, on every exit path.
pub struct SessionGuard {
    session: Box<dyn RemoteSession>,
}

impl SessionGuard {
    #[must_use]
    pub fn new(session: Box<dyn RemoteSession>) -> Self {
        Self { session }
    }

    /// Borrow the session for commands and transfers.
    pub fn session(&mut self) -> &mut dyn RemoteSession {
        self.session.as_mut()
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.session.disconnect();
    }
}
