//! SSH/SCP session built on libssh2.
//!
//! libssh2 calls block, so every network operation runs on the blocking
//! pool. A command's output is polled in non-blocking mode against a
//! deadline for the whole command; the libssh2 session timeout only bounds
//! the individual blocking calls around it. Host keys are accepted as
//! presented.

use std::fs::File;
use std::io::{Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use ssh2::{Channel, Session, Sftp};
use tokio::task::JoinError;
use tracing::{debug, info, warn};

use super::{
    split_lines, CommandOutput, Credentials, RemoteSession, SessionError, SessionFactory,
    ShellMode, VIOS_BOOTSTRAP,
};

/// Connect timeout used when none is configured.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(120);

/// Timeout applied to a single file transfer.
pub const DEFAULT_TRANSFER_TIMEOUT: Duration = Duration::from_secs(600);

/// Pause between polls when neither stream had data.
const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Remote session over SSH with password authentication.
pub struct SshSession {
    credentials: Credentials,
    session: Option<Session>,
    connect_timeout: Duration,
    transfer_timeout: Duration,
}

impl SshSession {
    /// Create an unconnected session.
    #[must_use]
    pub fn new(credentials: Credentials) -> Self {
        Self {
            credentials,
            session: None,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            transfer_timeout: DEFAULT_TRANSFER_TIMEOUT,
        }
    }

    /// Override the connect and transfer timeouts.
    #[must_use]
    pub fn with_timeouts(mut self, connect: Duration, transfer: Duration) -> Self {
        self.connect_timeout = connect;
        self.transfer_timeout = transfer;
        self
    }

    fn connected(&self, command: &str) -> Result<Session, SessionError> {
        self.session
            .clone()
            .ok_or_else(|| SessionError::CommandExecution {
                command: command.to_string(),
                reason: "session is not connected".to_string(),
            })
    }

    fn log_output(&self, command: &str, output: &CommandOutput) {
        let host = self.credentials.host.as_str();
        if output.stdout.is_empty() && output.stderr.is_empty() {
            info!(host, "INPUT: {command} | OUTPUT: No output");
        }
        for line in &output.stdout {
            info!(host, "INPUT: {command} | OUTPUT: {line}");
        }
        for line in &output.stderr {
            info!(host, "INPUT: {command} | ERROR: {line}");
        }
    }
}

#[async_trait]
impl RemoteSession for SshSession {
    fn host(&self) -> &str {
        &self.credentials.host
    }

    async fn connect(&mut self) -> Result<(), SessionError> {
        if self.session.is_some() {
            return Ok(());
        }

        let credentials = self.credentials.clone();
        let timeout = self.connect_timeout;
        let session = tokio::task::spawn_blocking(move || open_session(&credentials, timeout))
            .await
            .map_err(|e| SessionError::HostUnreachable {
                host: self.credentials.host.clone(),
                reason: join_reason(&e),
            })??;

        debug!(
            host = %self.credentials.host,
            user = %self.credentials.username,
            "SSH session established"
        );
        self.session = Some(session);
        Ok(())
    }

    async fn run_command(
        &mut self,
        command: &str,
        timeout: Duration,
        mode: ShellMode,
    ) -> Result<CommandOutput, SessionError> {
        info!(host = %self.credentials.host, "INPUT: {command}");
        self.connect().await?;
        if mode == ShellMode::Vios {
            info!("Special VIOS command mode. Sending {VIOS_BOOTSTRAP} before command.");
        }

        let session = self.connected(command)?;
        let owned = command.to_string();
        let result =
            tokio::task::spawn_blocking(move || exec_blocking(&session, &owned, timeout, mode))
                .await
                .map_err(|e| SessionError::CommandExecution {
                    command: command.to_string(),
                    reason: join_reason(&e),
                })?;

        match result {
            Ok(output) => {
                self.log_output(command, &output);
                Ok(output)
            }
            Err(e) => {
                warn!(
                    host = %self.credentials.host,
                    error = %e,
                    "INPUT: {command} raised an error"
                );
                Err(e)
            }
        }
    }

    async fn upload_file(&mut self, local_path: &Path) -> Result<(), SessionError> {
        self.connect().await?;
        let session = self.connected("scp")?;
        let credentials = self.credentials.clone();
        let local = local_path.to_path_buf();
        let timeout = self.transfer_timeout;

        tokio::task::spawn_blocking(move || {
            session.set_timeout(timeout_millis(timeout));
            upload_blocking(&session, &credentials, &local)
        })
        .await
        .map_err(|e| SessionError::Transfer {
            path: local_path.display().to_string(),
            reason: join_reason(&e),
        })??;

        info!(
            host = %self.credentials.host,
            "Uploaded {} to {}",
            local_path.display(),
            self.credentials.remote_dir
        );
        Ok(())
    }

    async fn download_file(
        &mut self,
        remote_name: &str,
        local_dir: &Path,
    ) -> Result<PathBuf, SessionError> {
        self.connect().await?;
        let session = self.connected("scp")?;
        let remote = self.credentials.remote_path(remote_name);
        let local_dir = local_dir.to_path_buf();
        let timeout = self.transfer_timeout;

        let local_path = tokio::task::spawn_blocking(move || {
            session.set_timeout(timeout_millis(timeout));
            download_blocking(&session, &remote, &local_dir)
        })
        .await
        .map_err(|e| SessionError::Transfer {
            path: remote_name.to_string(),
            reason: join_reason(&e),
        })??;

        info!(
            host = %self.credentials.host,
            "Downloaded {remote_name} to {}",
            local_path.display()
        );
        Ok(local_path)
    }

    fn disconnect(&mut self) {
        if let Some(session) = self.session.take() {
            if let Err(e) = session.disconnect(None, "collection finished", None) {
                debug!(host = %self.credentials.host, error = %e, "Error while disconnecting");
            }
            debug!(host = %self.credentials.host, "SSH session closed");
        }
    }
}

/// Opens [`SshSession`]s with shared timeouts.
#[derive(Debug, Clone)]
pub struct SshSessionFactory {
    connect_timeout: Duration,
    transfer_timeout: Duration,
}

impl SshSessionFactory {
    #[must_use]
    pub fn new(connect_timeout: Duration, transfer_timeout: Duration) -> Self {
        Self {
            connect_timeout,
            transfer_timeout,
        }
    }
}

impl Default for SshSessionFactory {
    fn default() -> Self {
        Self::new(DEFAULT_CONNECT_TIMEOUT, DEFAULT_TRANSFER_TIMEOUT)
    }
}

impl SessionFactory for SshSessionFactory {
    fn open(&self, credentials: Credentials) -> Box<dyn RemoteSession> {
        Box::new(
            SshSession::new(credentials).with_timeouts(self.connect_timeout, self.transfer_timeout),
        )
    }
}

fn open_session(credentials: &Credentials, timeout: Duration) -> Result<Session, SessionError> {
    let host = credentials.host.as_str();
    let unreachable = |reason: String| SessionError::HostUnreachable {
        host: host.to_string(),
        reason,
    };

    let addrs: Vec<_> = (host, credentials.port)
        .to_socket_addrs()
        .map_err(|e| unreachable(format!("invalid or unresolvable host name: {e}")))?
        .collect();

    let mut last_error = None;
    let mut tcp = None;
    for addr in &addrs {
        match TcpStream::connect_timeout(addr, timeout) {
            Ok(stream) => {
                tcp = Some(stream);
                break;
            }
            Err(e) => last_error = Some(e),
        }
    }
    let tcp = match (tcp, last_error) {
        (Some(stream), _) => stream,
        (None, Some(e)) if e.kind() == std::io::ErrorKind::TimedOut => {
            return Err(SessionError::ConnectTimeout {
                host: host.to_string(),
                secs: timeout.as_secs(),
            });
        }
        (None, Some(e)) => return Err(unreachable(e.to_string())),
        (None, None) => return Err(unreachable("host name resolved to no addresses".into())),
    };

    let mut session =
        Session::new().map_err(|e| unreachable(format!("failed to create SSH session: {e}")))?;
    session.set_tcp_stream(tcp);
    session.set_timeout(timeout_millis(timeout));
    session
        .handshake()
        .map_err(|e| unreachable(format!("SSH handshake failed: {e}")))?;

    let auth_failed = || SessionError::Authentication {
        host: host.to_string(),
        user: credentials.username.clone(),
    };
    session
        .userauth_password(&credentials.username, &credentials.password)
        .map_err(|_| auth_failed())?;
    if !session.authenticated() {
        return Err(auth_failed());
    }

    Ok(session)
}

fn exec_blocking(
    session: &Session,
    command: &str,
    timeout: Duration,
    mode: ShellMode,
) -> Result<CommandOutput, SessionError> {
    let fail = |e: std::io::Error| command_error(command, timeout, e);
    session.set_blocking(true);
    session.set_timeout(timeout_millis(timeout));

    let mut channel = session.channel_session().map_err(|e| fail(e.into()))?;
    match mode {
        ShellMode::Standard => channel.exec(command).map_err(|e| fail(e.into()))?,
        ShellMode::Vios => {
            // oem_setup_env never hands back a prompt, so the command and
            // the exit go down the same stdin.
            channel.exec(VIOS_BOOTSTRAP).map_err(|e| fail(e.into()))?;
            channel
                .write_all(format!("{command}\nexit\n").as_bytes())
                .map_err(fail)?;
            channel.flush().map_err(fail)?;
        }
    }
    channel.send_eof().map_err(|e| fail(e.into()))?;

    session.set_blocking(false);
    let drained = drain_streams(&mut channel, command, timeout);
    session.set_blocking(true);
    let (stdout, stderr) = drained?;

    if let Err(e) = channel.wait_close() {
        debug!(command, error = %e, "Channel did not close cleanly");
    }
    Ok(CommandOutput {
        stdout: split_lines(&String::from_utf8_lossy(&stdout)),
        stderr: split_lines(&String::from_utf8_lossy(&stderr)),
        exit_status: channel.exit_status().ok(),
    })
}

/// Both output streams of a running command.
trait CommandStreams {
    fn read_stdout(&mut self, buf: &mut [u8]) -> std::io::Result<usize>;
    fn read_stderr(&mut self, buf: &mut [u8]) -> std::io::Result<usize>;
    fn at_eof(&self) -> bool;
    /// Stop a command that ran past its deadline.
    fn abort(&mut self);
}

impl CommandStreams for Channel {
    fn read_stdout(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.read(buf)
    }

    fn read_stderr(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.stderr().read(buf)
    }

    fn at_eof(&self) -> bool {
        self.eof()
    }

    fn abort(&mut self) {
        if let Err(e) = self.close() {
            debug!(error = %e, "Failed to close timed-out channel");
        }
    }
}

/// Read stdout and stderr in turn until end of stream or `timeout`.
///
/// Reading one stream to the end first would stall a command whose other
/// stream fills the channel window.
fn drain_streams(
    streams: &mut impl CommandStreams,
    command: &str,
    timeout: Duration,
) -> Result<(Vec<u8>, Vec<u8>), SessionError> {
    let started = Instant::now();
    let mut stdout = Vec::new();
    let mut stderr = Vec::new();
    let mut buf = [0u8; 8192];
    let fail = |e: std::io::Error| command_error(command, timeout, e);

    loop {
        let mut progressed = take_available(streams.read_stdout(&mut buf), &buf, &mut stdout)
            .map_err(fail)?;
        progressed |= take_available(streams.read_stderr(&mut buf), &buf, &mut stderr)
            .map_err(fail)?;

        if !progressed && streams.at_eof() {
            return Ok((stdout, stderr));
        }
        if started.elapsed() > timeout {
            streams.abort();
            return Err(SessionError::CommandTimeout {
                command: command.to_string(),
                secs: timeout.as_secs(),
            });
        }
        if !progressed {
            std::thread::sleep(POLL_INTERVAL);
        }
    }
}

/// Append what a non-blocking read returned; `Ok(false)` when nothing came.
fn take_available(
    read: std::io::Result<usize>,
    buf: &[u8],
    sink: &mut Vec<u8>,
) -> std::io::Result<bool> {
    match read {
        Ok(0) => Ok(false),
        Ok(n) => {
            sink.extend_from_slice(&buf[..n]);
            Ok(true)
        }
        Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => Ok(false),
        Err(e) => Err(e),
    }
}

fn upload_blocking(
    session: &Session,
    credentials: &Credentials,
    local: &Path,
) -> Result<(), SessionError> {
    let name = local
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .ok_or_else(|| transfer_error(local, "path has no file name"))?;
    let remote = credentials.remote_path(&name);

    if local.is_dir() {
        let sftp = session
            .sftp()
            .map_err(|e| transfer_error(local, &e.to_string()))?;
        upload_tree(session, &sftp, local, &remote)
    } else {
        send_file(session, local, &remote)
    }
}

fn upload_tree(
    session: &Session,
    sftp: &Sftp,
    local_dir: &Path,
    remote_dir: &str,
) -> Result<(), SessionError> {
    if sftp.stat(Path::new(remote_dir)).is_err() {
        sftp.mkdir(Path::new(remote_dir), 0o755)
            .map_err(|e| transfer_error(local_dir, &format!("mkdir {remote_dir}: {e}")))?;
    }

    let mut entries: Vec<PathBuf> = std::fs::read_dir(local_dir)
        .map_err(|e| transfer_error(local_dir, &e.to_string()))?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .collect();
    entries.sort();

    for path in entries {
        let Some(name) = path.file_name().map(|n| n.to_string_lossy().into_owned()) else {
            continue;
        };
        let remote = format!("{}/{name}", remote_dir.trim_end_matches('/'));
        if path.is_dir() {
            upload_tree(session, sftp, &path, &remote)?;
        } else {
            send_file(session, &path, &remote)?;
        }
    }
    Ok(())
}

fn send_file(session: &Session, local: &Path, remote: &str) -> Result<(), SessionError> {
    let mut file = File::open(local).map_err(|e| transfer_error(local, &e.to_string()))?;
    let size = file
        .metadata()
        .map_err(|e| transfer_error(local, &e.to_string()))?
        .len();

    let mut channel = session
        .scp_send(Path::new(remote), 0o644, size, None)
        .map_err(|e| transfer_error(local, &e.to_string()))?;
    std::io::copy(&mut file, &mut channel).map_err(|e| transfer_error(local, &e.to_string()))?;

    finish_channel(&mut channel).map_err(|e| transfer_error(local, &e.to_string()))
}

fn finish_channel(channel: &mut Channel) -> Result<(), ssh2::Error> {
    channel.send_eof()?;
    channel.wait_eof()?;
    channel.close()?;
    channel.wait_close()
}

fn download_blocking(
    session: &Session,
    remote: &str,
    local_dir: &Path,
) -> Result<PathBuf, SessionError> {
    let remote_error = |reason: String| SessionError::Transfer {
        path: remote.to_string(),
        reason,
    };

    let file_name = Path::new(remote)
        .file_name()
        .ok_or_else(|| remote_error("remote path has no file name".into()))?;
    let local_path = local_dir.join(file_name);

    let (mut channel, stat) = session
        .scp_recv(Path::new(remote))
        .map_err(|e| remote_error(e.to_string()))?;
    let mut file = File::create(&local_path).map_err(|e| remote_error(e.to_string()))?;
    let copied = std::io::copy(&mut (&mut channel).take(stat.size()), &mut file)
        .map_err(|e| remote_error(e.to_string()))?;
    if copied != stat.size() {
        return Err(remote_error(format!(
            "short read: {copied} of {} bytes",
            stat.size()
        )));
    }

    if let Err(e) = finish_channel(&mut channel) {
        debug!(remote, error = %e, "SCP channel did not close cleanly");
    }
    Ok(local_path)
}

fn command_error(command: &str, timeout: Duration, err: std::io::Error) -> SessionError {
    match err.kind() {
        std::io::ErrorKind::TimedOut => SessionError::CommandTimeout {
            command: command.to_string(),
            secs: timeout.as_secs(),
        },
        _ => SessionError::CommandExecution {
            command: command.to_string(),
            reason: err.to_string(),
        },
    }
}

fn transfer_error(path: &Path, reason: &str) -> SessionError {
    SessionError::Transfer {
        path: path.display().to_string(),
        reason: reason.to_string(),
    }
}

fn timeout_millis(timeout: Duration) -> u32 {
    u32::try_from(timeout.as_millis()).unwrap_or(u32::MAX)
}

fn join_reason(err: &JoinError) -> String {
    format!("blocking SSH task did not complete: {err}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    /// Streams that hand out one scripted chunk per read. `None` is a read
    /// that would block.
    #[derive(Default)]
    struct ScriptedStreams {
        stdout: VecDeque<Option<&'static [u8]>>,
        stderr: VecDeque<Option<&'static [u8]>>,
        /// Prints a line every few milliseconds and never finishes.
        chatty: bool,
        aborted: bool,
    }

    fn next_chunk(
        queue: &mut VecDeque<Option<&'static [u8]>>,
        buf: &mut [u8],
    ) -> std::io::Result<usize> {
        match queue.pop_front() {
            Some(Some(chunk)) => {
                buf[..chunk.len()].copy_from_slice(chunk);
                Ok(chunk.len())
            }
            Some(None) => Err(std::io::ErrorKind::WouldBlock.into()),
            None => Ok(0),
        }
    }

    impl CommandStreams for ScriptedStreams {
        fn read_stdout(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            if self.chatty {
                std::thread::sleep(Duration::from_millis(5));
                buf[..5].copy_from_slice(b"tick\n");
                return Ok(5);
            }
            next_chunk(&mut self.stdout, buf)
        }

        fn read_stderr(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            next_chunk(&mut self.stderr, buf)
        }

        fn at_eof(&self) -> bool {
            !self.chatty && self.stdout.is_empty() && self.stderr.is_empty()
        }

        fn abort(&mut self) {
            self.aborted = true;
        }
    }

    #[test]
    fn test_drain_reads_both_streams_in_turn() {
        let mut streams = ScriptedStreams {
            stdout: VecDeque::from([
                None,
                None,
                None,
                Some(&b"Se genero el archivo t.tar\n"[..]),
            ]),
            stderr: VecDeque::from([
                Some(&b"warning 1\n"[..]),
                Some(&b"warning 2\n"[..]),
                Some(&b"warning 3\n"[..]),
            ]),
            ..ScriptedStreams::default()
        };

        let (stdout, stderr) = drain_streams(
            &mut streams,
            "ksh ./oscollector.v1.ksh",
            Duration::from_secs(5),
        )
        .unwrap();

        assert_eq!(stdout, b"Se genero el archivo t.tar\n");
        assert_eq!(stderr, b"warning 1\nwarning 2\nwarning 3\n");
        assert!(!streams.aborted);
    }

    #[test]
    fn test_drain_enforces_deadline_on_chatty_command() {
        let mut streams = ScriptedStreams {
            chatty: true,
            ..ScriptedStreams::default()
        };

        let err = drain_streams(
            &mut streams,
            "ksh ./oscollector.v1.ksh",
            Duration::from_millis(50),
        )
        .unwrap_err();

        assert!(matches!(err, SessionError::CommandTimeout { .. }));
        assert!(streams.aborted);
    }

    #[test]
    fn test_take_available() {
        let buf = *b"abcd";
        let mut sink = Vec::new();
        assert!(take_available(Ok(2), &buf, &mut sink).unwrap());
        assert!(!take_available(Ok(0), &buf, &mut sink).unwrap());
        assert!(!take_available(Err(std::io::ErrorKind::WouldBlock.into()), &buf, &mut sink)
            .unwrap());
        assert!(take_available(Err(std::io::ErrorKind::BrokenPipe.into()), &buf, &mut sink)
            .is_err());
        assert_eq!(sink, b"ab");
    }

    #[test]
    fn test_command_error_classifies_timeouts() {
        let err = command_error(
            "ksh ./oscollector.v1.ksh",
            Duration::from_secs(900),
            std::io::Error::new(std::io::ErrorKind::TimedOut, "timed out"),
        );
        assert_eq!(
            err,
            SessionError::CommandTimeout {
                command: "ksh ./oscollector.v1.ksh".into(),
                secs: 900
            }
        );

        let err = command_error(
            "hostname",
            Duration::from_secs(10),
            std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe"),
        );
        assert!(matches!(err, SessionError::CommandExecution { .. }));
    }

    #[test]
    fn test_timeout_millis_saturates() {
        assert_eq!(timeout_millis(Duration::from_secs(30)), 30_000);
        assert_eq!(timeout_millis(Duration::from_secs(u64::MAX)), u32::MAX);
    }

    #[tokio::test]
    async fn test_unresolvable_host_is_unreachable() {
        let mut session = SshSession::new(Credentials::new("host.invalid.", "root", "x"))
            .with_timeouts(Duration::from_secs(2), Duration::from_secs(2));
        let err = session.connect().await.unwrap_err();
        assert!(matches!(err, SessionError::HostUnreachable { .. }));
    }

    #[test]
    fn test_disconnect_without_connect_is_noop() {
        let mut session = SshSession::new(Credentials::new("lpar1", "root", "x"));
        session.disconnect();
        session.disconnect();
    }
}
