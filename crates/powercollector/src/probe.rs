//! Reachability check run before any SSH connection is attempted.

use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, error};

use crate::ui;

/// Outcome of a reachability probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reachability {
    /// Name resolved and the host answered an ICMP echo.
    Reachable,
    /// The host name did not resolve.
    Unresolvable,
    /// Resolved, but no echo reply came back.
    NoEchoReply,
}

impl Reachability {
    #[must_use]
    pub fn is_reachable(&self) -> bool {
        matches!(self, Self::Reachable)
    }
}

/// Checks whether a host can be reached at the network level.
#[async_trait]
pub trait ReachabilityProbe: Send + Sync {
    async fn probe(&self, host: &str) -> Reachability;
}

/// Resolves the name, then sends one echo request with the system `ping`.
#[derive(Debug, Clone)]
pub struct PingProbe {
    timeout: Duration,
}

impl PingProbe {
    #[must_use]
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    fn ping_command(&self, address: &str) -> Command {
        let secs = self.timeout.as_secs().max(1).to_string();
        let mut command = Command::new("ping");
        if cfg!(windows) {
            let millis = self.timeout.as_millis().max(1000).to_string();
            command.args(["-n", "1", "-w", millis.as_str(), address]);
        } else {
            command.args(["-c", "1", "-W", secs.as_str(), address]);
        }
        command
    }
}

impl Default for PingProbe {
    fn default() -> Self {
        Self::new(Duration::from_secs(5))
    }
}

#[async_trait]
impl ReachabilityProbe for PingProbe {
    async fn probe(&self, host: &str) -> Reachability {
        let address = match tokio::net::lookup_host((host, 0)).await {
            Ok(mut addrs) => match addrs.next() {
                Some(addr) => addr.ip().to_string(),
                None => {
                    report(&format!("Host: {host} is not resolvable."));
                    return Reachability::Unresolvable;
                }
            },
            Err(e) => {
                debug!(host, error = %e, "Name resolution failed");
                report(&format!("Host: {host} is not resolvable."));
                return Reachability::Unresolvable;
            }
        };

        let status = self
            .ping_command(&address)
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null())
            .status()
            .await;

        match status {
            Ok(status) if status.success() => Reachability::Reachable,
            Ok(_) => {
                report(&format!("Host: {host} is not responding to ICMP Ping."));
                Reachability::NoEchoReply
            }
            Err(e) => {
                error!(host, error = %e, "Unable to run ping");
                Reachability::NoEchoReply
            }
        }
    }
}

fn report(message: &str) {
    error!("{message}");
    ui::print_error(message);
}
