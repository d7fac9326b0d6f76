//! Integration tests for partition collection.
//!
//! A scripted remote stands in for SSH so every scenario can count opens,
//! connects, commands and transfers.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use tempfile::TempDir;

use powercollector::session::ShellMode;
use powercollector::{
    CollectionBatch, CollectionFailure, CollectorConfig, CommandOutput, CredentialPrompt,
    Credentials, FailureKind, ManagedSystem, Reachability, ReachabilityProbe, RemoteSession,
    SessionError, SessionFactory, Target, TargetCollector, TargetEnvironment, ToolReference,
};

const RUN_DATE: &str = "20240101";
const TOOL: &str = "oscollector.v1.10.ksh";

/// What the remote side does, and what it saw.
#[derive(Default)]
struct Remote {
    /// Connects rejected with an authentication error before one succeeds.
    auth_failures: usize,
    /// Error returned by every connect, when set.
    connect_error: Option<SessionError>,
    uname_output: Vec<String>,
    vios_probe_output: Vec<String>,
    script_output: Vec<String>,
    /// Commands that fail outright.
    failing: Vec<String>,
    /// Commands that run past their deadline.
    timing_out: Vec<String>,

    opened: Vec<Credentials>,
    connects: usize,
    commands: Vec<(String, ShellMode)>,
    uploads: Vec<PathBuf>,
    downloads: Vec<String>,
    disconnects: usize,
}

impl Remote {
    fn aix_collector_output(archive: &str) -> Vec<String> {
        vec![
            "Recolectando informacion del sistema".to_string(),
            format!("Se genero el archivo {archive}"),
        ]
    }

    fn command_names(&self) -> Vec<&str> {
        self.commands.iter().map(|(c, _)| c.as_str()).collect()
    }

    /// Commands issued after the collector ran.
    fn after_script(&self) -> Vec<&str> {
        let names = self.command_names();
        let start = names
            .iter()
            .position(|c| c.starts_with("ksh ./"))
            .map_or(names.len(), |i| i + 1);
        names[start..].to_vec()
    }
}

type Shared = Arc<Mutex<Remote>>;

struct FakeFactory(Shared);

impl SessionFactory for FakeFactory {
    fn open(&self, credentials: Credentials) -> Box<dyn RemoteSession> {
        self.0.lock().unwrap().opened.push(credentials.clone());
        Box::new(FakeSession {
            remote: Arc::clone(&self.0),
            host: credentials.host,
            connected: false,
        })
    }
}

struct FakeSession {
    remote: Shared,
    host: String,
    connected: bool,
}

#[async_trait]
impl RemoteSession for FakeSession {
    fn host(&self) -> &str {
        &self.host
    }

    async fn connect(&mut self) -> Result<(), SessionError> {
        if self.connected {
            return Ok(());
        }
        let mut remote = self.remote.lock().unwrap();
        remote.connects += 1;
        if let Some(e) = remote.connect_error.clone() {
            return Err(e);
        }
        if remote.connects <= remote.auth_failures {
            return Err(SessionError::Authentication {
                host: self.host.clone(),
                user: "someone".into(),
            });
        }
        self.connected = true;
        Ok(())
    }

    async fn run_command(
        &mut self,
        command: &str,
        timeout: Duration,
        mode: ShellMode,
    ) -> Result<CommandOutput, SessionError> {
        self.connect().await?;
        let mut remote = self.remote.lock().unwrap();
        remote.commands.push((command.to_string(), mode));
        if remote.timing_out.iter().any(|t| t == command) {
            return Err(SessionError::CommandTimeout {
                command: command.to_string(),
                secs: timeout.as_secs(),
            });
        }
        if remote.failing.iter().any(|f| f == command) {
            return Err(SessionError::CommandExecution {
                command: command.to_string(),
                reason: "permission denied".into(),
            });
        }
        let stdout = match command {
            "hostname" => vec!["lpar7".to_string()],
            "uname -s" => remote.uname_output.clone(),
            "lsdev | grep vios0" => remote.vios_probe_output.clone(),
            c if c.starts_with("ksh ./") => remote.script_output.clone(),
            _ => vec![],
        };
        Ok(CommandOutput {
            stdout,
            stderr: vec![],
            exit_status: Some(0),
        })
    }

    async fn upload_file(&mut self, local_path: &Path) -> Result<(), SessionError> {
        self.connect().await?;
        self.remote
            .lock()
            .unwrap()
            .uploads
            .push(local_path.to_path_buf());
        Ok(())
    }

    async fn download_file(
        &mut self,
        remote_name: &str,
        local_dir: &Path,
    ) -> Result<PathBuf, SessionError> {
        self.connect().await?;
        self.remote
            .lock()
            .unwrap()
            .downloads
            .push(remote_name.to_string());
        let local = local_dir.join(remote_name);
        std::fs::write(&local, b"archive").map_err(|e| SessionError::Transfer {
            path: remote_name.to_string(),
            reason: e.to_string(),
        })?;
        Ok(local)
    }

    fn disconnect(&mut self) {
        self.remote.lock().unwrap().disconnects += 1;
    }
}

struct FakeProbe {
    reachable: bool,
    calls: Arc<AtomicUsize>,
}

#[async_trait]
impl ReachabilityProbe for FakeProbe {
    async fn probe(&self, _host: &str) -> Reachability {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.reachable {
            Reachability::Reachable
        } else {
            Reachability::NoEchoReply
        }
    }
}

/// Accepts the proposal and counts how often it was asked.
struct CountingPrompt {
    calls: Arc<AtomicUsize>,
}

impl CredentialPrompt for CountingPrompt {
    fn confirm(&self, _target: &str, username: &str, password: &str) -> Result<(String, String)> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok((username.to_string(), password.to_string()))
    }
}

/// Operator pressed Ctrl-C at the prompt.
struct InterruptedPrompt;

impl CredentialPrompt for InterruptedPrompt {
    fn confirm(&self, _target: &str, _username: &str, _password: &str) -> Result<(String, String)> {
        Err(std::io::Error::from(std::io::ErrorKind::Interrupted).into())
    }
}

struct Harness {
    remote: Shared,
    probe_calls: Arc<AtomicUsize>,
    prompt_calls: Arc<AtomicUsize>,
    reachable: bool,
    tool_dir: TempDir,
    output_dir: TempDir,
}

impl Harness {
    fn new(remote: Remote) -> Self {
        let tool_dir = TempDir::new().unwrap();
        for tool in ["oscollector.v1.2.ksh", TOOL, "oscollector.v1.3.ksh"] {
            std::fs::write(tool_dir.path().join(tool), "#!/bin/ksh\n").unwrap();
        }
        Self {
            remote: Arc::new(Mutex::new(remote)),
            probe_calls: Arc::new(AtomicUsize::new(0)),
            prompt_calls: Arc::new(AtomicUsize::new(0)),
            reachable: true,
            tool_dir,
            output_dir: TempDir::new().unwrap(),
        }
    }

    fn config(&self) -> CollectorConfig {
        CollectorConfig::with_defaults(
            self.tool_dir.path().to_path_buf(),
            self.output_dir.path().to_path_buf(),
            RUN_DATE,
        )
    }

    fn collector_with(&self, config: CollectorConfig) -> TargetCollector {
        let prompt = Box::new(CountingPrompt {
            calls: Arc::clone(&self.prompt_calls),
        });
        self.collector_prompting(config, prompt)
    }

    fn collector_prompting(
        &self,
        config: CollectorConfig,
        prompt: Box<dyn CredentialPrompt>,
    ) -> TargetCollector {
        TargetCollector::new(
            Box::new(FakeFactory(Arc::clone(&self.remote))),
            Box::new(FakeProbe {
                reachable: self.reachable,
                calls: Arc::clone(&self.probe_calls),
            }),
            prompt,
            config,
        )
    }

    fn collector(&self) -> TargetCollector {
        self.collector_with(self.config())
    }

    fn tool(&self) -> ToolReference {
        ToolReference::resolve(self.tool_dir.path()).unwrap()
    }

    fn remote(&self) -> std::sync::MutexGuard<'_, Remote> {
        self.remote.lock().unwrap()
    }
}

fn lpar7(env: TargetEnvironment, ip: &str) -> Target {
    Target {
        name: "lpar7".into(),
        id: "7".into(),
        env,
        os_level: "AIX 7.2 7200-05-03-2148".into(),
        management_ip: ip.into(),
        state: "Running".into(),
    }
}

fn system_with(target: Target) -> ManagedSystem {
    let mut system = ManagedSystem::new("SYS1", "9009-42A", "78ABCDE");
    system.partition_list.push(target);
    system
}

mod end_to_end_tests {
    use super::*;

    #[tokio::test]
    async fn test_collects_archive_after_second_attempt() {
        let harness = Harness::new(Remote {
            auth_failures: 1,
            script_output: Remote::aix_collector_output("tmp1234.tar"),
            ..Remote::default()
        });
        let batch = CollectionBatch::new(harness.collector());
        let mut systems = vec![system_with(lpar7(TargetEnvironment::AixOrLinux, "10.0.0.5"))];

        let report = batch.run_systems(&mut systems).await.unwrap();

        assert!(report.is_complete());
        assert_eq!(report.collected.len(), 1);
        let local = harness.output_dir.path().join("SYS1-lpar7-20240101.tar");
        assert!(local.is_file());
        assert_eq!(report.collected[0].local_path, local);
        assert!(report.manifest.is_none());
        assert!(!harness.output_dir.path().join("NonCollectedLPARList.json").exists());

        let remote = harness.remote();
        assert_eq!(remote.opened.len(), 2);
        assert_eq!(remote.connects, 2);
        assert_eq!(harness.prompt_calls.load(Ordering::SeqCst), 2);
        assert_eq!(remote.disconnects, 2);
        assert!(remote.uploads[0].ends_with(TOOL));
        assert_eq!(remote.downloads, vec!["SYS1-lpar7-20240101.tar"]);

        let commands = remote.command_names();
        assert!(!commands.contains(&"uname -s"), "known environment is not re-detected");
        assert!(commands.contains(&"chmod 755 oscollector.v1.10.ksh"));
        assert!(commands.contains(&"mv tmp1234.tar SYS1-lpar7-20240101.tar"));
        assert_eq!(
            remote.after_script(),
            vec![
                "mv tmp1234.tar SYS1-lpar7-20240101.tar",
                "rm -f tmp1234-config.txt",
                "rm -f tmp1234-error.txt",
                "rm -f tmp1234-lsgcl.txt",
                "rm -f oscollector.v1.10.ksh",
                "rm -f tmp1234.tar",
                "rm -f SYS1-lpar7-20240101.tar",
            ]
        );
        assert!(remote.commands.iter().all(|(_, mode)| *mode == ShellMode::Standard));
    }

    #[tokio::test]
    async fn test_missing_address_goes_to_manifest_without_network() {
        let harness = Harness::new(Remote::default());
        let batch = CollectionBatch::new(harness.collector());
        let mut systems = vec![system_with(lpar7(TargetEnvironment::AixOrLinux, ""))];

        let report = batch.run_systems(&mut systems).await.unwrap();

        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].kind, FailureKind::NoManagementAddress);
        assert_eq!(harness.probe_calls.load(Ordering::SeqCst), 0);
        assert!(harness.remote().opened.is_empty());
        assert_eq!(harness.remote().connects, 0);

        let manifest = report.manifest.unwrap();
        assert_eq!(manifest, harness.output_dir.path().join("NonCollectedLPARList.json"));
        let content = std::fs::read_to_string(&manifest).unwrap();
        assert_eq!(content.lines().count(), 1);
        let entry: serde_json::Value = serde_json::from_str(content.trim()).unwrap();
        assert_eq!(entry["name"], "SYS1-lpar7");
        assert_eq!(entry["state"], "Running");
        // The partition itself keeps its own name.
        assert_eq!(systems[0].partition_list[0].name, "lpar7");
    }

    #[tokio::test]
    async fn test_flat_list_uses_bare_names() {
        let harness = Harness::new(Remote {
            script_output: Remote::aix_collector_output("tmp99.tar"),
            ..Remote::default()
        });
        let batch = CollectionBatch::new(harness.collector());
        let mut targets = vec![
            Target::from_address("aix01"),
            Target {
                state: "Not Activated".into(),
                ..Target::from_address("aix02")
            },
        ];

        let report = batch.run_targets(&mut targets).await.unwrap();

        assert_eq!(report.collected.len(), 1);
        assert!(harness.output_dir.path().join("aix01-20240101.tar").is_file());
        assert_eq!(report.failed[0].target.name, "aix02");
        assert_eq!(report.failed[0].kind, FailureKind::NotRunning);
        // Detected on the first partition and written back.
        assert_eq!(targets[0].env, TargetEnvironment::AixOrLinux);
    }

    #[tokio::test]
    async fn test_system_without_partitions_is_skipped() {
        let harness = Harness::new(Remote::default());
        let batch = CollectionBatch::new(harness.collector());
        let mut systems = vec![ManagedSystem::new("EMPTY", "9009-42A", "1")];

        let report = batch.run_systems(&mut systems).await.unwrap();

        assert!(report.is_complete());
        assert!(report.collected.is_empty());
        assert!(harness.remote().opened.is_empty());
    }

    #[tokio::test]
    async fn test_missing_tool_stops_the_batch() {
        let harness = Harness::new(Remote::default());
        let mut config = harness.config();
        config.tool_dir = harness.output_dir.path().to_path_buf();
        let batch = CollectionBatch::new(harness.collector_with(config));
        let mut targets = vec![Target::from_address("aix01")];

        assert!(batch.run_targets(&mut targets).await.is_err());
        assert!(harness.remote().opened.is_empty());
    }
}

mod precondition_tests {
    use super::*;

    #[tokio::test]
    async fn test_not_running_never_connects() {
        let harness = Harness::new(Remote::default());
        let collector = harness.collector();

        for state in ["Not Activated", "Open Firmware", ""] {
            let mut target = Target {
                state: state.into(),
                ..lpar7(TargetEnvironment::AixOrLinux, "10.0.0.5")
            };
            let err = collector
                .collect(&mut target, Some("SYS1"), &harness.tool())
                .await
                .unwrap_err();
            assert_eq!(err.kind(), FailureKind::NotRunning);
        }
        assert_eq!(harness.remote().connects, 0);
        assert_eq!(harness.probe_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_unsupported_operating_systems() {
        let harness = Harness::new(Remote::default());
        let collector = harness.collector();

        let mut ibm_i = lpar7(TargetEnvironment::IbmI, "10.0.0.5");
        let err = collector.collect(&mut ibm_i, None, &harness.tool()).await.unwrap_err();
        assert_eq!(err.kind(), FailureKind::UnsupportedOs);

        let mut linux = Target {
            os_level: "Linux/Red Hat 8.6".into(),
            ..lpar7(TargetEnvironment::AixOrLinux, "10.0.0.5")
        };
        let err = collector.collect(&mut linux, None, &harness.tool()).await.unwrap_err();
        assert_eq!(err.kind(), FailureKind::UnsupportedOs);
        assert!(harness.remote().opened.is_empty());
    }

    #[tokio::test]
    async fn test_unreachable_address() {
        let mut harness = Harness::new(Remote::default());
        harness.reachable = false;
        let collector = harness.collector();

        let mut target = lpar7(TargetEnvironment::AixOrLinux, "10.0.0.5");
        let err = collector.collect(&mut target, None, &harness.tool()).await.unwrap_err();

        assert_eq!(
            err,
            CollectionFailure::Unreachable {
                target: "lpar7".into(),
                address: "10.0.0.5".into(),
            }
        );
        assert_eq!(harness.probe_calls.load(Ordering::SeqCst), 1);
        assert!(harness.remote().opened.is_empty());
    }
}

mod authentication_tests {
    use super::*;

    #[tokio::test]
    async fn test_stops_after_five_attempts() {
        let harness = Harness::new(Remote {
            auth_failures: usize::MAX,
            ..Remote::default()
        });
        let collector = harness.collector();
        let mut target = lpar7(TargetEnvironment::AixOrLinux, "10.0.0.5");

        let err = collector.collect(&mut target, None, &harness.tool()).await.unwrap_err();

        assert_eq!(
            err,
            CollectionFailure::AuthExhausted {
                target: "lpar7".into(),
                attempts: 5,
            }
        );
        let remote = harness.remote();
        assert_eq!(remote.opened.len(), 5);
        assert_eq!(remote.connects, 5);
        assert_eq!(remote.disconnects, 5);
        assert!(remote.commands.is_empty());
        assert_eq!(harness.prompt_calls.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn test_other_errors_stop_immediately() {
        let harness = Harness::new(Remote {
            connect_error: Some(SessionError::ConnectTimeout {
                host: "10.0.0.5".into(),
                secs: 120,
            }),
            ..Remote::default()
        });
        let collector = harness.collector();
        let mut target = lpar7(TargetEnvironment::AixOrLinux, "10.0.0.5");

        let err = collector.collect(&mut target, None, &harness.tool()).await.unwrap_err();

        assert_eq!(err.kind(), FailureKind::ConnectionError);
        assert_eq!(harness.remote().opened.len(), 1);
        assert_eq!(harness.remote().connects, 1);
        assert!(harness.remote().commands.is_empty());
    }

    #[tokio::test]
    async fn test_default_credentials_by_environment() {
        let harness = Harness::new(Remote {
            script_output: Remote::aix_collector_output("tmp1.tar"),
            ..Remote::default()
        });
        let collector = harness.collector();

        let mut vios = lpar7(TargetEnvironment::Vios, "10.0.0.6");
        collector.collect(&mut vios, Some("SYS1"), &harness.tool()).await.unwrap();
        let mut aix = lpar7(TargetEnvironment::AixOrLinux, "10.0.0.7");
        collector.collect(&mut aix, Some("SYS1"), &harness.tool()).await.unwrap();

        let remote = harness.remote();
        assert_eq!(remote.opened[0].username, "padmin");
        assert_eq!(remote.opened[0].password, "padmin");
        assert_eq!(remote.opened[1].username, "root");
        assert_eq!(remote.opened[1].password, "password");
    }

    #[tokio::test]
    async fn test_explicit_credentials_override_defaults() {
        let harness = Harness::new(Remote {
            script_output: Remote::aix_collector_output("tmp1.tar"),
            ..Remote::default()
        });
        let config = harness
            .config()
            .with_credentials(Some("admin".into()), Some("s3cret".into()));
        let collector = harness.collector_with(config);

        let mut vios = lpar7(TargetEnvironment::Vios, "10.0.0.6");
        collector.collect(&mut vios, None, &harness.tool()).await.unwrap();

        let remote = harness.remote();
        assert_eq!(remote.opened[0].username, "admin");
        assert_eq!(remote.opened[0].password, "s3cret");
    }
}

mod execution_tests {
    use super::*;

    #[tokio::test]
    async fn test_detects_vios_and_uses_vios_shell() {
        let harness = Harness::new(Remote {
            vios_probe_output: vec!["vios0 Available Virtual I/O Server".into()],
            script_output: Remote::aix_collector_output("tmp5.tar"),
            ..Remote::default()
        });
        let collector = harness.collector();
        let mut target = lpar7(TargetEnvironment::Unknown, "10.0.0.5");

        collector.collect(&mut target, None, &harness.tool()).await.unwrap();

        assert_eq!(target.env, TargetEnvironment::Vios);
        let remote = harness.remote();
        let script = remote
            .commands
            .iter()
            .find(|(c, _)| c.starts_with("ksh ./"))
            .unwrap();
        assert_eq!(script.1, ShellMode::Vios);
        let probe = remote
            .commands
            .iter()
            .find(|(c, _)| c == "lsdev | grep vios0")
            .unwrap();
        assert_eq!(probe.1, ShellMode::Vios);
    }

    #[tokio::test]
    async fn test_uname_answer_means_aix() {
        let harness = Harness::new(Remote {
            uname_output: vec!["AIX".into()],
            script_output: Remote::aix_collector_output("tmp5.tar"),
            ..Remote::default()
        });
        let collector = harness.collector();
        let mut target = lpar7(TargetEnvironment::Unknown, "10.0.0.5");

        collector.collect(&mut target, None, &harness.tool()).await.unwrap();

        assert_eq!(target.env, TargetEnvironment::AixOrLinux);
        assert!(!harness.remote().command_names().contains(&"lsdev | grep vios0"));
    }

    #[tokio::test]
    async fn test_missing_marker_is_a_script_failure() {
        let harness = Harness::new(Remote {
            script_output: vec!["ksh: syntax error".into()],
            ..Remote::default()
        });
        let collector = harness.collector();
        let mut target = lpar7(TargetEnvironment::AixOrLinux, "10.0.0.5");

        let err = collector.collect(&mut target, Some("SYS1"), &harness.tool()).await.unwrap_err();

        assert_eq!(err.kind(), FailureKind::ScriptExecutionError);
        let remote = harness.remote();
        // Only the tool is known, so only the tool is removed.
        assert_eq!(remote.after_script(), vec!["rm -f oscollector.v1.10.ksh"]);
        assert!(remote.downloads.is_empty());
        assert_eq!(remote.disconnects, 1);
    }

    #[tokio::test]
    async fn test_cleanup_tries_every_file_once() {
        let harness = Harness::new(Remote {
            script_output: Remote::aix_collector_output("tmp1234.tar"),
            failing: vec![
                "rm -f tmp1234-config.txt".into(),
                "rm -f tmp1234-lsgcl.txt".into(),
            ],
            ..Remote::default()
        });
        let collector = harness.collector();
        let mut target = lpar7(TargetEnvironment::AixOrLinux, "10.0.0.5");

        let err = collector.collect(&mut target, Some("SYS1"), &harness.tool()).await.unwrap_err();

        assert_eq!(
            err,
            CollectionFailure::CleanupError {
                target: "lpar7".into(),
                files: vec!["tmp1234-config.txt".into(), "tmp1234-lsgcl.txt".into()],
            }
        );
        let remote = harness.remote();
        let cleanup: Vec<&str> = remote
            .after_script()
            .into_iter()
            .filter(|c| c.starts_with("rm -f"))
            .collect();
        assert_eq!(cleanup.len(), 6);
        let mut unique = cleanup.clone();
        unique.dedup();
        assert_eq!(unique.len(), 6);
        assert_eq!(remote.disconnects, 1);
    }

    #[tokio::test]
    async fn test_failed_rename_keeps_transfer_error() {
        let harness = Harness::new(Remote {
            script_output: Remote::aix_collector_output("tmp1234.tar"),
            failing: vec![
                "mv tmp1234.tar SYS1-lpar7-20240101.tar".into(),
                "rm -f tmp1234.tar".into(),
            ],
            ..Remote::default()
        });
        let collector = harness.collector();
        let mut target = lpar7(TargetEnvironment::AixOrLinux, "10.0.0.5");

        let err = collector
            .collect(&mut target, Some("SYS1"), &harness.tool())
            .await
            .unwrap_err();

        // The rename may have happened remotely; the cleanup failure does
        // not hide the original one.
        assert_eq!(err.kind(), FailureKind::TransferError);
        let remote = harness.remote();
        assert_eq!(
            remote.after_script(),
            vec![
                "mv tmp1234.tar SYS1-lpar7-20240101.tar",
                "rm -f tmp1234-config.txt",
                "rm -f tmp1234-error.txt",
                "rm -f tmp1234-lsgcl.txt",
                "rm -f oscollector.v1.10.ksh",
                "rm -f tmp1234.tar",
                "rm -f SYS1-lpar7-20240101.tar",
            ]
        );
        assert!(remote.downloads.is_empty());
        assert_eq!(remote.disconnects, 1);
    }

    #[tokio::test]
    async fn test_script_timeout_is_a_script_failure() {
        let harness = Harness::new(Remote {
            script_output: Remote::aix_collector_output("tmp1234.tar"),
            timing_out: vec!["ksh ./oscollector.v1.10.ksh".into()],
            ..Remote::default()
        });
        let collector = harness.collector();
        let mut target = lpar7(TargetEnvironment::AixOrLinux, "10.0.0.5");

        let err = collector
            .collect(&mut target, Some("SYS1"), &harness.tool())
            .await
            .unwrap_err();

        assert_eq!(err.kind(), FailureKind::ScriptExecutionError);
        let CollectionFailure::ScriptExecutionError { reason, .. } = &err else {
            panic!("unexpected failure: {err:?}");
        };
        assert!(reason.contains("timed out"), "{reason}");
        let remote = harness.remote();
        assert_eq!(remote.after_script(), vec!["rm -f oscollector.v1.10.ksh"]);
        assert!(remote.downloads.is_empty());
        assert_eq!(remote.disconnects, 1);
    }
}

mod abort_tests {
    use super::*;

    #[tokio::test]
    async fn test_interrupted_prompt_never_connects() {
        let harness = Harness::new(Remote::default());
        let collector = harness.collector_prompting(harness.config(), Box::new(InterruptedPrompt));
        let mut target = lpar7(TargetEnvironment::AixOrLinux, "10.0.0.5");

        let err = collector.collect(&mut target, None, &harness.tool()).await.unwrap_err();

        assert_eq!(err.kind(), FailureKind::Aborted);
        assert!(err.is_abort());
        let remote = harness.remote();
        assert!(remote.opened.is_empty());
        assert_eq!(remote.connects, 0);
    }

    #[tokio::test]
    async fn test_interrupted_prompt_stops_the_batch() {
        let harness = Harness::new(Remote::default());
        let collector = harness.collector_prompting(harness.config(), Box::new(InterruptedPrompt));
        let batch = CollectionBatch::new(collector);
        let mut targets = vec![
            Target {
                state: "Not Activated".into(),
                ..Target::from_address("aix01")
            },
            Target::from_address("aix02"),
            Target::from_address("aix03"),
        ];

        let err = batch.run_targets(&mut targets).await.unwrap_err();

        assert!(format!("{err:#}").contains("aix02"));
        // aix03 is never attempted; the list so far is still saved.
        assert_eq!(harness.probe_calls.load(Ordering::SeqCst), 1);
        assert!(harness.remote().opened.is_empty());
        let manifest = harness.output_dir.path().join("NonCollectedLPARList.json");
        let content = std::fs::read_to_string(manifest).unwrap();
        let names: Vec<serde_json::Value> = content
            .lines()
            .map(|line| serde_json::from_str::<serde_json::Value>(line).unwrap()["name"].clone())
            .collect();
        assert_eq!(names, vec!["aix01", "aix02"]);
    }
}
