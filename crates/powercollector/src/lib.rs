//! powercollector library.
//!
//! Inventories IBM Power HMCs and runs the `oscollector` script on their
//! partitions over SSH, retrieving one archive per partition.
//!
//! # Example
//!
//! ```ignore
//! use powercollector::{
//!     CollectionBatch, CollectorConfig, DialoguerPrompt, PingProbe, SshSessionFactory,
//!     TargetCollector,
//! };
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config =
//!         CollectorConfig::with_defaults("/opt/tools".into(), "/tmp/out".into(), "20240101");
//!     let collector = TargetCollector::new(
//!         Box::new(SshSessionFactory::default()),
//!         Box::new(PingProbe::default()),
//!         Box::new(DialoguerPrompt::new()),
//!         config,
//!     );
//!     let manifest = std::path::Path::new("NonCollectedLPARList.json");
//!     let mut targets = powercollector::batch::read_manifest(manifest)?;
//!     CollectionBatch::new(collector).run_targets(&mut targets).await?;
//!     Ok(())
//! }
//! ```

// Allow product names without backticks in doc comments
#![allow(clippy::doc_markdown)]

pub mod adaptive;
pub mod batch;
pub mod config;
pub mod inventory;
pub mod model;
pub mod probe;
pub mod prompt;
pub mod session;
pub mod target;
pub mod tool;
pub mod ui;

// Re-export commonly used types at the crate root
pub use batch::{BatchReport, CollectionBatch, FailureRecord};
pub use config::{CollectorConfig, Timeouts};
pub use model::{Hmc, ManagedSystem, Target, TargetEnvironment};
pub use probe::{PingProbe, Reachability, ReachabilityProbe};
pub use prompt::{CredentialPrompt, DialoguerPrompt, ProposedCredentials};
pub use session::{
    CommandOutput, Credentials, RemoteSession, SessionError, SessionFactory, SshSessionFactory,
};
pub use target::{CollectedArchive, CollectionFailure, CollectionStep, FailureKind, TargetCollector};
pub use tool::ToolReference;
