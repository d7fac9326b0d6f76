use std::path::PathBuf;

use anyhow::{bail, Result};
use clap::Args;

use powercollector::batch::read_manifest;
use powercollector::ui;
use powercollector::Target;

use super::{print_summary, OutputArgs, RunContext};

/// Collect OS-level data from one partition or a list of partitions
#[derive(Args, Debug)]
pub struct LparCommand {
    /// Partition hostname or IP address
    #[arg(long, value_name = "HOST", conflicts_with = "input", required_unless_present = "input")]
    host: Option<String>,

    /// Newline-delimited JSON list of partitions, e.g. NonCollectedLPARList.json
    #[arg(short, long, value_name = "FILE")]
    input: Option<PathBuf>,

    /// Partition username (defaults per OS)
    #[arg(short, long)]
    user: Option<String>,

    /// Partition password (defaults per OS)
    #[arg(short, long, env = "POWERCOLLECTOR_LPAR_PASSWORD", hide_env_values = true)]
    password: Option<String>,

    #[command(flatten)]
    output: OutputArgs,
}

impl LparCommand {
    pub async fn run(&self, verbose: bool) -> Result<()> {
        ui::print_banner();
        let label = self.host.as_deref().unwrap_or("oscollector-output");
        let context = RunContext::prepare(&self.output, self.input.as_deref(), label, verbose)?;

        let mut targets = if let Some(host) = &self.host {
            vec![Target::from_address(host)]
        } else if let Some(input) = &self.input {
            read_manifest(input)?
        } else {
            bail!("Either --host or --input is required");
        };
        ui::print_info(&format!("{} LPAR(s) to collect", targets.len()));

        let report = context
            .batch(self.user.clone(), self.password.clone())
            .run_targets(&mut targets)
            .await?;
        print_summary(&report);
        Ok(())
    }
}
