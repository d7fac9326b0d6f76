use std::path::PathBuf;

use anyhow::Result;
use clap::Args;

use powercollector::inventory;
use powercollector::ui;

use super::{print_summary, OutputArgs, RunContext};

/// Collect OS-level data from a saved HMC inventory
#[derive(Args, Debug)]
pub struct ResumeCommand {
    /// Inventory file written by a previous `hmc` run
    #[arg(short, long, value_name = "FILE")]
    input: PathBuf,

    /// Username for every partition (defaults per OS)
    #[arg(long)]
    lpar_user: Option<String>,

    /// Password for every partition (defaults per OS)
    #[arg(long, env = "POWERCOLLECTOR_LPAR_PASSWORD", hide_env_values = true)]
    lpar_password: Option<String>,

    #[command(flatten)]
    output: OutputArgs,
}

impl ResumeCommand {
    pub async fn run(&self, verbose: bool) -> Result<()> {
        ui::print_banner();
        let context = RunContext::prepare(&self.output, Some(&self.input), "resume", verbose)?;

        let mut hmc = inventory::load_inventory(&self.input)?;
        ui::print_success(&format!(
            "Loaded {} managed system(s) from {}",
            hmc.managed_systems.len(),
            self.input.display()
        ));

        let report = context
            .batch(self.lpar_user.clone(), self.lpar_password.clone())
            .run_systems(&mut hmc.managed_systems)
            .await?;
        print_summary(&report);
        Ok(())
    }
}
