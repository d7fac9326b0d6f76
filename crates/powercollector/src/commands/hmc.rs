use anyhow::{bail, Result};
use clap::Args;
use tracing::{error, info};

use powercollector::inventory::{self, InventoryCollector};
use powercollector::session::{Credentials, SessionFactory, SessionGuard, SshSessionFactory};
use powercollector::{PingProbe, ReachabilityProbe};
use powercollector::ui;

use super::{print_summary, OutputArgs, RunContext};

/// Inventory an HMC, then collect OS-level data from its partitions
#[derive(Args, Debug)]
pub struct HmcCommand {
    /// HMC hostname or IP address
    #[arg(long, value_name = "HOST")]
    host: String,

    /// HMC username
    #[arg(short, long)]
    user: String,

    /// HMC password
    #[arg(short, long, env = "POWERCOLLECTOR_HMC_PASSWORD", hide_env_values = true)]
    password: String,

    /// Only collect HMC data; skip OS-level collection
    #[arg(long)]
    hmc_only: bool,

    /// Username for every partition (defaults per OS)
    #[arg(long)]
    lpar_user: Option<String>,

    /// Password for every partition (defaults per OS)
    #[arg(long, env = "POWERCOLLECTOR_LPAR_PASSWORD", hide_env_values = true)]
    lpar_password: Option<String>,

    #[command(flatten)]
    output: OutputArgs,
}

impl HmcCommand {
    pub async fn run(&self, verbose: bool) -> Result<()> {
        ui::print_banner();
        let context = RunContext::prepare(&self.output, None, &self.host, verbose)?;

        if !PingProbe::default().probe(&self.host).await.is_reachable() {
            error!(host = %self.host, "HMC not resolvable or doesn't answer to ICMP Ping");
            bail!("HMC {} not resolvable or doesn't answer to ICMP Ping", self.host);
        }

        ui::print_section(&format!("HMC collection: {}", self.host));
        info!(host = %self.host, "Trying to connect to HMC");
        let credentials = Credentials::new(&self.host, &self.user, &self.password);
        let mut guard = SessionGuard::new(SshSessionFactory::default().open(credentials));

        let mut collector =
            InventoryCollector::new(guard.session(), &self.host, &context.output_dir);
        match collector.verify_console().await {
            Ok(true) => {}
            Ok(false) => {
                error!(host = %self.host, "Host is not an HMC");
                bail!("Host: {} is not an HMC", self.host);
            }
            Err(e) if e.is_authentication() => {
                error!(error = %e, "HMC connection error");
                bail!("HMC Connection error - Invalid User or Password");
            }
            Err(e) => {
                error!(error = %e, "HMC connection error");
                bail!("HMC Connection error: {e}");
            }
        }

        ui::print_success(&format!(
            "Connection to HMC: {} successful, collection started",
            self.host
        ));
        let mut hmc = collector.collect().await?;
        let saved = inventory::save_inventory(&context.output_dir, &self.host, &hmc)?;
        ui::print_success(&format!("Inventory written to {}", saved.display()));

        collector.collect_vios_logs(&hmc).await;
        drop(guard);

        if self.hmc_only {
            ui::print_success(
                "powercollector has completed successfully with --hmc-only. \
                 Please run oscollector manually on the LPARs if the managed system is running.",
            );
            info!("Completed with --hmc-only");
            return Ok(());
        }

        let report = context
            .batch(self.lpar_user.clone(), self.lpar_password.clone())
            .run_systems(&mut hmc.managed_systems)
            .await?;
        print_summary(&report);
        Ok(())
    }
}
