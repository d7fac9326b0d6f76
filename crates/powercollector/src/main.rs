//! powercollector CLI.
//!
//! Inventories an IBM Power HMC and runs oscollector on every partition it
//! manages, or on partitions given directly.

// Allow product names without backticks in doc comments
#![allow(clippy::doc_markdown)]

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use tracing::error;

mod commands;

use commands::hmc::HmcCommand;
use commands::lpar::LparCommand;
use commands::resume::ResumeCommand;
use powercollector::ui;

/// powercollector - HMC inventory and partition OS-level collection.
#[derive(Parser)]
#[command(
    name = "powercollector",
    version,
    about = "Collect HMC inventory and partition OS-level data",
    long_about = "Connects to an HMC to collect managed system, partition and event data,\n\
                  then runs oscollector on each running AIX or VIOS partition and\n\
                  retrieves the generated archives.\n\n\
                  Partitions that cannot be collected are listed in\n\
                  NonCollectedLPARList.json, which `lpar --input` accepts."
)]
#[command(propagate_version = true)]
struct Cli {
    /// Enable verbose logging.
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Inventory an HMC, then collect its partitions.
    Hmc(HmcCommand),

    /// Collect partitions listed in a saved HMC inventory.
    Resume(ResumeCommand),

    /// Collect one partition, or a list of partitions.
    Lpar(LparCommand),
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let run = async {
        match &cli.command {
            Commands::Hmc(cmd) => cmd.run(cli.verbose).await,
            Commands::Resume(cmd) => cmd.run(cli.verbose).await,
            Commands::Lpar(cmd) => cmd.run(cli.verbose).await,
        }
    };

    tokio::select! {
        result = run => result,
        _ = tokio::signal::ctrl_c() => {
            error!("powercollector killed by ctrl-C. Output may be invalid.");
            ui::print_error("powercollector killed by ctrl-C. Output may be invalid.");
            bail!("interrupted");
        }
    }
}
