//! Console output for powercollector.
//!
//! Everything the operator sees goes through here; the log file gets the
//! same events through `tracing`. Status lines carry a fixed-width tag so
//! a long run can be scanned for `[FAIL]`.

use std::path::Path;

use colored::Colorize;

use crate::batch::FailureRecord;
use crate::target::FailureKind;

const RULE_WIDTH: usize = 64;

/// Print the startup banner.
pub fn print_banner() {
    println!();
    println!(
        "{} {}",
        "powercollector".cyan().bold(),
        format!("v{}", env!("CARGO_PKG_VERSION")).bright_black()
    );
    println!(
        "  {}",
        "HMC inventory and partition OS-level collection".bright_black()
    );
}

/// `── title ──────` rule opening a phase of the run.
pub fn print_section(title: &str) {
    let fill = RULE_WIDTH.saturating_sub(title.chars().count() + 4);
    println!();
    println!(
        "{} {} {}",
        "──".bright_black(),
        title.cyan().bold(),
        "─".repeat(fill).bright_black()
    );
}

/// A unit of work inside a section: a managed system, an LPAR.
pub fn print_step(message: &str) {
    println!("{} {}", "»".cyan(), message.bold());
}

/// Collection step of one partition, indented under its LPAR line.
pub fn print_progress_step(target: &str, current: u8, total: u8, message: &str) {
    println!(
        "   {} {}",
        format!("{target} {current}/{total}").bright_black(),
        message
    );
}

pub fn print_success(message: &str) {
    println!("{} {message}", "[ OK ]".green().bold());
}

pub fn print_warning(message: &str) {
    println!("{} {}", "[WARN]".yellow().bold(), message.yellow());
}

pub fn print_error(message: &str) {
    println!("{} {}", "[FAIL]".red().bold(), message.red());
}

pub fn print_info(message: &str) {
    println!("{} {message}", "[INFO]".blue());
}

/// Outcome line for a collected partition.
pub fn print_target_collected(target: &str, archive: &Path) {
    println!(
        "{} {} {}",
        "[ OK ]".green().bold(),
        target.bold(),
        archive.display().to_string().bright_black()
    );
}

/// Outcome line for a partition that needs manual collection.
pub fn print_target_failed(target: &str, kind: FailureKind, detail: &str) {
    println!(
        "{} {} {} {}",
        "[FAIL]".red().bold(),
        target.bold(),
        format!("({kind})").bright_black(),
        detail.red()
    );
}

/// Table of partitions left for manual collection.
pub fn print_failure_table(records: &[FailureRecord]) {
    if records.is_empty() {
        return;
    }
    let name_width = records
        .iter()
        .map(|r| r.target.name.chars().count())
        .max()
        .unwrap_or(0)
        .max("LPAR".len());

    println!();
    println!(
        "  {}",
        format!("{:<name_width$}  {:<15}  {:<14}  reason", "LPAR", "rmc_ip", "state")
            .bright_black()
    );
    for record in records {
        let ip = if record.target.management_ip.is_empty() {
            "-"
        } else {
            record.target.management_ip.as_str()
        };
        println!(
            "  {:<name_width$}  {ip:<15}  {:<14}  {}",
            record.target.name,
            record.target.state,
            record.kind.to_string().red()
        );
    }
}

/// How to finish the job once the failures are sorted out.
pub fn print_manual_followup(manifest: &Path) {
    println!();
    println!(
        "{} run oscollector manually on the LPARs above, or retry them with:",
        "[NEXT]".yellow().bold()
    );
    println!(
        "       {}",
        format!("powercollector lpar --input {}", manifest.display()).cyan()
    );
}
