//! Status command - Job counts and worker count
//!
//! Usage:
//! ```bash
//! queuectl status
//! ```

use anyhow::Result;
use clap::Args;
use colored::Colorize;

use queuectl_queue::JobState;

use crate::AppContext;

/// Arguments for the status command
#[derive(Args)]
pub struct StatusArgs;

/// Run the status command
pub async fn run(ctx: &AppContext, _args: StatusArgs) -> Result<()> {
    let queue = ctx.queue().await?;
    let summary = queue.status_summary().await?;
    let workers = ctx.supervisor().active_workers();

    println!("{}", "Job Status Summary".bold().cyan());
    println!("{}", "═".repeat(30).cyan());
    for state in JobState::ALL {
        let label = match state {
            JobState::Dead => "Dead (DLQ)".to_string(),
            other => capitalize(other.as_str()),
        };
        println!("  {:<12} {}", format!("{}:", label).dimmed(), summary.get(state));
    }
    println!();

    println!("{}", "Worker Status".bold().cyan());
    println!("{}", "═".repeat(30).cyan());
    println!("  {:<12} {}", "Active:".dimmed(), workers.len().to_string().green());
    Ok(())
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}
