//! List command - Show jobs
//!
//! Usage:
//! ```bash
//! queuectl list
//! queuectl list --state dead
//! ```

use anyhow::Result;
use clap::Args;
use colored::Colorize;

use queuectl_queue::JobState;

use crate::AppContext;

/// Arguments for the list command
#[derive(Args)]
pub struct ListArgs {
    /// Filter by state (pending, processing, completed, dead)
    #[arg(long)]
    state: Option<JobState>,
}

/// Run the list command
pub async fn run(ctx: &AppContext, args: ListArgs) -> Result<()> {
    let queue = ctx.queue().await?;
    let jobs = queue.list_jobs(args.state).await?;

    match args.state {
        Some(state) => println!("{}", format!("Jobs in '{}' state", state).bold()),
        None => println!("{}", "All jobs".bold()),
    }

    if jobs.is_empty() {
        crate::print_info("No jobs found.");
        return Ok(());
    }

    println!("{}", super::jobs_table(&jobs));
    Ok(())
}
