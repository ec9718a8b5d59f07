//! DLQ command - Inspect and re-queue dead jobs
//!
//! Usage:
//! ```bash
//! queuectl dlq list
//! queuectl dlq retry job1
//! ```

use anyhow::{bail, Result};
use clap::{Args, Subcommand};
use colored::Colorize;

use crate::AppContext;

/// Arguments for the dlq command
#[derive(Args)]
pub struct DlqArgs {
    #[command(subcommand)]
    command: DlqCommand,
}

#[derive(Subcommand)]
pub enum DlqCommand {
    /// View all jobs in the DLQ
    #[command(name = "list")]
    List,

    /// Move a dead job back to pending with its attempts reset
    #[command(name = "retry")]
    Retry {
        /// ID of the dead job
        job_id: String,
    },
}

/// Run the dlq command
pub async fn run(ctx: &AppContext, args: DlqArgs) -> Result<()> {
    let queue = ctx.queue().await?;
    match args.command {
        DlqCommand::List => {
            let jobs = queue.dlq_list().await?;
            if jobs.is_empty() {
                crate::print_info("DLQ is empty.");
                return Ok(());
            }
            println!("{}", "Dead Letter Queue".bold().red());
            println!("{}", super::jobs_table(&jobs));
            Ok(())
        }
        DlqCommand::Retry { job_id } => {
            if queue.dlq_retry(&job_id).await? {
                crate::print_success(&format!("Job {} has been re-queued from DLQ.", job_id));
                Ok(())
            } else {
                crate::print_error(&format!("Job {} not found in DLQ.", job_id));
                bail!("job {} is not in the dead-letter queue", job_id)
            }
        }
    }
}
