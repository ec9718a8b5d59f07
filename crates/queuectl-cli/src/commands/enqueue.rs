//! Enqueue command - Add a job
//!
//! Usage:
//! ```bash
//! queuectl enqueue '{"id":"job1","command":"sleep 2","max_retries":5}'
//! ```

use anyhow::{Context, Result};
use clap::Args;

use queuectl_queue::NewJob;

use crate::AppContext;

/// Arguments for the enqueue command
#[derive(Args)]
pub struct EnqueueArgs {
    /// Job as JSON: {"id": "...", "command": "...", "max_retries": N}
    job: String,
}

/// Run the enqueue command
pub async fn run(ctx: &AppContext, args: EnqueueArgs) -> Result<()> {
    let job = parse_job(&args.job)?;
    let queue = ctx.queue().await?;
    queue.enqueue(job.clone()).await?;
    crate::print_success(&format!("Job {} enqueued.", job.id));
    Ok(())
}

fn parse_job(raw: &str) -> Result<NewJob> {
    serde_json::from_str(raw).context(
        "Invalid job JSON: expected {\"id\": \"...\", \"command\": \"...\"} with optional \"max_retries\"",
    )
}
