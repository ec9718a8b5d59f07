//! Worker command - Start, stop, and run workers
//!
//! Usage:
//! ```bash
//! queuectl worker start --count 3
//! queuectl worker stop
//! ```

use anyhow::Result;
use clap::{Args, Subcommand};
use colored::Colorize;
use tokio::signal;
use tokio_util::sync::CancellationToken;

use queuectl_queue::{Worker, WorkerConfig};

use crate::AppContext;

/// Arguments for the worker command
#[derive(Args)]
pub struct WorkerArgs {
    #[command(subcommand)]
    command: WorkerCommand,
}

#[derive(Subcommand)]
pub enum WorkerCommand {
    /// Start background worker processes
    #[command(name = "start")]
    Start {
        /// Number of workers to start
        #[arg(short, long, default_value = "1")]
        count: usize,
    },

    /// Signal running workers to finish their current job and exit
    #[command(name = "stop")]
    Stop,

    /// Run a worker in the foreground (used by `worker start`)
    #[command(name = "run", hide = true)]
    Run,
}

/// Run the worker command
pub async fn run(ctx: &AppContext, args: WorkerArgs) -> Result<()> {
    match args.command {
        WorkerCommand::Start { count } => start(ctx, count).await,
        WorkerCommand::Stop => stop(ctx),
        WorkerCommand::Run => run_foreground(ctx).await,
    }
}

async fn start(ctx: &AppContext, count: usize) -> Result<()> {
    if count == 0 {
        anyhow::bail!("--count must be at least 1");
    }

    // Create and migrate the database before any worker opens it
    drop(ctx.open_store().await?);

    let pids = ctx
        .supervisor()
        .spawn_workers(count, &ctx.settings.database, ctx.verbose)?;
    for pid in &pids {
        println!("  {} worker {}", "started".green(), pid);
    }
    crate::print_success(&format!("Started {} worker(s).", pids.len()));
    Ok(())
}

fn stop(ctx: &AppContext) -> Result<()> {
    let results = ctx.supervisor().stop_workers()?;
    if results.is_empty() {
        crate::print_info("No active workers found.");
        return Ok(());
    }

    for (pid, signalled) in &results {
        if *signalled {
            println!("  {} worker {}", "stopping".yellow(), pid);
        } else {
            crate::print_error(&format!("Could not signal worker {}", pid));
        }
    }
    let stopped = results.iter().filter(|(_, ok)| *ok).count();
    crate::print_success(&format!(
        "Sent stop signal to {} worker(s). They will exit after their current job.",
        stopped
    ));
    Ok(())
}

async fn run_foreground(ctx: &AppContext) -> Result<()> {
    let store = ctx.open_store().await?;
    let shutdown = CancellationToken::new();
    tokio::spawn(watch_signals(shutdown.clone()));

    let worker = Worker::new(store, WorkerConfig::default(), shutdown);
    let processed = worker.run().await;

    ctx.supervisor().release(std::process::id());
    tracing::info!(processed, "Worker exited");
    Ok(())
}

/// Cancel `shutdown` on Ctrl+C or SIGTERM
async fn watch_signals(shutdown: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::warn!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, finishing current job");
        }
        _ = terminate => {
            tracing::info!("Received SIGTERM, finishing current job");
        }
    }
    shutdown.cancel();
}
