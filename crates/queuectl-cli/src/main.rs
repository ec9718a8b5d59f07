//! queuectl - persistent background job queue
//!
//! # Usage
//!
//! ```bash
//! # Add a job
//! queuectl enqueue '{"id":"job1","command":"echo hello"}'
//!
//! # Start and stop background workers
//! queuectl worker start --count 3
//! queuectl worker stop
//!
//! # Inspect the queue and the dead-letter queue
//! queuectl status
//! queuectl list --state pending
//! queuectl dlq list
//! queuectl dlq retry job1
//!
//! # Tune retries
//! queuectl config set max_retries 5
//! ```

use anyhow::Result;
use clap::{Parser, Subcommand};
use colored::Colorize;
use std::path::PathBuf;
use std::sync::Arc;

mod commands;
mod settings;
mod supervisor;

use commands::{config, dlq, enqueue, list, status, worker};
use queuectl_persist::SqliteQueueStore;
use queuectl_queue::JobQueue;
use settings::Settings;

/// queuectl - background job queue with retries and a dead-letter queue
#[derive(Parser)]
#[command(
    name = "queuectl",
    version,
    about = "CLI-based background job queue",
    long_about = "queuectl runs shell commands as background jobs.\n\n\
                  Failed jobs are retried with exponential backoff and moved\n\
                  to a dead-letter queue once their retries are exhausted."
)]
struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// SQLite database file (overrides queuectl.toml and QUEUECTL_DATABASE)
    #[arg(long, global = true)]
    database: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Add a new job to the queue
    #[command(name = "enqueue")]
    Enqueue(enqueue::EnqueueArgs),

    /// Manage workers
    #[command(name = "worker")]
    Worker(worker::WorkerArgs),

    /// Show job counts per state and active workers
    #[command(name = "status")]
    Status(status::StatusArgs),

    /// List jobs, optionally filtered by state
    #[command(name = "list")]
    List(list::ListArgs),

    /// Manage the dead-letter queue
    #[command(name = "dlq")]
    Dlq(dlq::DlqArgs),

    /// Manage configuration
    #[command(name = "config")]
    Config(config::ConfigArgs),
}

/// Shared state handed to every command
pub struct AppContext {
    pub settings: Settings,
    pub verbose: u8,
}

impl AppContext {
    /// Open (and migrate) the shared database
    pub async fn open_store(&self) -> Result<Arc<SqliteQueueStore>> {
        let store = SqliteQueueStore::open(&self.settings.sqlite_config()).await?;
        Ok(Arc::new(store))
    }

    pub async fn queue(&self) -> Result<JobQueue<SqliteQueueStore>> {
        Ok(JobQueue::new(self.open_store().await?))
    }

    pub fn supervisor(&self) -> supervisor::Supervisor {
        supervisor::Supervisor::new(&self.settings.pid_dir)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup tracing based on verbosity
    setup_logging(cli.verbose);

    let ctx = AppContext {
        settings: Settings::load(cli.database.as_deref())?,
        verbose: cli.verbose,
    };

    // Execute command
    match cli.command {
        Commands::Enqueue(args) => enqueue::run(&ctx, args).await,
        Commands::Worker(args) => worker::run(&ctx, args).await,
        Commands::Status(args) => status::run(&ctx, args).await,
        Commands::List(args) => list::run(&ctx, args).await,
        Commands::Dlq(args) => dlq::run(&ctx, args).await,
        Commands::Config(args) => config::run(&ctx, args).await,
    }
}

/// Setup logging based on verbosity level
fn setup_logging(verbosity: u8) {
    use tracing_subscriber::EnvFilter;

    let filter = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Print a success message with a checkmark
pub fn print_success(msg: &str) {
    println!("{} {}", "✓".green().bold(), msg);
}

/// Print an error message with an X
pub fn print_error(msg: &str) {
    eprintln!("{} {}", "✗".red().bold(), msg);
}

/// Print an info message
pub fn print_info(msg: &str) {
    println!("{} {}", "ℹ".blue().bold(), msg);
}
