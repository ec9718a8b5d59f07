//! Config command - Read and change queue tunables
//!
//! Usage:
//! ```bash
//! queuectl config get max_retries
//! queuectl config set backoff_base 3
//! ```

use anyhow::{bail, Result};
use clap::{Args, Subcommand};

use crate::AppContext;

/// Arguments for the config command
#[derive(Args)]
pub struct ConfigArgs {
    #[command(subcommand)]
    command: ConfigCommand,
}

#[derive(Subcommand)]
pub enum ConfigCommand {
    /// Get a configuration value
    #[command(name = "get")]
    Get {
        /// max_retries or backoff_base
        key: String,
    },

    /// Set a configuration value
    #[command(name = "set")]
    Set {
        /// max_retries or backoff_base
        key: String,
        /// Non-negative integer
        value: String,
    },
}

/// Run the config command
pub async fn run(ctx: &AppContext, args: ConfigArgs) -> Result<()> {
    let queue = ctx.queue().await?;
    match args.command {
        ConfigCommand::Get { key } => match queue.config_get(&key).await? {
            Some(value) => {
                println!("{} = {}", key, value);
                Ok(())
            }
            None => bail!("Config key '{}' not found", key),
        },
        ConfigCommand::Set { key, value } => {
            queue.config_set(&key, &value).await?;
            crate::print_success(&format!("Config '{}' set to '{}'.", key, value.trim()));
            Ok(())
        }
    }
}
