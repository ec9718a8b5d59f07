//! Process settings: where the database and worker PID files live

use anyhow::{Context, Result};
use config::{Config, Environment, File};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use queuectl_persist::SqliteConfig;

/// Resolved from defaults, `queuectl.toml`, `QUEUECTL_*` env vars and flags
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    /// SQLite database file shared by all workers
    pub database: PathBuf,
    /// Directory holding one `<pid>.pid` file per started worker
    pub pid_dir: PathBuf,
}

impl Settings {
    pub fn load(database_override: Option<&Path>) -> Result<Self> {
        Self::load_from(Path::new("queuectl"), database_override)
    }

    /// `file_stem` names an optional config file (any format `config` reads)
    pub fn load_from(file_stem: &Path, database_override: Option<&Path>) -> Result<Self> {
        let default_pid_dir = std::env::temp_dir().join("queuectl_pids");

        let mut builder = Config::builder()
            .set_default("database", "queue.db")?
            .set_default("pid_dir", default_pid_dir.to_string_lossy().into_owned())?
            .add_source(File::with_name(&file_stem.to_string_lossy()).required(false))
            .add_source(Environment::with_prefix("QUEUECTL"));

        if let Some(database) = database_override {
            builder = builder.set_override("database", database.to_string_lossy().into_owned())?;
        }

        builder
            .build()
            .and_then(|c| c.try_deserialize())
            .context("Failed to load queuectl settings")
    }

    pub fn sqlite_config(&self) -> SqliteConfig {
        SqliteConfig::file(&self.database)
    }
}
