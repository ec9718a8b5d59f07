//! # queuectl persistence
//!
//! Durable store for the job queue: a single SQLite file shared by every
//! worker process, with the schema managed by embedded migrations.

pub mod queue;
pub mod sqlite;

pub use queue::SqliteQueueStore;
pub use sqlite::{connect, SqliteConfig};
