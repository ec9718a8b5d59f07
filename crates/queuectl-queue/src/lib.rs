//! # queuectl queue
//!
//! Job lifecycle engine for a persistent, at-least-once shell job queue.
//!
//! Features:
//! - `QueueStore` contract with an atomic dequeue primitive
//! - Retry with exponential backoff and jitter, then dead-lettering
//! - Worker loop with bounded command timeout and cooperative shutdown
//! - In-memory store (tests, embedding); SQLite lives in `queuectl-persist`

pub mod backend;
pub mod clock;
pub mod config;
pub mod control;
pub mod executor;
pub mod job;
pub mod memory;
pub mod policy;
pub mod worker;

pub use backend::{QueueError, QueueStore};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::ConfigKey;
pub use control::JobQueue;
pub use executor::{CommandExecutor, CommandOutcome, ShellExecutor};
pub use job::{JobEntry, JobId, JobState, NewJob, StatusSummary};
pub use memory::MemoryQueue;
pub use policy::{Disposition, RetryPolicy};
pub use worker::{Tick, Worker, WorkerConfig};
