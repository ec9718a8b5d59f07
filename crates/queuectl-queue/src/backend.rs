//! Queue Backend Trait

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::config::ConfigKey;
use crate::job::{JobEntry, JobState, StatusSummary};

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("Validation error: {0}")]
    Validation(String),
    #[error("Job with id '{0}' already exists")]
    DuplicateId(String),
    #[error("Job not found: {0}")]
    NotFound(String),
    #[error("Job '{id}' cannot move from {from} to {to}")]
    InvalidTransition {
        id: String,
        from: JobState,
        to: JobState,
    },
    #[error("Backend error: {0}")]
    Backend(String),
}

impl QueueError {
    /// Storage-level failure that may succeed when tried again. Rejections
    /// (`NotFound`, `InvalidTransition`, ...) never will.
    pub fn is_retryable(&self) -> bool {
        matches!(self, QueueError::Backend(_))
    }

    /// Reject a write that the lifecycle graph does not allow
    pub fn check_transition(
        id: &str,
        from: JobState,
        to: JobState,
    ) -> Result<(), QueueError> {
        if from.can_transition_to(to) {
            Ok(())
        } else {
            Err(QueueError::InvalidTransition {
                id: id.to_string(),
                from,
                to,
            })
        }
    }
}

/// Durable store contract.
///
/// Every mutation of a job goes through one of these calls, and each call is
/// atomic. Implementations must guarantee that at most one caller claims a
/// given job through [`QueueStore::dequeue_next`], even when the callers are
/// separate processes sharing the same store.
#[async_trait]
pub trait QueueStore: Send + Sync {
    /// Insert a pending job. `max_retries` defaults from the `max_retries`
    /// config value read at creation time.
    async fn create_job(
        &self,
        id: &str,
        command: &str,
        max_retries: Option<u32>,
    ) -> Result<(), QueueError>;

    /// Claim the oldest eligible job, marking it `processing`.
    /// Returns the row as it was before the claim (state `pending`).
    async fn dequeue_next(&self) -> Result<Option<JobEntry>, QueueError>;

    /// `processing -> completed`; repeating it on a completed job is a no-op
    async fn record_success(&self, id: &str) -> Result<(), QueueError>;

    /// `processing -> dead` with the final attempt count
    async fn record_failure_terminal(&self, id: &str, attempts: u32) -> Result<(), QueueError>;

    /// `processing -> pending`, not eligible again until `run_at`
    async fn record_failure_retry(
        &self,
        id: &str,
        attempts: u32,
        run_at: DateTime<Utc>,
    ) -> Result<(), QueueError>;

    /// `dead -> pending` with attempts and `run_at` cleared.
    /// Returns false without touching anything if the job is missing or not dead.
    async fn reset_from_dead(&self, id: &str) -> Result<bool, QueueError>;

    /// Fetch a single job
    async fn get_job(&self, id: &str) -> Result<Option<JobEntry>, QueueError>;

    /// Jobs in `state`, oldest first
    async fn list_by_state(&self, state: JobState) -> Result<Vec<JobEntry>, QueueError>;

    /// Count of jobs per state
    async fn counts_by_state(&self) -> Result<StatusSummary, QueueError>;

    /// Raw stored config value
    async fn get_config(&self, key: ConfigKey) -> Result<Option<String>, QueueError>;

    /// Overwrite a config value
    async fn set_config(&self, key: ConfigKey, value: &str) -> Result<(), QueueError>;
}
