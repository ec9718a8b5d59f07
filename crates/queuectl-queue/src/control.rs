//! Operations exposed to producers and operator tooling

use std::sync::Arc;
use tracing::info;

use crate::backend::{QueueError, QueueStore};
use crate::config::ConfigKey;
use crate::job::{JobEntry, JobState, NewJob, StatusSummary};

/// Validating front door over a [`QueueStore`]
pub struct JobQueue<S: QueueStore + ?Sized> {
    store: Arc<S>,
}

impl<S: QueueStore + ?Sized> Clone for JobQueue<S> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
        }
    }
}

impl<S: QueueStore + ?Sized> JobQueue<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Add a job. Rejects empty id/command and ids that already exist.
    pub async fn enqueue(&self, job: NewJob) -> Result<(), QueueError> {
        job.validate()?;
        self.store
            .create_job(&job.id, &job.command, job.max_retries)
            .await?;
        info!(job_id = %job.id, "Job enqueued");
        Ok(())
    }

    /// Jobs in one state, or every job grouped by state
    /// (pending, processing, completed, dead) when `state` is `None`
    pub async fn list_jobs(&self, state: Option<JobState>) -> Result<Vec<JobEntry>, QueueError> {
        match state {
            Some(state) => self.store.list_by_state(state).await,
            None => {
                let mut jobs = Vec::new();
                for state in JobState::ALL {
                    jobs.extend(self.store.list_by_state(state).await?);
                }
                Ok(jobs)
            }
        }
    }

    pub async fn status_summary(&self) -> Result<StatusSummary, QueueError> {
        self.store.counts_by_state().await
    }

    pub async fn get_job(&self, id: &str) -> Result<Option<JobEntry>, QueueError> {
        self.store.get_job(id).await
    }

    pub async fn dlq_list(&self) -> Result<Vec<JobEntry>, QueueError> {
        self.store.list_by_state(JobState::Dead).await
    }

    /// Re-queue a dead job. False if it is missing or not dead.
    pub async fn dlq_retry(&self, id: &str) -> Result<bool, QueueError> {
        let reset = self.store.reset_from_dead(id).await?;
        if reset {
            info!(job_id = %id, "Job re-queued from DLQ");
        }
        Ok(reset)
    }

    /// Unknown keys are rejected before reaching the store
    pub async fn config_get(&self, key: &str) -> Result<Option<String>, QueueError> {
        let key: ConfigKey = key.parse()?;
        self.store.get_config(key).await
    }

    pub async fn config_set(&self, key: &str, value: &str) -> Result<(), QueueError> {
        let key: ConfigKey = key.parse()?;
        let value = key.validate(value)?;
        self.store.set_config(key, &value.to_string()).await?;
        info!(key = %key, value, "Config updated");
        Ok(())
    }
}
