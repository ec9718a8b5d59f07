//! In-memory queue store

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::backend::{QueueError, QueueStore};
use crate::clock::{Clock, SystemClock};
use crate::config::ConfigKey;
use crate::job::{JobEntry, JobState, StatusSummary};

#[derive(Debug, Default)]
struct Inner {
    jobs: HashMap<String, JobEntry>,
    config: HashMap<ConfigKey, String>,
}

/// Store kept in process memory.
///
/// A single mutex serializes every operation, so dequeue is atomic across
/// tasks sharing the same instance (but not across processes).
pub struct MemoryQueue {
    inner: Mutex<Inner>,
    clock: Arc<dyn Clock>,
}

impl MemoryQueue {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        let config = ConfigKey::ALL
            .iter()
            .map(|key| (*key, key.default_value().to_string()))
            .collect();
        Self {
            inner: Mutex::new(Inner {
                jobs: HashMap::new(),
                config,
            }),
            clock,
        }
    }

    fn sorted(mut jobs: Vec<JobEntry>) -> Vec<JobEntry> {
        jobs.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        jobs
    }
}

impl Default for MemoryQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl Inner {
    fn job_mut(&mut self, id: &str) -> Result<&mut JobEntry, QueueError> {
        self.jobs
            .get_mut(id)
            .ok_or_else(|| QueueError::NotFound(id.to_string()))
    }

    /// Shared guard for the two failure transitions
    fn processing_job(
        &mut self,
        id: &str,
        attempts: u32,
        to: JobState,
    ) -> Result<&mut JobEntry, QueueError> {
        let job = self.job_mut(id)?;
        QueueError::check_transition(id, job.state, to)?;
        if attempts < job.attempts {
            return Err(QueueError::Validation(format!(
                "attempts for '{}' cannot decrease from {} to {}",
                id, job.attempts, attempts
            )));
        }
        Ok(job)
    }
}

#[async_trait]
impl QueueStore for MemoryQueue {
    async fn create_job(
        &self,
        id: &str,
        command: &str,
        max_retries: Option<u32>,
    ) -> Result<(), QueueError> {
        let mut inner = self.inner.lock().await;
        if inner.jobs.contains_key(id) {
            return Err(QueueError::DuplicateId(id.to_string()));
        }

        let max_retries = max_retries.unwrap_or_else(|| {
            let stored = inner.config.get(&ConfigKey::MaxRetries).map(String::as_str);
            ConfigKey::MaxRetries.resolve(stored)
        });
        let entry = JobEntry::new(id, command, max_retries, self.clock.now());
        inner.jobs.insert(id.to_string(), entry);
        Ok(())
    }

    async fn dequeue_next(&self) -> Result<Option<JobEntry>, QueueError> {
        let mut inner = self.inner.lock().await;
        let now = self.clock.now();

        let next_id = inner
            .jobs
            .values()
            .filter(|job| job.is_eligible(now))
            .min_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)))
            .map(|job| job.id.clone());

        let Some(id) = next_id else {
            return Ok(None);
        };

        let job = inner.job_mut(&id)?;
        let claimed = job.clone();
        job.state = JobState::Processing;
        job.updated_at = now;
        Ok(Some(claimed))
    }

    async fn record_success(&self, id: &str) -> Result<(), QueueError> {
        let now = self.clock.now();
        let mut inner = self.inner.lock().await;
        let job = inner.job_mut(id)?;
        QueueError::check_transition(id, job.state, JobState::Completed)?;
        if job.state != JobState::Completed {
            job.state = JobState::Completed;
            job.updated_at = now;
        }
        Ok(())
    }

    async fn record_failure_terminal(&self, id: &str, attempts: u32) -> Result<(), QueueError> {
        let now = self.clock.now();
        let mut inner = self.inner.lock().await;
        let job = inner.processing_job(id, attempts, JobState::Dead)?;
        job.state = JobState::Dead;
        job.attempts = attempts;
        job.updated_at = now;
        Ok(())
    }

    async fn record_failure_retry(
        &self,
        id: &str,
        attempts: u32,
        run_at: DateTime<Utc>,
    ) -> Result<(), QueueError> {
        let now = self.clock.now();
        let mut inner = self.inner.lock().await;
        let job = inner.processing_job(id, attempts, JobState::Pending)?;
        job.state = JobState::Pending;
        job.attempts = attempts;
        job.run_at = Some(run_at);
        job.updated_at = now;

        tracing::debug!(job_id = %id, attempts, run_at = %run_at, "Re-queued job with backoff");
        Ok(())
    }

    async fn reset_from_dead(&self, id: &str) -> Result<bool, QueueError> {
        let now = self.clock.now();
        let mut inner = self.inner.lock().await;
        match inner.jobs.get_mut(id) {
            Some(job) if job.state == JobState::Dead => {
                job.state = JobState::Pending;
                job.attempts = 0;
                job.run_at = None;
                job.updated_at = now;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn get_job(&self, id: &str) -> Result<Option<JobEntry>, QueueError> {
        Ok(self.inner.lock().await.jobs.get(id).cloned())
    }

    async fn list_by_state(&self, state: JobState) -> Result<Vec<JobEntry>, QueueError> {
        let inner = self.inner.lock().await;
        let jobs = inner
            .jobs
            .values()
            .filter(|job| job.state == state)
            .cloned()
            .collect();
        Ok(Self::sorted(jobs))
    }

    async fn counts_by_state(&self) -> Result<StatusSummary, QueueError> {
        let inner = self.inner.lock().await;
        let mut summary = StatusSummary::default();
        for job in inner.jobs.values() {
            summary.add(job.state, 1);
        }
        Ok(summary)
    }

    async fn get_config(&self, key: ConfigKey) -> Result<Option<String>, QueueError> {
        Ok(self.inner.lock().await.config.get(&key).cloned())
    }

    async fn set_config(&self, key: ConfigKey, value: &str) -> Result<(), QueueError> {
        self.inner.lock().await.config.insert(key, value.to_string());
        Ok(())
    }
}
