//! Worker execution loop

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::backend::{QueueError, QueueStore};
use crate::clock::{Clock, SystemClock};
use crate::config::ConfigKey;
use crate::executor::{CommandExecutor, CommandOutcome, ShellExecutor};
use crate::job::JobEntry;
use crate::policy::{Disposition, RetryPolicy};

#[derive(Debug, Clone, Copy)]
pub struct WorkerConfig {
    /// Sleep between polls when the queue has nothing eligible
    pub poll_interval: Duration,
    /// Wall-clock limit for a single command
    pub job_timeout: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            job_timeout: Duration::from_secs(300),
        }
    }
}

/// Longest wait between attempts to record an outcome, in poll intervals
const MAX_RECORD_BACKOFF_STEPS: u32 = 10;

/// Store write decided for a finished job
#[derive(Debug, Clone, Copy)]
enum Transition {
    Complete,
    DeadLetter { attempts: u32 },
    Retry { attempts: u32, run_at: DateTime<Utc> },
}

/// What a single poll cycle did
#[derive(Debug, Clone, PartialEq)]
pub enum Tick {
    /// Nothing eligible (or the store was busy)
    Idle,
    /// A job was executed and its outcome recorded
    Processed { job_id: String, outcome: CommandOutcome },
}

/// One worker: poll the store, run the command, record the outcome.
///
/// Workers share nothing in memory; several of them (in one process or many)
/// coordinate only through the store's atomic dequeue.
pub struct Worker<S: QueueStore + ?Sized> {
    store: Arc<S>,
    executor: Arc<dyn CommandExecutor>,
    clock: Arc<dyn Clock>,
    config: WorkerConfig,
    shutdown: CancellationToken,
    name: String,
}

impl<S: QueueStore + ?Sized> Worker<S> {
    pub fn new(store: Arc<S>, config: WorkerConfig, shutdown: CancellationToken) -> Self {
        Self {
            store,
            executor: Arc::new(ShellExecutor::new()),
            clock: Arc::new(SystemClock),
            config,
            shutdown,
            name: format!("worker-{}", std::process::id()),
        }
    }

    pub fn with_executor(mut self, executor: Arc<dyn CommandExecutor>) -> Self {
        self.executor = executor;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Token that requests a cooperative shutdown of this worker
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Run until shutdown is requested. An in-flight job is always finished
    /// and recorded before the loop exits. Returns the number of jobs handled.
    pub async fn run(&self) -> u64 {
        info!(worker = %self.name, "Worker started");
        let mut handled = 0u64;

        while !self.shutdown.is_cancelled() {
            match self.run_once().await {
                Ok(Tick::Processed { .. }) => handled += 1,
                Ok(Tick::Idle) => {
                    if self.shutdown.is_cancelled() {
                        break;
                    }
                    self.idle().await;
                }
                Err(e) => {
                    error!(worker = %self.name, error = %e, "Queue error");
                    self.idle().await;
                }
            }
        }

        info!(worker = %self.name, jobs = handled, "Worker shutting down");
        handled
    }

    /// One poll cycle. The outcome of a claimed job is written back before
    /// this returns; transient store errors are retried, never dropped.
    pub async fn run_once(&self) -> Result<Tick, QueueError> {
        let Some(job) = self.store.dequeue_next().await? else {
            return Ok(Tick::Idle);
        };

        info!(worker = %self.name, job_id = %job.id, attempts = job.attempts, "Processing job");
        let outcome = self
            .executor
            .execute(&job.command, self.config.job_timeout)
            .await;

        let transition = self.decide(&job, &outcome).await;
        if let Err(e) = self.persist(&job.id, &transition).await {
            error!(job_id = %job.id, error = %e, "Job outcome rejected by the store");
        }

        Ok(Tick::Processed {
            job_id: job.id,
            outcome,
        })
    }

    async fn decide(&self, job: &JobEntry, outcome: &CommandOutcome) -> Transition {
        match outcome {
            CommandOutcome::Success => {
                info!(job_id = %job.id, "Job completed successfully");
                return Transition::Complete;
            }
            CommandOutcome::NonZeroExit { code, stderr } => {
                warn!(job_id = %job.id, exit_code = ?code, stderr = %stderr, "Job failed");
            }
            CommandOutcome::Timeout => {
                warn!(
                    job_id = %job.id,
                    timeout_secs = self.config.job_timeout.as_secs(),
                    "Job timed out"
                );
            }
            CommandOutcome::ExecutionError(e) => {
                warn!(job_id = %job.id, error = %e, "Job execution error");
            }
        }

        let policy = RetryPolicy::new(self.backoff_base().await);
        match policy.decide(job.attempts, job.max_retries) {
            Disposition::DeadLetter { attempts } => {
                warn!(job_id = %job.id, attempts, "Job moved to DLQ after exhausting retries");
                Transition::DeadLetter { attempts }
            }
            Disposition::Retry { delay, attempts } => {
                let backoff =
                    ChronoDuration::from_std(delay).unwrap_or_else(|_| ChronoDuration::days(30));
                info!(
                    job_id = %job.id,
                    attempt = attempts,
                    delay_secs = delay.as_secs_f64(),
                    "Job failed, scheduling retry with backoff"
                );
                Transition::Retry {
                    attempts,
                    run_at: self.clock.now() + backoff,
                }
            }
        }
    }

    /// Write `transition` until the store accepts or rejects it. The job is
    /// still ours while this runs, so shutdown is not observed here.
    async fn persist(&self, id: &str, transition: &Transition) -> Result<(), QueueError> {
        let mut retries = 0u32;
        loop {
            let result = match *transition {
                Transition::Complete => self.store.record_success(id).await,
                Transition::DeadLetter { attempts } => {
                    self.store.record_failure_terminal(id, attempts).await
                }
                Transition::Retry { attempts, run_at } => {
                    self.store.record_failure_retry(id, attempts, run_at).await
                }
            };
            match result {
                Err(e) if e.is_retryable() => {
                    retries = retries.saturating_add(1);
                    let wait = self.config.poll_interval * retries.min(MAX_RECORD_BACKOFF_STEPS);
                    warn!(
                        job_id = %id,
                        error = %e,
                        retries,
                        "Could not record job outcome, retrying"
                    );
                    tokio::time::sleep(wait).await;
                }
                other => return other,
            }
        }
    }

    /// Read on every failure; config may change while the worker runs
    async fn backoff_base(&self) -> u32 {
        match self.store.get_config(ConfigKey::BackoffBase).await {
            Ok(stored) => ConfigKey::BackoffBase.resolve(stored.as_deref()),
            Err(e) => {
                warn!(error = %e, "Could not read backoff_base, using default");
                ConfigKey::BackoffBase.default_value()
            }
        }
    }

    async fn idle(&self) {
        debug!(worker = %self.name, "Queue empty");
        tokio::select! {
            _ = tokio::time::sleep(self.config.poll_interval) => {}
            _ = self.shutdown.cancelled() => {}
        }
    }
}
