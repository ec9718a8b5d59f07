//! Worker loop tests against the in-memory store

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use queuectl_queue::{
    Clock, CommandExecutor, CommandOutcome, ConfigKey, JobEntry, JobState, ManualClock, MemoryQueue,
    QueueError, QueueStore, StatusSummary, Tick, Worker, WorkerConfig,
};

/// Replays canned outcomes and counts executions
struct ScriptedExecutor {
    outcomes: Mutex<VecDeque<CommandOutcome>>,
    fallback: CommandOutcome,
    calls: AtomicU32,
}

impl ScriptedExecutor {
    fn always(outcome: CommandOutcome) -> Self {
        Self {
            outcomes: Mutex::new(VecDeque::new()),
            fallback: outcome,
            calls: AtomicU32::new(0),
        }
    }

    fn sequence(outcomes: Vec<CommandOutcome>) -> Self {
        Self {
            outcomes: Mutex::new(outcomes.into()),
            fallback: CommandOutcome::Success,
            calls: AtomicU32::new(0),
        }
    }
}

#[async_trait]
impl CommandExecutor for ScriptedExecutor {
    async fn execute(&self, _command: &str, _timeout: Duration) -> CommandOutcome {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.outcomes
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone())
    }
}

fn failure() -> CommandOutcome {
    CommandOutcome::NonZeroExit {
        code: Some(1),
        stderr: "boom".to_string(),
    }
}

fn setup(
    executor: ScriptedExecutor,
) -> (Arc<MemoryQueue>, Worker<MemoryQueue>, ManualClock, Arc<ScriptedExecutor>) {
    let clock = ManualClock::default();
    let store = Arc::new(MemoryQueue::with_clock(Arc::new(clock.clone())));
    let executor = Arc::new(executor);
    let worker = Worker::new(store.clone(), WorkerConfig::default(), CancellationToken::new())
        .with_executor(executor.clone())
        .with_clock(Arc::new(clock.clone()));
    (store, worker, clock, executor)
}

#[tokio::test]
async fn test_worker_config_defaults() {
    let config = WorkerConfig::default();
    assert_eq!(config.poll_interval, Duration::from_secs(1));
    assert_eq!(config.job_timeout, Duration::from_secs(300));
}

#[tokio::test]
async fn test_success_completes_job() {
    let (store, worker, _clock, _) = setup(ScriptedExecutor::always(CommandOutcome::Success));
    store.create_job("j1", "echo hi", None).await.unwrap();

    let tick = worker.run_once().await.unwrap();
    assert_eq!(
        tick,
        Tick::Processed {
            job_id: "j1".into(),
            outcome: CommandOutcome::Success
        }
    );

    let job = store.get_job("j1").await.unwrap().unwrap();
    assert_eq!(job.state, JobState::Completed);
    assert_eq!(job.attempts, 0);
}

#[tokio::test]
async fn test_empty_queue_is_idle() {
    let (_store, worker, _clock, executor) =
        setup(ScriptedExecutor::always(CommandOutcome::Success));
    assert_eq!(worker.run_once().await.unwrap(), Tick::Idle);
    assert_eq!(executor.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_failure_then_dead_letter() {
    let (store, worker, clock, _) = setup(ScriptedExecutor::always(failure()));
    store.create_job("j1", "exit 1", Some(2)).await.unwrap();
    let start = clock.now();

    // First failure: back to pending with backoff of 2^1 s ± 10%
    worker.run_once().await.unwrap();
    let job = store.get_job("j1").await.unwrap().unwrap();
    assert_eq!(job.state, JobState::Pending);
    assert_eq!(job.attempts, 1);
    let run_at = job.run_at.expect("retry should set run_at");
    assert!(run_at >= start + ChronoDuration::milliseconds(1800));
    assert!(run_at <= start + ChronoDuration::milliseconds(2200));

    // Not eligible until the backoff elapses
    assert_eq!(worker.run_once().await.unwrap(), Tick::Idle);
    clock.advance(ChronoDuration::seconds(3));

    // Second failure: retries exhausted
    worker.run_once().await.unwrap();
    let job = store.get_job("j1").await.unwrap().unwrap();
    assert_eq!(job.state, JobState::Dead);
    assert_eq!(job.attempts, 2);
}

#[tokio::test]
async fn test_timeout_and_launch_errors_take_the_failure_path() {
    let (store, worker, clock, _) = setup(ScriptedExecutor::sequence(vec![
        CommandOutcome::Timeout,
        CommandOutcome::ExecutionError("no such file".into()),
    ]));
    store.create_job("j1", "sleep 999", Some(3)).await.unwrap();

    worker.run_once().await.unwrap();
    assert_eq!(store.get_job("j1").await.unwrap().unwrap().attempts, 1);

    clock.advance(ChronoDuration::seconds(10));
    worker.run_once().await.unwrap();
    let job = store.get_job("j1").await.unwrap().unwrap();
    assert_eq!(job.attempts, 2);
    assert_eq!(job.state, JobState::Pending);
}

#[tokio::test]
async fn test_backoff_base_read_at_failure_time() {
    let (store, worker, clock, _) = setup(ScriptedExecutor::always(failure()));
    store.create_job("j1", "exit 1", Some(5)).await.unwrap();
    store.set_config(ConfigKey::BackoffBase, "10").await.unwrap();
    let start = clock.now();

    worker.run_once().await.unwrap();
    let run_at = store.get_job("j1").await.unwrap().unwrap().run_at.unwrap();
    assert!(run_at >= start + ChronoDuration::seconds(9));
    assert!(run_at <= start + ChronoDuration::seconds(11));
}

#[tokio::test]
async fn test_max_retries_zero_dead_letters_immediately() {
    let (store, worker, _clock, _) = setup(ScriptedExecutor::always(failure()));
    store.create_job("j1", "exit 1", Some(0)).await.unwrap();

    worker.run_once().await.unwrap();
    let job = store.get_job("j1").await.unwrap().unwrap();
    assert_eq!(job.state, JobState::Dead);
    assert_eq!(job.attempts, 1);
}

#[tokio::test]
async fn test_pre_cancelled_worker_never_dequeues() {
    let (store, worker, _clock, executor) =
        setup(ScriptedExecutor::always(CommandOutcome::Success));
    store.create_job("j1", "true", None).await.unwrap();

    worker.shutdown_token().cancel();
    let handled = worker.run().await;

    assert_eq!(handled, 0);
    assert_eq!(executor.calls.load(Ordering::SeqCst), 0);
    let job = store.get_job("j1").await.unwrap().unwrap();
    assert_eq!(job.state, JobState::Pending);
}

/// Blocks until released, so a test can cancel while a job is in flight
struct GatedExecutor {
    started: tokio::sync::Notify,
    release: tokio::sync::Notify,
}

#[async_trait]
impl CommandExecutor for GatedExecutor {
    async fn execute(&self, _command: &str, _timeout: Duration) -> CommandOutcome {
        self.started.notify_one();
        self.release.notified().await;
        CommandOutcome::Success
    }
}

#[tokio::test]
async fn test_shutdown_drains_in_flight_job() {
    let store = Arc::new(MemoryQueue::new());
    store.create_job("j1", "long", None).await.unwrap();
    store.create_job("j2", "long", None).await.unwrap();

    let executor = Arc::new(GatedExecutor {
        started: tokio::sync::Notify::new(),
        release: tokio::sync::Notify::new(),
    });
    let token = CancellationToken::new();
    let worker = Worker::new(store.clone(), WorkerConfig::default(), token.clone())
        .with_executor(executor.clone());

    let handle = tokio::spawn(async move { worker.run().await });

    executor.started.notified().await;
    token.cancel();
    executor.release.notify_one();

    let handled = handle.await.unwrap();
    assert_eq!(handled, 1);

    // The claimed job was finished; the other was never touched
    let states: Vec<_> = store
        .list_by_state(JobState::Completed)
        .await
        .unwrap()
        .into_iter()
        .map(|j| j.id)
        .collect();
    assert_eq!(states.len(), 1);
    assert_eq!(store.counts_by_state().await.unwrap().pending, 1);
}

#[tokio::test]
async fn test_idle_worker_stops_promptly_on_cancel() {
    let store = Arc::new(MemoryQueue::new());
    let token = CancellationToken::new();
    let config = WorkerConfig {
        poll_interval: Duration::from_secs(60),
        ..Default::default()
    };
    let worker = Worker::new(store, config, token.clone());

    let handle = tokio::spawn(async move { worker.run().await });
    tokio::time::sleep(Duration::from_millis(50)).await;
    token.cancel();

    let handled = tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("worker should stop without waiting out the poll interval")
        .unwrap();
    assert_eq!(handled, 0);
}

#[tokio::test]
async fn test_concurrent_workers_never_share_a_job() {
    let store = Arc::new(MemoryQueue::new());
    for i in 0..20 {
        store.create_job(&format!("job-{i:02}"), "true", None).await.unwrap();
    }

    let executor = Arc::new(ScriptedExecutor::always(CommandOutcome::Success));
    let mut handles = Vec::new();
    for n in 0..4 {
        let worker = Worker::new(store.clone(), WorkerConfig::default(), CancellationToken::new())
            .with_executor(executor.clone())
            .with_name(format!("w{n}"));
        handles.push(tokio::spawn(async move {
            let mut handled = 0;
            while let Tick::Processed { .. } = worker.run_once().await.unwrap() {
                handled += 1;
            }
            handled
        }));
    }

    let mut total = 0;
    for h in handles {
        total += h.await.unwrap();
    }
    assert_eq!(total, 20);
    assert_eq!(executor.calls.load(Ordering::SeqCst), 20);
    assert_eq!(store.counts_by_state().await.unwrap().completed, 20);
}

/// Fails outcome writes with queued errors before delegating
struct FlakyStore {
    inner: MemoryQueue,
    errors: Mutex<VecDeque<QueueError>>,
    writes: AtomicU32,
}

impl FlakyStore {
    fn new(inner: MemoryQueue, errors: Vec<QueueError>) -> Self {
        Self {
            inner,
            errors: Mutex::new(errors.into()),
            writes: AtomicU32::new(0),
        }
    }

    fn write(&self) -> Result<(), QueueError> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        match self.errors.lock().unwrap().pop_front() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl QueueStore for FlakyStore {
    async fn create_job(
        &self,
        id: &str,
        command: &str,
        max_retries: Option<u32>,
    ) -> Result<(), QueueError> {
        self.inner.create_job(id, command, max_retries).await
    }

    async fn dequeue_next(&self) -> Result<Option<JobEntry>, QueueError> {
        self.inner.dequeue_next().await
    }

    async fn record_success(&self, id: &str) -> Result<(), QueueError> {
        self.write()?;
        self.inner.record_success(id).await
    }

    async fn record_failure_terminal(&self, id: &str, attempts: u32) -> Result<(), QueueError> {
        self.write()?;
        self.inner.record_failure_terminal(id, attempts).await
    }

    async fn record_failure_retry(
        &self,
        id: &str,
        attempts: u32,
        run_at: DateTime<Utc>,
    ) -> Result<(), QueueError> {
        self.write()?;
        self.inner.record_failure_retry(id, attempts, run_at).await
    }

    async fn reset_from_dead(&self, id: &str) -> Result<bool, QueueError> {
        self.inner.reset_from_dead(id).await
    }

    async fn get_job(&self, id: &str) -> Result<Option<JobEntry>, QueueError> {
        self.inner.get_job(id).await
    }

    async fn list_by_state(&self, state: JobState) -> Result<Vec<JobEntry>, QueueError> {
        self.inner.list_by_state(state).await
    }

    async fn counts_by_state(&self) -> Result<StatusSummary, QueueError> {
        self.inner.counts_by_state().await
    }

    async fn get_config(&self, key: ConfigKey) -> Result<Option<String>, QueueError> {
        self.inner.get_config(key).await
    }

    async fn set_config(&self, key: ConfigKey, value: &str) -> Result<(), QueueError> {
        self.inner.set_config(key, value).await
    }
}

fn locked() -> QueueError {
    QueueError::Backend("database is locked".into())
}

fn flaky_setup(
    outcome: CommandOutcome,
    errors: Vec<QueueError>,
) -> (Arc<FlakyStore>, Worker<FlakyStore>, ManualClock) {
    let clock = ManualClock::default();
    let store = Arc::new(FlakyStore::new(
        MemoryQueue::with_clock(Arc::new(clock.clone())),
        errors,
    ));
    let worker = Worker::new(store.clone(), WorkerConfig::default(), CancellationToken::new())
        .with_executor(Arc::new(ScriptedExecutor::always(outcome)))
        .with_clock(Arc::new(clock.clone()));
    (store, worker, clock)
}

#[tokio::test(start_paused = true)]
async fn test_success_is_recorded_after_store_lock_clears() {
    let (store, worker, _clock) = flaky_setup(CommandOutcome::Success, vec![locked()]);
    store.create_job("j1", "true", None).await.unwrap();

    let tick = worker.run_once().await.unwrap();
    assert!(matches!(tick, Tick::Processed { .. }));

    let job = store.get_job("j1").await.unwrap().unwrap();
    assert_eq!(job.state, JobState::Completed);
    assert_eq!(store.writes.load(Ordering::SeqCst), 2);
    assert_eq!(worker.run_once().await.unwrap(), Tick::Idle);
}

#[tokio::test(start_paused = true)]
async fn test_retry_decision_survives_repeated_lock_errors() {
    let errors = (0..5).map(|_| locked()).collect();
    let (store, worker, clock) = flaky_setup(failure(), errors);
    store.create_job("j1", "exit 1", Some(3)).await.unwrap();
    let start = clock.now();

    worker.run_once().await.unwrap();

    let job = store.get_job("j1").await.unwrap().unwrap();
    assert_eq!(job.state, JobState::Pending);
    assert_eq!(job.attempts, 1);
    let run_at = job.run_at.expect("retry should set run_at");
    assert!(run_at >= start + ChronoDuration::milliseconds(1800));
    assert!(run_at <= start + ChronoDuration::milliseconds(2200));
    assert_eq!(store.writes.load(Ordering::SeqCst), 6);
}

#[tokio::test(start_paused = true)]
async fn test_rejected_outcome_is_not_retried() {
    let rejection = QueueError::NotFound("j1".into());
    let (store, worker, _clock) = flaky_setup(CommandOutcome::Success, vec![rejection]);
    store.create_job("j1", "true", None).await.unwrap();

    let tick = worker.run_once().await.unwrap();
    assert!(matches!(tick, Tick::Processed { .. }));
    assert_eq!(store.writes.load(Ordering::SeqCst), 1);
}
