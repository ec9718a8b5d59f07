use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use std::sync::Arc;
use tracing::{debug, warn};

use queuectl_queue::{
    Clock, ConfigKey, JobEntry, JobState, QueueError, QueueStore, StatusSummary, SystemClock,
};

use crate::sqlite::{connect, SqliteConfig};

const JOB_COLUMNS: &str =
    "id, command, state, attempts, max_retries, run_at, created_at, updated_at";

/// Durable queue store using a single SQLite file.
///
/// Any number of handles, in any number of processes, may share the file.
/// Claims are serialized by `BEGIN IMMEDIATE`, which takes the database
/// write lock before the eligible row is read.
pub struct SqliteQueueStore {
    pool: SqlitePool,
    clock: Arc<dyn Clock>,
}

impl SqliteQueueStore {
    /// Wrap a pool whose schema is already migrated
    pub fn new(pool: SqlitePool) -> Self {
        Self::with_clock(pool, Arc::new(SystemClock))
    }

    pub fn with_clock(pool: SqlitePool, clock: Arc<dyn Clock>) -> Self {
        Self { pool, clock }
    }

    /// Connect, migrate and wrap
    pub async fn open(config: &SqliteConfig) -> Result<Self, QueueError> {
        Ok(Self::new(connect(config).await?))
    }

    pub async fn open_with_clock(
        config: &SqliteConfig,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, QueueError> {
        Ok(Self::with_clock(connect(config).await?, clock))
    }

    /// Get the connection pool
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    fn now(&self) -> String {
        encode_time(self.clock.now())
    }

    /// Find the oldest eligible job and mark it processing inside one
    /// write-locked transaction
    async fn claim_next(&self) -> Result<Option<JobEntry>, sqlx::Error> {
        let now = self.now();
        let mut tx = self.pool.begin_with("BEGIN IMMEDIATE").await?;

        let row = sqlx::query(&format!(
            r#"
            SELECT {JOB_COLUMNS} FROM jobs
            WHERE state = 'pending' AND (run_at IS NULL OR run_at <= ?)
            ORDER BY created_at ASC, id ASC
            LIMIT 1
            "#
        ))
        .bind(&now)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(row) = row else {
            tx.commit().await?;
            return Ok(None);
        };
        let job = decode_job(&row)?;

        sqlx::query(
            "UPDATE jobs SET state = 'processing', updated_at = ? WHERE id = ? AND state = 'pending'",
        )
        .bind(&now)
        .bind(&job.id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(Some(job))
    }

    async fn state_of(&self, id: &str) -> Result<Option<(JobState, u32)>, QueueError> {
        let row = sqlx::query("SELECT state, attempts FROM jobs WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(backend)?;

        match row {
            Some(row) => {
                let state: String = row.try_get("state").map_err(backend)?;
                let attempts: i64 = row.try_get("attempts").map_err(backend)?;
                let attempts = u32::try_from(attempts)
                    .map_err(|_| QueueError::Backend(format!("invalid attempts {}", attempts)))?;
                Ok(Some((state.parse()?, attempts)))
            }
            None => Ok(None),
        }
    }

    /// Explain why a guarded failure write touched no row
    async fn rejected_failure(&self, id: &str, attempts: u32, to: JobState) -> QueueError {
        match self.state_of(id).await {
            Ok(None) => QueueError::NotFound(id.to_string()),
            Ok(Some((from, _))) if from != JobState::Processing => QueueError::InvalidTransition {
                id: id.to_string(),
                from,
                to,
            },
            Ok(Some((_, current))) => QueueError::Validation(format!(
                "attempts for '{}' cannot decrease from {} to {}",
                id, current, attempts
            )),
            Err(e) => e,
        }
    }
}

#[async_trait]
impl QueueStore for SqliteQueueStore {
    async fn create_job(
        &self,
        id: &str,
        command: &str,
        max_retries: Option<u32>,
    ) -> Result<(), QueueError> {
        let max_retries = match max_retries {
            Some(value) => value,
            None => {
                let stored = self.get_config(ConfigKey::MaxRetries).await?;
                ConfigKey::MaxRetries.resolve(stored.as_deref())
            }
        };
        let now = self.now();

        let result = sqlx::query(
            r#"
            INSERT INTO jobs (id, command, state, attempts, max_retries, run_at, created_at, updated_at)
            VALUES (?, ?, 'pending', 0, ?, NULL, ?, ?)
            "#,
        )
        .bind(id)
        .bind(command)
        .bind(i64::from(max_retries))
        .bind(&now)
        .bind(&now)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
                Err(QueueError::DuplicateId(id.to_string()))
            }
            Err(e) => Err(backend(e)),
        }
    }

    async fn dequeue_next(&self) -> Result<Option<JobEntry>, QueueError> {
        match self.claim_next().await {
            Ok(job) => Ok(job),
            Err(e) if is_transient(&e) => {
                // The transaction was rolled back on drop; nothing was claimed
                warn!(error = %e, "Store busy, skipping this poll");
                Ok(None)
            }
            Err(e) => Err(backend(e)),
        }
    }

    async fn record_success(&self, id: &str) -> Result<(), QueueError> {
        let updated = sqlx::query(
            "UPDATE jobs SET state = 'completed', updated_at = ? WHERE id = ? AND state = 'processing'",
        )
        .bind(self.now())
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(backend)?;

        if updated.rows_affected() > 0 {
            return Ok(());
        }
        match self.state_of(id).await? {
            None => Err(QueueError::NotFound(id.to_string())),
            Some((JobState::Completed, _)) => {
                debug!(job_id = %id, "Job already completed");
                Ok(())
            }
            Some((from, _)) => Err(QueueError::InvalidTransition {
                id: id.to_string(),
                from,
                to: JobState::Completed,
            }),
        }
    }

    async fn record_failure_terminal(&self, id: &str, attempts: u32) -> Result<(), QueueError> {
        let updated = sqlx::query(
            r#"
            UPDATE jobs
            SET state = 'dead', attempts = ?, updated_at = ?
            WHERE id = ? AND state = 'processing' AND attempts <= ?
            "#,
        )
        .bind(i64::from(attempts))
        .bind(self.now())
        .bind(id)
        .bind(i64::from(attempts))
        .execute(&self.pool)
        .await
        .map_err(backend)?;

        if updated.rows_affected() == 0 {
            return Err(self.rejected_failure(id, attempts, JobState::Dead).await);
        }
        Ok(())
    }

    async fn record_failure_retry(
        &self,
        id: &str,
        attempts: u32,
        run_at: DateTime<Utc>,
    ) -> Result<(), QueueError> {
        let updated = sqlx::query(
            r#"
            UPDATE jobs
            SET state = 'pending', attempts = ?, run_at = ?, updated_at = ?
            WHERE id = ? AND state = 'processing' AND attempts <= ?
            "#,
        )
        .bind(i64::from(attempts))
        .bind(encode_time(run_at))
        .bind(self.now())
        .bind(id)
        .bind(i64::from(attempts))
        .execute(&self.pool)
        .await
        .map_err(backend)?;

        if updated.rows_affected() == 0 {
            return Err(self.rejected_failure(id, attempts, JobState::Pending).await);
        }
        Ok(())
    }

    async fn reset_from_dead(&self, id: &str) -> Result<bool, QueueError> {
        let updated = sqlx::query(
            r#"
            UPDATE jobs
            SET state = 'pending', attempts = 0, run_at = NULL, updated_at = ?
            WHERE id = ? AND state = 'dead'
            "#,
        )
        .bind(self.now())
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(backend)?;

        Ok(updated.rows_affected() > 0)
    }

    async fn get_job(&self, id: &str) -> Result<Option<JobEntry>, QueueError> {
        let row = sqlx::query(&format!("SELECT {JOB_COLUMNS} FROM jobs WHERE id = ?"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(backend)?;

        row.as_ref().map(decode_job).transpose().map_err(backend)
    }

    async fn list_by_state(&self, state: JobState) -> Result<Vec<JobEntry>, QueueError> {
        let rows = sqlx::query(&format!(
            "SELECT {JOB_COLUMNS} FROM jobs WHERE state = ? ORDER BY created_at ASC, id ASC"
        ))
        .bind(state.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;

        rows.iter()
            .map(decode_job)
            .collect::<Result<Vec<_>, _>>()
            .map_err(backend)
    }

    async fn counts_by_state(&self) -> Result<StatusSummary, QueueError> {
        let rows = sqlx::query("SELECT state, COUNT(*) AS count FROM jobs GROUP BY state")
            .fetch_all(&self.pool)
            .await
            .map_err(backend)?;

        let mut summary = StatusSummary::default();
        for row in rows {
            let state: String = row.try_get("state").map_err(backend)?;
            let count: i64 = row.try_get("count").map_err(backend)?;
            summary.add(state.parse()?, count.max(0) as u64);
        }
        Ok(summary)
    }

    async fn get_config(&self, key: ConfigKey) -> Result<Option<String>, QueueError> {
        let row = sqlx::query("SELECT value FROM config WHERE key = ?")
            .bind(key.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(backend)?;

        match row {
            Some(row) => Ok(Some(row.try_get("value").map_err(backend)?)),
            None => Ok(None),
        }
    }

    async fn set_config(&self, key: ConfigKey, value: &str) -> Result<(), QueueError> {
        sqlx::query(
            "INSERT INTO config (key, value) VALUES (?, ?) ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        )
        .bind(key.as_str())
        .bind(value)
        .execute(&self.pool)
        .await
        .map_err(backend)?;
        Ok(())
    }
}

fn backend(e: sqlx::Error) -> QueueError {
    QueueError::Backend(e.to_string())
}

/// Lock contention (`SQLITE_BUSY`, `SQLITE_LOCKED` and their extended codes)
/// or an exhausted pool
fn is_transient(e: &sqlx::Error) -> bool {
    match e {
        sqlx::Error::PoolTimedOut => true,
        sqlx::Error::Database(db) => db
            .code()
            .and_then(|code| code.parse::<i32>().ok())
            .map_or(false, |code| matches!(code & 0xff, 5 | 6)),
        _ => false,
    }
}

/// Fixed-width UTC text, e.g. `2026-01-01T00:00:00.000000Z`
pub(crate) fn encode_time(t: DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn decode_time(s: &str) -> Result<DateTime<Utc>, sqlx::Error> {
    DateTime::parse_from_rfc3339(s)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| sqlx::Error::Decode(Box::new(e)))
}

fn decode_u32(row: &SqliteRow, column: &str) -> Result<u32, sqlx::Error> {
    let value: i64 = row.try_get(column)?;
    u32::try_from(value).map_err(|e| sqlx::Error::Decode(Box::new(e)))
}

fn decode_job(row: &SqliteRow) -> Result<JobEntry, sqlx::Error> {
    let state: String = row.try_get("state")?;
    let run_at: Option<String> = row.try_get("run_at")?;
    let created_at: String = row.try_get("created_at")?;
    let updated_at: String = row.try_get("updated_at")?;

    Ok(JobEntry {
        id: row.try_get("id")?,
        command: row.try_get("command")?,
        state: state
            .parse()
            .map_err(|e: QueueError| sqlx::Error::Decode(Box::new(e)))?,
        attempts: decode_u32(row, "attempts")?,
        max_retries: decode_u32(row, "max_retries")?,
        run_at: run_at.as_deref().map(decode_time).transpose()?,
        created_at: decode_time(&created_at)?,
        updated_at: decode_time(&updated_at)?,
    })
}
