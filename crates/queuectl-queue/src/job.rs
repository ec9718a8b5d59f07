//! Job definitions

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::backend::QueueError;

/// Job Identifier (caller-supplied, unique for the lifetime of the store)
pub type JobId = String;

/// Lifecycle position of a job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    /// Waiting in queue (possibly delayed by `run_at`)
    Pending,
    /// Claimed by exactly one worker
    Processing,
    /// Command exited 0
    Completed,
    /// Retries exhausted, parked in the dead-letter queue
    Dead,
}

impl JobState {
    /// Every state, in reporting order
    pub const ALL: [JobState; 4] = [
        JobState::Pending,
        JobState::Processing,
        JobState::Completed,
        JobState::Dead,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Pending => "pending",
            JobState::Processing => "processing",
            JobState::Completed => "completed",
            JobState::Dead => "dead",
        }
    }

    /// Whether the lifecycle graph allows moving from `self` to `to`.
    ///
    /// `pending -> processing -> {completed | pending | dead}`, plus the
    /// manual `dead -> pending` reset. `completed -> completed` is accepted
    /// so that recording success stays idempotent.
    pub fn can_transition_to(&self, to: JobState) -> bool {
        use JobState::*;
        matches!(
            (self, to),
            (Pending, Processing)
                | (Processing, Completed)
                | (Processing, Pending)
                | (Processing, Dead)
                | (Dead, Pending)
                | (Completed, Completed)
        )
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobState {
    type Err = QueueError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(JobState::Pending),
            "processing" => Ok(JobState::Processing),
            "completed" => Ok(JobState::Completed),
            "dead" => Ok(JobState::Dead),
            other => Err(QueueError::Validation(format!("unknown job state '{}'", other))),
        }
    }
}

/// A persisted job entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobEntry {
    pub id: JobId,
    pub command: String,
    pub state: JobState,
    pub attempts: u32,
    pub max_retries: u32,
    /// Earliest time the job may be dequeued; `None` means immediately
    pub run_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl JobEntry {
    /// Fresh pending job as written by `create_job`
    pub fn new(
        id: impl Into<JobId>,
        command: impl Into<String>,
        max_retries: u32,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.into(),
            command: command.into(),
            state: JobState::Pending,
            attempts: 0,
            max_retries,
            run_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// `state = pending AND (run_at is null OR run_at <= now)`
    pub fn is_eligible(&self, now: DateTime<Utc>) -> bool {
        self.state == JobState::Pending && self.run_at.map_or(true, |run_at| run_at <= now)
    }
}

/// Job submission as accepted at the enqueue boundary
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewJob {
    pub id: JobId,
    pub command: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_retries: Option<u32>,
}

impl NewJob {
    pub fn new(id: impl Into<JobId>, command: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            command: command.into(),
            max_retries: None,
        }
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    /// Non-empty `id` and `command`
    pub fn validate(&self) -> Result<(), QueueError> {
        if self.id.trim().is_empty() {
            return Err(QueueError::Validation("job id must not be empty".into()));
        }
        if self.command.trim().is_empty() {
            return Err(QueueError::Validation("job command must not be empty".into()));
        }
        Ok(())
    }
}

/// Job counts per state; states with no jobs report zero
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusSummary {
    pub pending: u64,
    pub processing: u64,
    pub completed: u64,
    pub dead: u64,
}

impl StatusSummary {
    pub fn get(&self, state: JobState) -> u64 {
        match state {
            JobState::Pending => self.pending,
            JobState::Processing => self.processing,
            JobState::Completed => self.completed,
            JobState::Dead => self.dead,
        }
    }

    pub fn add(&mut self, state: JobState, count: u64) {
        match state {
            JobState::Pending => self.pending += count,
            JobState::Processing => self.processing += count,
            JobState::Completed => self.completed += count,
            JobState::Dead => self.dead += count,
        }
    }

    pub fn total(&self) -> u64 {
        self.pending + self.processing + self.completed + self.dead
    }
}
