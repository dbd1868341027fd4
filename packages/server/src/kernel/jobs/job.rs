//! Automation job payloads and queue bookkeeping types.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::common::{AutomationId, JobId, SeedId, UserId};

/// Priority for runs not driven by pressure: seed creation and non-manual
/// triggers.
pub const DEFAULT_PRIORITY: i32 = 50;

/// Priority used for manual "run now" triggers.
pub const MANUAL_PRIORITY: i32 = 100;

// ============================================================================
// Job payload
// ============================================================================

/// Request to run one automation against one seed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AutomationJob {
    pub seed_id: SeedId,
    pub automation_id: AutomationId,
    pub user_id: UserId,
    /// Higher runs first.
    pub priority: i32,
    /// Free-form context about why the job was queued (trigger, pressure).
    #[serde(default)]
    pub metadata: Value,
}

impl AutomationJob {
    pub fn new(seed_id: SeedId, automation_id: AutomationId, user_id: UserId, priority: i32) -> Self {
        Self {
            seed_id,
            automation_id,
            user_id,
            priority,
            metadata: Value::Null,
        }
    }

    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = metadata;
        self
    }
}

/// Deterministic dedup key for a (seed, automation) pair.
pub fn default_dedup_key(seed_id: SeedId, automation_id: AutomationId) -> String {
    let digest = Sha256::digest(format!("{}:{}", seed_id, automation_id).as_bytes());
    hex::encode(digest)
}

/// Options accepted by `JobQueue::enqueue`.
#[derive(Debug, Clone, Default)]
pub struct EnqueueOptions {
    /// Overrides `AutomationJob::priority`.
    pub priority: Option<i32>,
    /// Overrides the default (seed, automation) key.
    pub dedup_key: Option<String>,
    /// Appends a random suffix to the key so the job is always created.
    pub force_unique: bool,
}

impl EnqueueOptions {
    pub fn unique() -> Self {
        Self {
            force_unique: true,
            ..Default::default()
        }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = Some(priority);
        self
    }

    /// Resolves the key a job is deduplicated by.
    pub fn resolve_dedup_key(&self, job: &AutomationJob) -> String {
        let base = self
            .dedup_key
            .clone()
            .unwrap_or_else(|| default_dedup_key(job.seed_id, job.automation_id));

        if self.force_unique {
            format!("{}:{}", base, Uuid::new_v4())
        } else {
            base
        }
    }
}

// ============================================================================
// Status
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Waiting,
    /// Waiting for a retry backoff to elapse.
    Delayed,
    Active,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Waiting => "waiting",
            JobStatus::Delayed => "delayed",
            JobStatus::Active => "active",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    /// Pending jobs hold their dedup key.
    pub fn is_pending(&self) -> bool {
        matches!(self, JobStatus::Waiting | JobStatus::Delayed | JobStatus::Active)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "waiting" => Ok(JobStatus::Waiting),
            "delayed" => Ok(JobStatus::Delayed),
            "active" => Ok(JobStatus::Active),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            other => Err(anyhow::anyhow!("unknown job status: {}", other)),
        }
    }
}

// ============================================================================
// Failure classification
// ============================================================================

/// How a failed attempt should be treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Transient failure; retry with backoff.
    Retryable,
    /// Permanent failure; never retry.
    NonRetryable,
    /// The attempt exceeded the execution timeout.
    Timeout,
}

impl ErrorKind {
    pub fn should_retry(&self) -> bool {
        !matches!(self, ErrorKind::NonRetryable)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::Retryable => write!(f, "retryable"),
            ErrorKind::NonRetryable => write!(f, "non_retryable"),
            ErrorKind::Timeout => write!(f, "timeout"),
        }
    }
}

// ============================================================================
// Inspection
// ============================================================================

/// Snapshot of a job as the queue tracks it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    pub id: JobId,
    pub job: AutomationJob,
    pub dedup_key: String,
    pub priority: i32,
    pub status: JobStatus,
    /// Attempts started so far.
    pub attempts: u32,
    pub max_attempts: u32,
    pub last_error: Option<String>,
    pub error_kind: Option<ErrorKind>,
    pub created_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

/// Queue depth by status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobCounts {
    pub waiting: usize,
    pub delayed: usize,
    pub active: usize,
    pub completed: usize,
    pub failed: usize,
}

impl JobCounts {
    pub fn pending(&self) -> usize {
        self.waiting + self.delayed + self.active
    }
}
