//! Job queue contract.
//!
//! The queue is the only structure shared between the scheduler (producer)
//! and the worker pool (consumer). Backends must guarantee:
//!
//! - at most one pending (waiting, delayed or active) job per dedup key;
//!   a duplicate submission returns the existing job's id
//! - claims are ordered by priority (higher first), then by submission order
//! - failed attempts are retried with backoff up to a bounded count

use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::job::{AutomationJob, EnqueueOptions, ErrorKind, JobCounts, JobRecord};
use crate::common::JobId;

/// Result type for enqueue operations that handles idempotency.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueResult {
    /// Job was enqueued, returns new job ID
    Created(JobId),
    /// A pending job holds the same dedup key, returns its ID
    Duplicate(JobId),
}

impl EnqueueResult {
    /// Get the job ID regardless of whether it was created or duplicate
    pub fn job_id(&self) -> JobId {
        match self {
            EnqueueResult::Created(id) | EnqueueResult::Duplicate(id) => *id,
        }
    }

    pub fn is_created(&self) -> bool {
        matches!(self, EnqueueResult::Created(_))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum EnqueueError {
    #[error("job queue is closed")]
    Closed,

    #[error("job queue unavailable: {0}")]
    Unavailable(#[source] anyhow::Error),
}

/// A claimed job ready for execution.
#[derive(Debug, Clone)]
pub struct ClaimedJob {
    pub id: JobId,
    pub job: AutomationJob,
    /// 1-based attempt number of this claim.
    pub attempt: u32,
    pub max_attempts: u32,
}

/// What happened to a job after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailOutcome {
    /// Re-queued; claimable again after `delay`.
    Retrying { attempt: u32, delay: Duration },
    /// Terminally failed.
    Failed,
}

#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Submit a job. Idempotent per dedup key while a job is pending.
    async fn enqueue(
        &self,
        job: AutomationJob,
        opts: EnqueueOptions,
    ) -> Result<EnqueueResult, EnqueueError>;

    async fn get_job(&self, id: JobId) -> Result<Option<JobRecord>>;

    async fn counts(&self) -> Result<JobCounts>;

    /// Claim the next ready job, waiting until one is available.
    ///
    /// Returns `None` once the queue is closed or `cancel` fires.
    async fn next(&self, cancel: &CancellationToken) -> Result<Option<ClaimedJob>>;

    async fn complete(&self, id: JobId) -> Result<()>;

    async fn fail(&self, id: JobId, error: &str, kind: ErrorKind) -> Result<FailOutcome>;

    /// Stop accepting jobs and wake every waiting consumer.
    async fn close(&self);
}

// ============================================================================
// Best-effort submission
// ============================================================================

/// Producer-side result of a best-effort submission. Never an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitOutcome {
    Enqueued(JobId),
    Duplicate(JobId),
    /// The queue rejected or could not take the job. Already logged.
    Failed,
}

impl SubmitOutcome {
    pub fn job_id(&self) -> Option<JobId> {
        match self {
            SubmitOutcome::Enqueued(id) | SubmitOutcome::Duplicate(id) => Some(*id),
            SubmitOutcome::Failed => None,
        }
    }
}

/// Enqueues `job`, logging instead of propagating queue failures.
///
/// Used wherever a queue outage must not fail the caller's primary write.
pub async fn submit_best_effort(
    queue: &dyn JobQueue,
    job: AutomationJob,
    opts: EnqueueOptions,
) -> SubmitOutcome {
    let seed_id = job.seed_id;
    let automation_id = job.automation_id;

    match queue.enqueue(job, opts).await {
        Ok(EnqueueResult::Created(id)) => SubmitOutcome::Enqueued(id),
        Ok(EnqueueResult::Duplicate(id)) => {
            debug!(
                seed_id = %seed_id,
                automation_id = %automation_id,
                job_id = %id,
                "automation job already pending"
            );
            SubmitOutcome::Duplicate(id)
        }
        Err(e) => {
            warn!(
                seed_id = %seed_id,
                automation_id = %automation_id,
                error = %e,
                "failed to enqueue automation job"
            );
            SubmitOutcome::Failed
        }
    }
}
