//! In-process job queue.
//!
//! ```text
//! enqueue ──► ready heap ──next──► active ──complete──► completed
//!                 ▲                  │
//!                 │                  └──fail──► delayed ──backoff──┐
//!                 └────────────────────────────────────────────────┘
//!                                    └──fail (exhausted)──► failed
//! ```
//!
//! Finished records are kept for inspection up to `retention`, oldest
//! evicted first.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Notify;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use super::job::{AutomationJob, EnqueueOptions, ErrorKind, JobCounts, JobRecord, JobStatus};
use super::queue::{ClaimedJob, EnqueueError, EnqueueResult, FailOutcome, JobQueue};
use crate::common::JobId;
use crate::config::QueueConfig;

#[derive(Debug, PartialEq, Eq)]
struct ReadyEntry {
    priority: i32,
    sequence: u64,
    id: JobId,
}

impl Ord for ReadyEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // Max-heap: higher priority first, then earlier submission.
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.sequence.cmp(&self.sequence))
    }
}

impl PartialOrd for ReadyEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

struct StoredJob {
    record: JobRecord,
    sequence: u64,
}

#[derive(Default)]
struct QueueState {
    jobs: HashMap<JobId, StoredJob>,
    ready: BinaryHeap<ReadyEntry>,
    delayed: Vec<(Instant, JobId)>,
    /// Dedup key -> pending job holding it.
    keys: HashMap<String, JobId>,
    finished: VecDeque<JobId>,
    next_sequence: u64,
    closed: bool,
}

impl QueueState {
    fn promote_due(&mut self, now: Instant) {
        let mut index = 0;
        while index < self.delayed.len() {
            if self.delayed[index].0 <= now {
                let (_, id) = self.delayed.swap_remove(index);
                if let Some(stored) = self.jobs.get_mut(&id) {
                    stored.record.status = JobStatus::Waiting;
                    self.ready.push(ReadyEntry {
                        priority: stored.record.priority,
                        sequence: stored.sequence,
                        id,
                    });
                }
            } else {
                index += 1;
            }
        }
    }

    fn next_wake(&self) -> Option<Instant> {
        self.delayed.iter().map(|(at, _)| *at).min()
    }

    fn claim(&mut self) -> Option<ClaimedJob> {
        while let Some(entry) = self.ready.pop() {
            let Some(stored) = self.jobs.get_mut(&entry.id) else {
                continue;
            };
            if stored.record.status != JobStatus::Waiting {
                continue;
            }
            stored.record.status = JobStatus::Active;
            stored.record.attempts += 1;
            return Some(ClaimedJob {
                id: entry.id,
                job: stored.record.job.clone(),
                attempt: stored.record.attempts,
                max_attempts: stored.record.max_attempts,
            });
        }
        None
    }

    fn finish(&mut self, id: JobId, retention: usize) {
        if let Some(stored) = self.jobs.get(&id) {
            if self.keys.get(&stored.record.dedup_key) == Some(&id) {
                self.keys.remove(&stored.record.dedup_key);
            }
        }
        self.finished.push_back(id);
        while self.finished.len() > retention {
            if let Some(evicted) = self.finished.pop_front() {
                self.jobs.remove(&evicted);
            }
        }
    }
}

/// Priority queue with dedup, retry backoff and bounded retention, held in
/// process memory.
pub struct InMemoryJobQueue {
    config: QueueConfig,
    state: Mutex<QueueState>,
    notify: Notify,
}

impl InMemoryJobQueue {
    pub fn new(config: QueueConfig) -> Self {
        Self {
            config,
            state: Mutex::new(QueueState::default()),
            notify: Notify::new(),
        }
    }

    fn state(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for InMemoryJobQueue {
    fn default() -> Self {
        Self::new(QueueConfig::default())
    }
}

#[async_trait]
impl JobQueue for InMemoryJobQueue {
    async fn enqueue(
        &self,
        mut job: AutomationJob,
        opts: EnqueueOptions,
    ) -> Result<EnqueueResult, EnqueueError> {
        let dedup_key = opts.resolve_dedup_key(&job);
        if let Some(priority) = opts.priority {
            job.priority = priority;
        }

        let mut state = self.state();
        if state.closed {
            return Err(EnqueueError::Closed);
        }

        if let Some(existing) = state.keys.get(&dedup_key) {
            return Ok(EnqueueResult::Duplicate(*existing));
        }

        let id = JobId::new();
        let sequence = state.next_sequence;
        state.next_sequence += 1;

        let record = JobRecord {
            id,
            priority: job.priority,
            job,
            dedup_key: dedup_key.clone(),
            status: JobStatus::Waiting,
            attempts: 0,
            max_attempts: self.config.max_attempts.max(1),
            last_error: None,
            error_kind: None,
            created_at: Utc::now(),
            finished_at: None,
        };

        state.ready.push(ReadyEntry {
            priority: record.priority,
            sequence,
            id,
        });
        state.keys.insert(dedup_key, id);
        state.jobs.insert(id, StoredJob { record, sequence });
        drop(state);

        debug!(job_id = %id, "automation job enqueued");
        self.notify.notify_one();
        Ok(EnqueueResult::Created(id))
    }

    async fn get_job(&self, id: JobId) -> Result<Option<JobRecord>> {
        Ok(self.state().jobs.get(&id).map(|stored| stored.record.clone()))
    }

    async fn counts(&self) -> Result<JobCounts> {
        let state = self.state();
        let mut counts = JobCounts::default();
        for stored in state.jobs.values() {
            match stored.record.status {
                JobStatus::Waiting => counts.waiting += 1,
                JobStatus::Delayed => counts.delayed += 1,
                JobStatus::Active => counts.active += 1,
                JobStatus::Completed => counts.completed += 1,
                JobStatus::Failed => counts.failed += 1,
            }
        }
        Ok(counts)
    }

    async fn next(&self, cancel: &CancellationToken) -> Result<Option<ClaimedJob>> {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let wake_at = {
                let mut state = self.state();
                if state.closed {
                    return Ok(None);
                }
                state.promote_due(Instant::now());
                if let Some(claimed) = state.claim() {
                    return Ok(Some(claimed));
                }
                state.next_wake()
            };

            match wake_at {
                Some(at) => {
                    tokio::select! {
                        _ = cancel.cancelled() => return Ok(None),
                        _ = &mut notified => {}
                        _ = tokio::time::sleep_until(at) => {}
                    }
                }
                None => {
                    tokio::select! {
                        _ = cancel.cancelled() => return Ok(None),
                        _ = &mut notified => {}
                    }
                }
            }
        }
    }

    async fn complete(&self, id: JobId) -> Result<()> {
        let mut state = self.state();
        let stored = state
            .jobs
            .get_mut(&id)
            .ok_or_else(|| anyhow!("job {} not found", id))?;
        if stored.record.status != JobStatus::Active {
            return Err(anyhow!(
                "job {} is {}, only active jobs can complete",
                id,
                stored.record.status
            ));
        }
        stored.record.status = JobStatus::Completed;
        stored.record.finished_at = Some(Utc::now());
        state.finish(id, self.config.retention);
        Ok(())
    }

    async fn fail(&self, id: JobId, error_message: &str, kind: ErrorKind) -> Result<FailOutcome> {
        let mut guard = self.state();
        let state = &mut *guard;
        let stored = state
            .jobs
            .get_mut(&id)
            .ok_or_else(|| anyhow!("job {} not found", id))?;
        if stored.record.status != JobStatus::Active {
            return Err(anyhow!(
                "job {} is {}, only active jobs can fail",
                id,
                stored.record.status
            ));
        }

        stored.record.last_error = Some(error_message.to_string());
        stored.record.error_kind = Some(kind);
        let attempt = stored.record.attempts;

        if kind.should_retry() && attempt < stored.record.max_attempts && !state.closed {
            let delay = self.config.backoff_for(attempt);
            stored.record.status = JobStatus::Delayed;
            state.delayed.push((Instant::now() + delay, id));
            drop(guard);

            warn!(job_id = %id, attempt, delay_ms = delay.as_millis() as u64, error = %error_message, "automation job failed, retrying");
            self.notify.notify_one();
            return Ok(FailOutcome::Retrying { attempt, delay });
        }

        stored.record.status = JobStatus::Failed;
        stored.record.finished_at = Some(Utc::now());
        state.finish(id, self.config.retention);
        drop(guard);

        error!(job_id = %id, attempt, kind = %kind, error = %error_message, "automation job failed permanently");
        Ok(FailOutcome::Failed)
    }

    async fn close(&self) {
        self.state().closed = true;
        self.notify.notify_waiters();
    }
}
