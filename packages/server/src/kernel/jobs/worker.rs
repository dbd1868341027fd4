//! Worker pool for automation jobs.
//!
//! `WorkerPool` runs N long-lived workers that:
//! - Claim the next job from the shared `JobQueue` (priority, then FIFO)
//! - Prepare it in its own task, bounded by `job_timeout`
//! - Commit its output with one atomic store call, never interrupted
//! - Mark it completed, or failed (the queue decides retry vs terminal)
//!
//! A panicking or hanging job only ever affects its own attempt. Timeouts
//! and shutdown only cut the prepare phase, which writes nothing; a commit
//! that has started always runs to the end.
//!
//! # Shutdown
//!
//! ```text
//! close()
//!   ├─► stop claiming (idle workers return immediately)
//!   ├─► wait up to shutdown_grace for in-flight jobs
//!   └─► abandon what is left (aborted, failed as retryable, logged),
//!       except commits already underway, which are awaited
//! ```

use std::any::Any;
use std::sync::Arc;

use futures::future::join_all;
use tokio::task::{JoinError, JoinHandle};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::job::{AutomationJob, ErrorKind};
use super::queue::{ClaimedJob, FailOutcome, JobQueue};
use crate::common::JobId;
use crate::config::WorkerPoolConfig;
use crate::domains::automations::activities::{
    commit_automation_run, prepare_automation_job, JobReport, PreparedRun,
};
use crate::kernel::ServerDeps;

pub struct WorkerPool {
    config: WorkerPoolConfig,
    /// Stops claiming new jobs.
    stop: CancellationToken,
    /// Aborts jobs still running after the grace period.
    abandon: CancellationToken,
    workers: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawns `config.concurrency` workers.
    pub fn start(deps: Arc<ServerDeps>, config: WorkerPoolConfig) -> Self {
        let stop = CancellationToken::new();
        let abandon = CancellationToken::new();
        let concurrency = config.concurrency.max(1);

        let workers = (0..concurrency)
            .map(|worker_id| {
                let worker = Worker {
                    id: worker_id,
                    deps: deps.clone(),
                    config: config.clone(),
                    stop: stop.clone(),
                    abandon: abandon.clone(),
                };
                tokio::spawn(worker.run())
            })
            .collect();

        info!(
            concurrency,
            job_timeout_secs = config.job_timeout.as_secs(),
            "worker pool started"
        );

        Self {
            config,
            stop,
            abandon,
            workers,
        }
    }

    /// Stops the pool. Safe to call while jobs are running.
    pub async fn close(mut self) {
        self.stop.cancel();

        let workers = std::mem::take(&mut self.workers);
        let pending = join_all(workers);
        tokio::pin!(pending);

        match tokio::time::timeout(self.config.shutdown_grace, pending.as_mut()).await {
            Ok(results) => log_worker_exits(results),
            Err(_) => {
                warn!(
                    grace_secs = self.config.shutdown_grace.as_secs(),
                    "in-flight automation jobs did not finish in time, abandoning"
                );
                self.abandon.cancel();
                log_worker_exits(pending.await);
            }
        }

        info!("worker pool stopped");
    }
}

fn log_worker_exits(results: Vec<Result<(), JoinError>>) {
    for result in results {
        if let Err(e) = result {
            error!(error = %e, "worker task exited abnormally");
        }
    }
}

struct Worker {
    id: usize,
    deps: Arc<ServerDeps>,
    config: WorkerPoolConfig,
    stop: CancellationToken,
    abandon: CancellationToken,
}

impl Worker {
    async fn run(self) {
        debug!(worker_id = self.id, "worker started");

        loop {
            let claimed = match self.deps.job_queue.next(&self.stop).await {
                Ok(Some(claimed)) => claimed,
                Ok(None) => break,
                Err(e) => {
                    error!(worker_id = self.id, error = %e, "failed to claim job");
                    tokio::select! {
                        _ = self.stop.cancelled() => break,
                        _ = tokio::time::sleep(std::time::Duration::from_secs(1)) => continue,
                    }
                }
            };

            self.execute(claimed).await;
        }

        debug!(worker_id = self.id, "worker stopped");
    }

    async fn execute(&self, claimed: ClaimedJob) {
        let queue = self.deps.job_queue.as_ref();
        let job_id = claimed.id;

        debug!(
            worker_id = self.id,
            job_id = %job_id,
            seed_id = %claimed.job.seed_id,
            automation_id = %claimed.job.automation_id,
            attempt = claimed.attempt,
            max_attempts = claimed.max_attempts,
            "starting automation job"
        );

        let started = Instant::now();
        let outcome = match self.prepare(job_id, &claimed.job).await {
            Ok(run) => self.commit(run).await,
            Err(failure) => Err(failure),
        };

        let elapsed_ms = started.elapsed().as_millis() as u64;

        match outcome {
            Ok(report) => {
                if let Err(e) = queue.complete(job_id).await {
                    error!(job_id = %job_id, error = %e, "failed to mark job completed");
                    return;
                }
                debug!(
                    worker_id = self.id,
                    job_id = %job_id,
                    transactions = report.transactions,
                    followups = report.followups,
                    elapsed_ms,
                    "automation job completed"
                );
            }
            Err((message, kind)) => match queue.fail(job_id, &message, kind).await {
                Ok(FailOutcome::Retrying { attempt, delay }) => debug!(
                    job_id = %job_id,
                    attempt,
                    retry_in_ms = delay.as_millis() as u64,
                    elapsed_ms,
                    "automation job will be retried"
                ),
                Ok(FailOutcome::Failed) => {}
                Err(e) => error!(job_id = %job_id, error = %e, "failed to mark job failed"),
            },
        }
    }

    /// Runs the prepare phase, racing it against the job timeout and the
    /// pool's abandon signal.
    async fn prepare(&self, job_id: JobId, job: &AutomationJob) -> Result<PreparedRun, JobFailure> {
        let deps = self.deps.clone();
        let job = job.clone();
        let handle = tokio::spawn(async move { prepare_automation_job(&deps, &job).await });
        let abort = handle.abort_handle();

        tokio::select! {
            joined = tokio::time::timeout(self.config.job_timeout, handle) => match joined {
                Ok(Ok(Ok(run))) => Ok(run),
                Ok(Ok(Err(e))) => Err((e.to_string(), e.kind())),
                Ok(Err(join_error)) => Err((describe_join_error(join_error), ErrorKind::Retryable)),
                Err(_) => {
                    abort.abort();
                    Err((
                        format!("timed out after {}s", self.config.job_timeout.as_secs()),
                        ErrorKind::Timeout,
                    ))
                }
            },
            _ = self.abandon.cancelled() => {
                abort.abort();
                warn!(worker_id = self.id, job_id = %job_id, "abandoning in-flight automation job");
                Err(("abandoned during shutdown".to_string(), ErrorKind::Retryable))
            }
        }
    }

    /// Commits a prepared run. Runs in its own task so a panic stays
    /// contained, and is awaited to completion: aborting it could leave the
    /// output stored while the job is retried.
    async fn commit(&self, run: PreparedRun) -> Result<JobReport, JobFailure> {
        let deps = self.deps.clone();
        match tokio::spawn(async move { commit_automation_run(&deps, run).await }).await {
            Ok(Ok(report)) => Ok(report),
            Ok(Err(e)) => Err((e.to_string(), e.kind())),
            Err(join_error) => Err((describe_join_error(join_error), ErrorKind::Retryable)),
        }
    }
}

/// Error message and retry classification for a failed attempt.
type JobFailure = (String, ErrorKind);

fn describe_join_error(error: JoinError) -> String {
    if error.is_panic() {
        format!("automation panicked: {}", panic_message(error.into_panic()))
    } else {
        "automation task was cancelled".to_string()
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
