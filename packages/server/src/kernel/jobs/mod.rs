//! Job infrastructure for background automation runs.
//!
//! This module provides the kernel-level infrastructure for job execution:
//! - [`JobQueue`] - queue contract (dedup, priority, retry with backoff)
//! - [`InMemoryJobQueue`] - in-process queue backend
//! - [`WorkerPool`] - concurrent workers that claim and execute jobs
//!
//! # Architecture
//!
//! ```text
//! PressureScheduler / trigger_automation
//!     │
//!     └─► JobQueue.enqueue(job, opts)      (deduplicated per seed+automation)
//!
//! WorkerPool (N workers)
//!     │
//!     ├─► JobQueue.next()                  (highest priority, then FIFO)
//!     ├─► prepare_automation_job()         (own task, bounded by a timeout)
//!     │       └─► Automation.process() → validated drafts
//!     ├─► commit_automation_run()          (one atomic store call, not interruptible)
//!     └─► complete / fail (retry with backoff, then terminal)
//! ```
//!
//! What an automation job does lives in the automations domain. This module
//! only provides the infrastructure.

mod job;
mod memory;
mod queue;
mod worker;

pub use job::{
    default_dedup_key, AutomationJob, EnqueueOptions, ErrorKind, JobCounts, JobRecord, JobStatus,
    DEFAULT_PRIORITY, MANUAL_PRIORITY,
};
pub use memory::InMemoryJobQueue;
pub use queue::{
    submit_best_effort, ClaimedJob, EnqueueError, EnqueueResult, FailOutcome, JobQueue,
    SubmitOutcome,
};
pub use worker::WorkerPool;
