//! What a worker does with a claimed automation job.
//!
//! ```text
//! prepare:  load automation (registry) ─► load seed + replay ─► process()
//!               ─► validate drafts ─► build followups
//! commit:   transactions + followups + run marker in one store call
//! ```
//!
//! Only `prepare` may be interrupted (timeout, shutdown). Once `commit`
//! starts, the job's output is either fully stored or not at all.

use chrono::Utc;
use tracing::{debug, info};

use crate::common::{AutomationId, SeedId};
use crate::domains::automations::{AutomationContext, RunCommit};
use crate::domains::followups::Followup;
use crate::domains::seeds::activities::load_seed_view;
use crate::domains::seeds::patch::validate;
use crate::domains::seeds::{SeedError, TransactionDraft, ValidationError};
use crate::kernel::jobs::{AutomationJob, ErrorKind};
use crate::kernel::ServerDeps;

#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error("automation {0} is not registered")]
    UnknownAutomation(AutomationId),

    #[error("automation {0} is disabled")]
    AutomationDisabled(AutomationId),

    #[error("seed {0} not found")]
    SeedNotFound(SeedId),

    #[error("seed {0} is archived")]
    SeedArchived(SeedId),

    #[error("seed history is invalid: {0}")]
    CorruptHistory(#[source] ValidationError),

    #[error("automation returned invalid output: {0}")]
    InvalidOutput(String),

    #[error("automation failed: {0:#}")]
    Automation(#[source] anyhow::Error),

    #[error("store error: {0:#}")]
    Store(#[source] anyhow::Error),
}

impl JobError {
    /// Only automation and storage failures are worth another attempt.
    pub fn kind(&self) -> ErrorKind {
        match self {
            JobError::Automation(_) | JobError::Store(_) => ErrorKind::Retryable,
            _ => ErrorKind::NonRetryable,
        }
    }
}

impl From<SeedError> for JobError {
    fn from(e: SeedError) -> Self {
        match e {
            SeedError::NotFound(id) => JobError::SeedNotFound(id),
            SeedError::Validation(e) => JobError::CorruptHistory(e),
            SeedError::Store(e) => JobError::Store(e),
            other => JobError::Store(anyhow::anyhow!(other)),
        }
    }
}

/// What a successful job committed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct JobReport {
    pub transactions: usize,
    pub followups: usize,
}

/// A processed job whose output has been checked but not stored yet.
#[derive(Debug)]
pub struct PreparedRun {
    automation: String,
    commit: RunCommit,
}

/// Executes one automation job end to end.
///
/// The job's drafts, the followups they schedule and the run marker are
/// committed together or not at all. Nothing is written when `process`
/// fails.
pub async fn run_automation_job(deps: &ServerDeps, job: &AutomationJob) -> Result<JobReport, JobError> {
    let run = prepare_automation_job(deps, job).await?;
    commit_automation_run(deps, run).await
}

/// Everything up to the commit: loads the seed, runs `process` and checks
/// its output. Writes nothing, so it is safe to abandon at any point.
pub async fn prepare_automation_job(
    deps: &ServerDeps,
    job: &AutomationJob,
) -> Result<PreparedRun, JobError> {
    let entry = deps
        .registry
        .get_by_id(job.automation_id)
        .ok_or(JobError::UnknownAutomation(job.automation_id))?;
    if !entry.is_enabled() {
        return Err(JobError::AutomationDisabled(job.automation_id));
    }

    let seed = deps
        .seeds
        .find(job.seed_id)
        .await
        .map_err(JobError::Store)?
        .ok_or(JobError::SeedNotFound(job.seed_id))?;
    if !seed.is_active() {
        return Err(JobError::SeedArchived(seed.id));
    }

    let view = load_seed_view(deps, &seed).await?;
    let last_runs = deps
        .automation_runs
        .last_runs(seed.id)
        .await
        .map_err(JobError::Store)?;

    let ctx = AutomationContext {
        ai: deps.ai.clone(),
        automation_id: entry.id(),
        user_id: seed.user_id,
        transactions: view.transactions.clone(),
        last_run_at: last_runs.get(&entry.id()).copied(),
        now: Utc::now(),
    };

    let drafts = entry
        .automation
        .process(&view.snapshot, &ctx)
        .await
        .map_err(JobError::Automation)?;

    let finished_at = Utc::now();
    let mut commit = RunCommit::empty(seed.id, entry.id(), finished_at);
    for draft in drafts {
        let transaction = prepare_draft(draft, job)?.into_transaction(finished_at);
        let followup = Followup::from_transaction(&transaction, finished_at)
            .map_err(|e| JobError::InvalidOutput(format!("{}: {e}", transaction.transaction_type)))?;
        commit.followups.extend(followup);
        commit.transactions.push(transaction);
    }

    Ok(PreparedRun {
        automation: entry.name().to_string(),
        commit,
    })
}

/// Stores a prepared run with a single atomic store call.
pub async fn commit_automation_run(deps: &ServerDeps, run: PreparedRun) -> Result<JobReport, JobError> {
    let PreparedRun { automation, commit } = run;
    deps.automation_runs
        .commit_run(&commit)
        .await
        .map_err(JobError::Store)?;

    for followup in &commit.followups {
        info!(
            followup_id = %followup.id,
            seed_id = %followup.seed_id,
            due_time = %followup.due_time,
            automation = %automation,
            "followup scheduled from transaction"
        );
    }
    debug!(
        seed_id = %commit.seed_id,
        automation = %automation,
        transactions = commit.transactions.len(),
        followups = commit.followups.len(),
        "automation run committed"
    );

    Ok(JobReport {
        transactions: commit.transactions.len(),
        followups: commit.followups.len(),
    })
}

/// Pins a draft to the job's seed and automation and validates its patch.
fn prepare_draft(mut draft: TransactionDraft, job: &AutomationJob) -> Result<TransactionDraft, JobError> {
    if draft.seed_id != job.seed_id {
        return Err(JobError::InvalidOutput(format!(
            "draft targets seed {} instead of {}",
            draft.seed_id, job.seed_id
        )));
    }
    draft.automation_id = Some(job.automation_id);

    if draft.transaction_type.is_patch_shaped() {
        let ops = draft.data.as_patch().ok_or_else(|| {
            JobError::InvalidOutput(format!(
                "{} draft must carry patch operations",
                draft.transaction_type
            ))
        })?;
        validate(ops).map_err(|e| JobError::InvalidOutput(e.to_string()))?;
    }
    Ok(draft)
}
