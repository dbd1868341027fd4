//! Explicit automation runs outside the pressure loop.

use serde_json::json;
use tracing::info;

use crate::common::{AutomationId, JobId, SeedId};
use crate::kernel::jobs::{
    AutomationJob, EnqueueError, EnqueueOptions, DEFAULT_PRIORITY, MANUAL_PRIORITY,
};
use crate::kernel::ServerDeps;

use crate::domains::automations::RegisteredAutomation;
use crate::domains::seeds::Seed;

#[derive(Debug, thiserror::Error)]
pub enum TriggerError {
    #[error("seed {0} not found")]
    SeedNotFound(SeedId),

    #[error("seed {0} is archived")]
    SeedArchived(SeedId),

    #[error("automation {0} not found")]
    AutomationNotFound(AutomationId),

    #[error("automation {0} is disabled")]
    AutomationDisabled(AutomationId),

    #[error(transparent)]
    Enqueue(#[from] EnqueueError),

    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

async fn resolve(
    deps: &ServerDeps,
    seed_id: SeedId,
    automation_id: AutomationId,
) -> Result<(Seed, RegisteredAutomation), TriggerError> {
    let seed = deps
        .seeds
        .find(seed_id)
        .await?
        .ok_or(TriggerError::SeedNotFound(seed_id))?;
    if !seed.is_active() {
        return Err(TriggerError::SeedArchived(seed_id));
    }

    let entry = deps
        .registry
        .get_by_id(automation_id)
        .ok_or(TriggerError::AutomationNotFound(automation_id))?;
    if !entry.is_enabled() {
        return Err(TriggerError::AutomationDisabled(automation_id));
    }

    Ok((seed, entry))
}

/// Queues a run of one automation against one seed.
///
/// Manual triggers bypass dedup ("run now", even while a run is pending)
/// and jump the queue; other triggers are deduplicated like pressure runs.
pub async fn trigger_automation(
    deps: &ServerDeps,
    seed_id: SeedId,
    automation_id: AutomationId,
    manual: bool,
) -> Result<JobId, TriggerError> {
    let (seed, entry) = resolve(deps, seed_id, automation_id).await?;

    let (priority, opts) = if manual {
        (MANUAL_PRIORITY, EnqueueOptions::unique())
    } else {
        (DEFAULT_PRIORITY, EnqueueOptions::default())
    };
    let trigger = if manual { "manual" } else { "trigger" };

    let job = AutomationJob::new(seed.id, entry.id(), seed.user_id, priority)
        .with_metadata(json!({ "trigger": trigger, "automation": entry.name() }));
    let result = deps.job_queue.enqueue(job, opts).await?;

    info!(
        seed_id = %seed.id,
        automation = entry.name(),
        job_id = %result.job_id(),
        created = result.is_created(),
        manual,
        "automation triggered"
    );
    Ok(result.job_id())
}

/// Administrative reset: physically deletes what the automation produced
/// for the seed, then queues a fresh manual run.
pub async fn regenerate_automation(
    deps: &ServerDeps,
    seed_id: SeedId,
    automation_id: AutomationId,
) -> Result<JobId, TriggerError> {
    let (seed, entry) = resolve(deps, seed_id, automation_id).await?;

    let deleted = deps
        .transactions
        .delete_by_automation(seed.id, entry.id())
        .await?;
    info!(
        seed_id = %seed.id,
        automation = entry.name(),
        deleted,
        "deleted automation transactions for regeneration"
    );

    trigger_automation(deps, seed_id, automation_id, true).await
}
