//! Seed creation, lookup and archival.

use chrono::Utc;
use serde_json::json;
use tracing::{debug, info};

use crate::common::{AutomationId, SeedId, UserId};
use crate::domains::seeds::{Seed, SeedError, Transaction, TransactionDraft};
use crate::kernel::jobs::{submit_best_effort, AutomationJob, EnqueueOptions, SubmitOutcome, DEFAULT_PRIORITY};
use crate::kernel::ServerDeps;

/// Result of `create_seed`. `submissions` reports, per enabled automation,
/// whether its first run was queued; a failed submission never fails the
/// creation itself.
#[derive(Debug, Clone)]
pub struct CreatedSeed {
    pub seed: Seed,
    pub transaction: Transaction,
    pub submissions: Vec<(AutomationId, SubmitOutcome)>,
}

/// Creates a seed and its `create_seed` transaction in one store call, then
/// queues every enabled automation for it on a best-effort basis.
pub async fn create_seed(
    deps: &ServerDeps,
    user_id: UserId,
    content: &str,
) -> Result<CreatedSeed, SeedError> {
    let content = content.trim();
    if content.is_empty() {
        return Err(SeedError::EmptyContent);
    }

    let seed = Seed::new(user_id, content);
    let transaction = TransactionDraft::create_seed(seed.id, content).into_transaction(seed.created_at);

    deps.seeds.create(&seed, &transaction).await?;

    info!(seed_id = %seed.id, user_id = %user_id, "seed created");

    let submissions = queue_enabled_automations(deps, &seed).await;

    Ok(CreatedSeed {
        seed,
        transaction,
        submissions,
    })
}

async fn queue_enabled_automations(
    deps: &ServerDeps,
    seed: &Seed,
) -> Vec<(AutomationId, SubmitOutcome)> {
    let mut submissions = Vec::new();
    for entry in deps.registry.get_enabled() {
        let job = AutomationJob::new(seed.id, entry.id(), seed.user_id, DEFAULT_PRIORITY)
            .with_metadata(json!({ "trigger": "seed_created", "automation": entry.name() }));
        let outcome =
            submit_best_effort(deps.job_queue.as_ref(), job, EnqueueOptions::default()).await;
        submissions.push((entry.id(), outcome));
    }

    debug!(
        seed_id = %seed.id,
        queued = submissions.iter().filter(|(_, o)| o.job_id().is_some()).count(),
        failed = submissions.iter().filter(|(_, o)| *o == SubmitOutcome::Failed).count(),
        "queued automations for new seed"
    );
    submissions
}

pub async fn get_seed(deps: &ServerDeps, seed_id: SeedId) -> Result<Seed, SeedError> {
    deps.seeds
        .find(seed_id)
        .await?
        .ok_or(SeedError::NotFound(seed_id))
}

pub async fn list_seeds_for_user(deps: &ServerDeps, user_id: UserId) -> Result<Vec<Seed>, SeedError> {
    Ok(deps.seeds.list_for_user(user_id).await?)
}

/// Archived seeds keep their history but are no longer evaluated by the
/// scheduler.
pub async fn archive_seed(deps: &ServerDeps, seed_id: SeedId) -> Result<(), SeedError> {
    if !deps.seeds.archive(seed_id, Utc::now()).await? {
        return Err(SeedError::NotFound(seed_id));
    }
    info!(seed_id = %seed_id, "seed archived");
    Ok(())
}
