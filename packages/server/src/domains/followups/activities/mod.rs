//! Followups domain activities - reminder lifecycle
//!
//! ```text
//! Scheduled ──► Due ──► (Snoozed ──► Due)* ──► Dismissed
//! ```
//!
//! Rule checks live on the model; these functions load, apply and persist.
//! Persistence refuses to overwrite a dismissed followup, so two concurrent
//! dismissals cannot both succeed.

use chrono::{DateTime, Utc};
use tracing::info;

use crate::common::{FollowupId, SeedId, UserId};
use crate::domains::followups::{
    DismissalType, Followup, FollowupChanges, FollowupError, FollowupOrigin, NewFollowup,
};
use crate::kernel::ServerDeps;

pub async fn create(
    deps: &ServerDeps,
    seed_id: SeedId,
    input: NewFollowup,
    origin: FollowupOrigin,
) -> Result<Followup, FollowupError> {
    if deps.seeds.find(seed_id).await?.is_none() {
        return Err(FollowupError::SeedNotFound(seed_id));
    }

    let followup = Followup::create(seed_id, &input, origin, Utc::now())?;
    deps.followups.insert(&followup).await?;

    info!(followup_id = %followup.id, seed_id = %seed_id, origin = %origin, "followup created");
    Ok(followup)
}

pub async fn get(deps: &ServerDeps, id: FollowupId) -> Result<Followup, FollowupError> {
    deps.followups
        .find(id)
        .await?
        .ok_or(FollowupError::NotFound(id))
}

pub async fn list_for_seed(
    deps: &ServerDeps,
    seed_id: SeedId,
) -> Result<Vec<Followup>, FollowupError> {
    Ok(deps.followups.list_for_seed(seed_id).await?)
}

pub async fn edit(
    deps: &ServerDeps,
    id: FollowupId,
    changes: FollowupChanges,
) -> Result<Followup, FollowupError> {
    let mut followup = get(deps, id).await?;
    followup.edit(&changes)?;
    persist(deps, &followup).await?;

    info!(followup_id = %id, "followup edited");
    Ok(followup)
}

/// Pushes the due time forward by `duration_minutes`.
pub async fn snooze(
    deps: &ServerDeps,
    id: FollowupId,
    duration_minutes: i64,
    origin: FollowupOrigin,
) -> Result<Followup, FollowupError> {
    let mut followup = get(deps, id).await?;
    followup.snooze(duration_minutes, origin, Utc::now())?;
    persist(deps, &followup).await?;

    info!(
        followup_id = %id,
        duration_minutes,
        due_time = %followup.due_time,
        snooze_count = followup.snooze_count,
        "followup snoozed"
    );
    Ok(followup)
}

pub async fn dismiss(
    deps: &ServerDeps,
    id: FollowupId,
    kind: DismissalType,
) -> Result<Followup, FollowupError> {
    let mut followup = get(deps, id).await?;
    followup.dismiss(kind, Utc::now())?;
    persist(deps, &followup).await?;

    info!(followup_id = %id, dismissal_type = %kind, "followup dismissed");
    Ok(followup)
}

/// Non-dismissed followups across the user's seeds that are due now.
pub async fn list_due(deps: &ServerDeps, user_id: UserId) -> Result<Vec<Followup>, FollowupError> {
    list_due_at(deps, user_id, Utc::now()).await
}

/// `list_due` evaluated at `now`, ordered by due time.
pub async fn list_due_at(
    deps: &ServerDeps,
    user_id: UserId,
    now: DateTime<Utc>,
) -> Result<Vec<Followup>, FollowupError> {
    let seed_ids: Vec<SeedId> = deps
        .seeds
        .list_for_user(user_id)
        .await?
        .into_iter()
        .map(|seed| seed.id)
        .collect();
    if seed_ids.is_empty() {
        return Ok(Vec::new());
    }

    let mut due: Vec<Followup> = deps
        .followups
        .list_open_for_seeds(&seed_ids)
        .await?
        .into_iter()
        .filter(|followup| followup.is_due(now))
        .collect();
    due.sort_by(|a, b| a.due_time.cmp(&b.due_time).then_with(|| a.id.cmp(&b.id)));
    Ok(due)
}

/// Writes a changed followup. A refused write means the row was dismissed
/// concurrently, or is gone.
async fn persist(deps: &ServerDeps, followup: &Followup) -> Result<(), FollowupError> {
    if deps.followups.update(followup).await? {
        return Ok(());
    }
    match deps.followups.find(followup.id).await? {
        Some(_) => Err(FollowupError::AlreadyDismissed),
        None => Err(FollowupError::NotFound(followup.id)),
    }
}
