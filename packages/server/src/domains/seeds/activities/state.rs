//! Seed state computation.

use std::sync::Arc;

use crate::common::SeedId;
use crate::domains::seeds::{replay, Seed, SeedError, SeedSnapshot, SeedState, Transaction};
use crate::kernel::ServerDeps;

use super::get_seed;

/// A seed's replayed snapshot together with the log it was replayed from.
#[derive(Debug, Clone)]
pub struct SeedView {
    pub snapshot: SeedSnapshot,
    /// Every transaction of the seed, enabled or not, in replay order.
    pub transactions: Arc<[Transaction]>,
}

/// Current state of a seed: its enabled transactions replayed over the base
/// snapshot built from its initial content.
pub async fn compute_state(deps: &ServerDeps, seed_id: SeedId) -> Result<SeedState, SeedError> {
    let seed = get_seed(deps, seed_id).await?;
    let transactions = deps.transactions.get_by_seed_id(seed.id).await?;
    Ok(replay(&seed.base_state(), &transactions)?)
}

/// Loads what the scheduler and workers hand to automations.
pub async fn load_seed_view(deps: &ServerDeps, seed: &Seed) -> Result<SeedView, SeedError> {
    let transactions = deps.transactions.get_by_seed_id(seed.id).await?;
    let state = replay(&seed.base_state(), &transactions)?;

    Ok(SeedView {
        snapshot: SeedSnapshot {
            id: seed.id,
            user_id: seed.user_id,
            state,
        },
        transactions: transactions.into(),
    })
}
