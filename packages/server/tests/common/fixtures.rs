//! Seed fixtures.

use chrono::{DateTime, Utc};
use seeds_core::common::UserId;
use seeds_core::domains::seeds::{Seed, TransactionDraft};
use seeds_core::kernel::ServerDeps;

/// Twenty plain words, no capitalized names and no time phrases.
pub const TWENTY_WORDS: &str = "garden beds need more compost and mulch before the frost \
     arrives so the soil stays warm and rich for seedlings";

/// Writes a seed and its `create_seed` transaction straight to the stores,
/// without queueing any automation.
pub async fn insert_seed(deps: &ServerDeps, content: &str) -> Seed {
    insert_seed_at(deps, content, Utc::now()).await
}

pub async fn insert_seed_at(deps: &ServerDeps, content: &str, created_at: DateTime<Utc>) -> Seed {
    let mut seed = Seed::new(UserId::new(), content);
    seed.created_at = created_at;

    let creation = TransactionDraft::create_seed(seed.id, content).into_transaction(created_at);
    deps.seeds.create(&seed, &creation).await.expect("create seed");
    seed
}
