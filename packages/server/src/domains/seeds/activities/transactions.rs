//! Appending to and toggling a seed's transaction log.

use chrono::Utc;
use serde_json::Value;
use tracing::info;

use crate::common::{SeedId, TransactionId};
use crate::domains::seeds::patch::{validate, PatchOperation, ValidationError};
use crate::domains::seeds::{
    SeedError, Transaction, TransactionData, TransactionDraft, TransactionType,
};
use crate::kernel::ServerDeps;

use super::get_seed;

/// Appends a user-authored transaction.
///
/// Patch-shaped types are validated first; an invalid patch is never
/// stored.
pub async fn record_transaction(
    deps: &ServerDeps,
    seed_id: SeedId,
    transaction_type: TransactionType,
    data: TransactionData,
) -> Result<Transaction, SeedError> {
    let seed = get_seed(deps, seed_id).await?;

    if transaction_type.is_patch_shaped() {
        let ops = data.as_patch().ok_or(ValidationError::NotAPatch {
            kind: transaction_type,
        })?;
        validate(ops)?;
    }

    let transaction = TransactionDraft {
        seed_id: seed.id,
        transaction_type,
        data,
        automation_id: None,
    }
    .into_transaction(Utc::now());

    deps.transactions.append(&transaction).await?;

    info!(
        seed_id = %seed.id,
        transaction_id = %transaction.id,
        transaction_type = %transaction.transaction_type,
        "transaction recorded"
    );
    Ok(transaction)
}

/// Replaces the seed's content.
pub async fn edit_content(
    deps: &ServerDeps,
    seed_id: SeedId,
    content: &str,
) -> Result<Transaction, SeedError> {
    let content = content.trim();
    if content.is_empty() {
        return Err(SeedError::EmptyContent);
    }
    record_transaction(
        deps,
        seed_id,
        TransactionType::EditContent,
        TransactionData::Patch(vec![PatchOperation::replace(
            "/seed",
            Value::String(content.to_string()),
        )]),
    )
    .await
}

/// Includes or excludes a transaction from replay without deleting it.
pub async fn set_transaction_enabled(
    deps: &ServerDeps,
    transaction_id: TransactionId,
    enabled: bool,
) -> Result<Transaction, SeedError> {
    let transaction = deps
        .transactions
        .set_enabled(transaction_id, enabled)
        .await?
        .ok_or(SeedError::TransactionNotFound(transaction_id))?;

    info!(
        seed_id = %transaction.seed_id,
        transaction_id = %transaction_id,
        enabled,
        "transaction toggled"
    );
    Ok(transaction)
}

pub async fn list_transactions(
    deps: &ServerDeps,
    seed_id: SeedId,
) -> Result<Vec<Transaction>, SeedError> {
    let seed = get_seed(deps, seed_id).await?;
    Ok(deps.transactions.get_by_seed_id(seed.id).await?)
}
