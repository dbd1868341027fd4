//! Deterministic state replay.
//!
//! A seed's current state is a fold of its enabled transactions, ordered by
//! `created_at` then by transaction id, over a base snapshot:
//!
//! ```text
//! base ──► tx₁ ──► tx₂ ──► … ──► current state
//!          │       │
//!          │       └─ apply fails → logged, skipped
//!          └─ invalid patch → ValidationError, replay aborts
//! ```
//!
//! The result depends only on the set of enabled transactions, never on the
//! order the caller passed them in.

use serde_json::{Map, Value};
use tracing::{error, warn};

use super::models::{SeedState, Transaction};
use super::patch::{to_json_patch, validate, PatchOperation, ValidationError};

/// Failure applying one otherwise-valid transaction. Replay skips it.
#[derive(Debug, thiserror::Error)]
pub enum ApplyError {
    #[error("patch could not be decoded: {0}")]
    Malformed(#[source] serde_json::Error),

    #[error("state could not be encoded: {0}")]
    Encode(#[source] serde_json::Error),

    #[error("patch failed: {0}")]
    Patch(#[from] json_patch::PatchError),

    #[error("patched state has an invalid shape: {0}")]
    Shape(#[source] serde_json::Error),
}

/// Replays `transactions` onto `base`.
///
/// Disabled transactions are ignored. Payload-shaped transactions (such as
/// scheduled followups) do not describe state and are passed over. An invalid
/// patch aborts the replay; a patch that fails to apply is skipped.
pub fn replay(base: &SeedState, transactions: &[Transaction]) -> Result<SeedState, ValidationError> {
    let mut ordered: Vec<&Transaction> = transactions.iter().filter(|tx| tx.enabled).collect();
    ordered.sort_by(|a, b| {
        a.created_at
            .cmp(&b.created_at)
            .then_with(|| a.id.cmp(&b.id))
    });

    let mut state = base.clone();

    for transaction in ordered {
        let Some(ops) = transaction.state_patch()? else {
            continue;
        };

        if let Err(e) = validate(ops) {
            error!(
                transaction_id = %transaction.id,
                seed_id = %transaction.seed_id,
                error = %e,
                "invalid patch in transaction log"
            );
            return Err(e);
        }

        match apply_patch(&state, ops) {
            Ok(next) => state = next,
            Err(e) => {
                warn!(
                    transaction_id = %transaction.id,
                    seed_id = %transaction.seed_id,
                    transaction_type = %transaction.transaction_type,
                    error = %e,
                    "skipping transaction that could not be applied"
                );
            }
        }
    }

    Ok(state)
}

/// Applies one validated patch to a copy of `state`.
///
/// All operations of the patch succeed together or `state` is left as it
/// was; the caller's value is never touched.
pub fn apply_patch(state: &SeedState, ops: &[PatchOperation]) -> Result<SeedState, ApplyError> {
    let patch = to_json_patch(ops).map_err(ApplyError::Malformed)?;
    let mut document = serde_json::to_value(state).map_err(ApplyError::Encode)?;

    json_patch::patch(&mut document, &patch.0)?;
    ensure_collections(&mut document);

    serde_json::from_value(document).map_err(ApplyError::Shape)
}

/// Restores `metadata`, `tags` and `categories` when a patch removed them or
/// set them to null.
fn ensure_collections(document: &mut Value) {
    let Some(object) = document.as_object_mut() else {
        return;
    };

    let defaults = [
        ("metadata", Value::Object(Map::new())),
        ("tags", Value::Array(Vec::new())),
        ("categories", Value::Array(Vec::new())),
    ];

    for (key, default) in defaults {
        match object.get(key) {
            None | Some(Value::Null) => {
                object.insert(key.to_string(), default);
            }
            Some(_) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::SeedId;
    use crate::domains::seeds::models::{create_base, TransactionDraft, TransactionType};
    use chrono::{DateTime, Duration, Utc};
    use serde_json::json;

    fn at(base: DateTime<Utc>, seconds: i64) -> DateTime<Utc> {
        base + Duration::seconds(seconds)
    }

    fn tx(
        seed_id: SeedId,
        kind: TransactionType,
        ops: Vec<PatchOperation>,
        created_at: DateTime<Utc>,
    ) -> Transaction {
        TransactionDraft::patch(seed_id, kind, ops).into_transaction(created_at)
    }

    fn add_tag(seed_id: SeedId, id: &str, name: &str, created_at: DateTime<Utc>) -> Transaction {
        tx(
            seed_id,
            TransactionType::AddTag,
            vec![PatchOperation::add("/tags/-", json!({"id": id, "name": name}))],
            created_at,
        )
    }

    #[test]
    fn create_seed_transaction_yields_content_and_empty_collections() {
        let seed_id = SeedId::new();
        let now = Utc::now();
        let base = create_base("draft", now);
        let create = TransactionDraft::create_seed(seed_id, "draft").into_transaction(now);

        let state = replay(&base, &[create]).expect("replay");

        let value = serde_json::to_value(&state).expect("serialize");
        assert_eq!(value["seed"], json!("draft"));
        assert_eq!(value["tags"], json!([]));
        assert_eq!(value["categories"], json!([]));
    }

    #[test]
    fn disabled_transaction_is_excluded() {
        let seed_id = SeedId::new();
        let now = Utc::now();
        let base = create_base("draft", now);
        let mut tag = add_tag(seed_id, "1", "work", at(now, 1));

        let state = replay(&base, std::slice::from_ref(&tag)).expect("replay");
        assert_eq!(state.tags.len(), 1);

        tag.enabled = false;
        let state = replay(&base, &[tag]).expect("replay");
        assert!(state.tags.is_empty());
    }

    #[test]
    fn result_is_independent_of_input_order() {
        let seed_id = SeedId::new();
        let now = Utc::now();
        let base = create_base("draft", now);
        let transactions = vec![
            add_tag(seed_id, "1", "work", at(now, 1)),
            tx(
                seed_id,
                TransactionType::EditContent,
                vec![PatchOperation::replace("/seed", json!("edited"))],
                at(now, 2),
            ),
            tx(
                seed_id,
                TransactionType::RemoveTag,
                vec![PatchOperation::remove("/tags/0")],
                at(now, 3),
            ),
            add_tag(seed_id, "2", "home", at(now, 4)),
            tx(
                seed_id,
                TransactionType::SetMetadata,
                vec![PatchOperation::add("/metadata/mood", json!("calm"))],
                at(now, 4),
            ),
        ];

        let expected = replay(&base, &transactions).expect("replay");
        assert_eq!(expected.content, "edited");
        assert_eq!(expected.tags.len(), 1);
        assert_eq!(expected.tags[0].name, "home");

        let mut reversed = transactions.clone();
        reversed.reverse();
        assert_eq!(replay(&base, &reversed).expect("replay"), expected);

        let mut rotated = transactions.clone();
        rotated.rotate_left(2);
        assert_eq!(replay(&base, &rotated).expect("replay"), expected);
    }

    #[test]
    fn equal_timestamps_are_ordered_by_id() {
        let seed_id = SeedId::new();
        let now = Utc::now();
        let base = create_base("draft", now);
        let first = tx(
            seed_id,
            TransactionType::EditContent,
            vec![PatchOperation::replace("/seed", json!("first"))],
            now,
        );
        let second = tx(
            seed_id,
            TransactionType::EditContent,
            vec![PatchOperation::replace("/seed", json!("second"))],
            now,
        );
        assert!(first.id < second.id);

        let state = replay(&base, &[second.clone(), first.clone()]).expect("replay");
        assert_eq!(state.content, "second");
    }

    #[test]
    fn invalid_patch_aborts_replay() {
        let seed_id = SeedId::new();
        let now = Utc::now();
        let base = create_base("draft", now);
        let bad = tx(
            seed_id,
            TransactionType::SetMetadata,
            vec![PatchOperation::replace("/timestamp", json!("2020-01-01T00:00:00Z"))],
            at(now, 1),
        );

        let err = replay(&base, &[bad]).expect_err("must reject");
        assert!(matches!(err, ValidationError::DisallowedPath { .. }));
    }

    #[test]
    fn failed_apply_is_skipped_and_replay_continues() {
        let seed_id = SeedId::new();
        let now = Utc::now();
        let base = create_base("draft", now);
        let transactions = vec![
            tx(
                seed_id,
                TransactionType::RemoveTag,
                vec![PatchOperation::remove("/tags/5")],
                at(now, 1),
            ),
            add_tag(seed_id, "1", "work", at(now, 2)),
        ];

        let state = replay(&base, &transactions).expect("replay");
        assert_eq!(state.tags.len(), 1);
    }

    #[test]
    fn partially_failing_transaction_leaves_no_trace() {
        let seed_id = SeedId::new();
        let now = Utc::now();
        let base = create_base("draft", now);
        let mixed = tx(
            seed_id,
            TransactionType::AddTag,
            vec![
                PatchOperation::add("/tags/-", json!({"id": "1", "name": "work"})),
                PatchOperation::remove("/categories/3"),
            ],
            at(now, 1),
        );

        let state = replay(&base, &[mixed]).expect("replay");
        assert!(state.tags.is_empty());
    }

    #[test]
    fn removed_collections_are_restored() {
        let seed_id = SeedId::new();
        let now = Utc::now();
        let base = create_base("draft", now);
        let transactions = vec![
            add_tag(seed_id, "1", "work", at(now, 1)),
            tx(
                seed_id,
                TransactionType::SetMetadata,
                vec![
                    PatchOperation::remove("/metadata"),
                    PatchOperation::remove("/tags"),
                    PatchOperation::replace("/categories", Value::Null),
                ],
                at(now, 2),
            ),
        ];

        let state = replay(&base, &transactions).expect("replay");
        assert!(state.metadata.is_empty());
        assert!(state.tags.is_empty());
        assert!(state.categories.is_empty());
    }

    #[test]
    fn wrongly_shaped_result_is_skipped() {
        let seed_id = SeedId::new();
        let now = Utc::now();
        let base = create_base("draft", now);
        let transactions = vec![tx(
            seed_id,
            TransactionType::SetMetadata,
            vec![PatchOperation::replace("/tags", json!("not a list"))],
            at(now, 1),
        )];

        let state = replay(&base, &transactions).expect("replay");
        assert!(state.tags.is_empty());
    }

    #[test]
    fn base_is_not_mutated() {
        let seed_id = SeedId::new();
        let now = Utc::now();
        let base = create_base("draft", now);
        let snapshot = base.clone();

        let state = replay(&base, &[add_tag(seed_id, "1", "work", at(now, 1))]).expect("replay");
        assert_eq!(state.tags.len(), 1);
        assert_eq!(base, snapshot);
    }

    #[test]
    fn followup_payloads_do_not_touch_state() {
        let seed_id = SeedId::new();
        let now = Utc::now();
        let base = create_base("draft", now);
        let followup = TransactionDraft::payload(
            seed_id,
            TransactionType::ScheduleFollowup,
            json!({"due_time": "2026-01-01T00:00:00Z", "message": "call"}),
        )
        .into_transaction(at(now, 1));

        assert_eq!(replay(&base, &[followup]).expect("replay"), base);
    }
}
