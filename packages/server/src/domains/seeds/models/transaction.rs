use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::common::{AutomationId, SeedId, TransactionId};
use crate::domains::seeds::patch::{PatchOperation, ValidationError};

// ============================================================================
// Transaction type
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionType {
    CreateSeed,
    EditContent,
    AddTag,
    RemoveTag,
    SetCategory,
    RemoveCategory,
    SetMetadata,
    AddMusing,
    AddReference,
    ScheduleFollowup,
}

impl TransactionType {
    pub const ALL: [TransactionType; 10] = [
        TransactionType::CreateSeed,
        TransactionType::EditContent,
        TransactionType::AddTag,
        TransactionType::RemoveTag,
        TransactionType::SetCategory,
        TransactionType::RemoveCategory,
        TransactionType::SetMetadata,
        TransactionType::AddMusing,
        TransactionType::AddReference,
        TransactionType::ScheduleFollowup,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionType::CreateSeed => "create_seed",
            TransactionType::EditContent => "edit_content",
            TransactionType::AddTag => "add_tag",
            TransactionType::RemoveTag => "remove_tag",
            TransactionType::SetCategory => "set_category",
            TransactionType::RemoveCategory => "remove_category",
            TransactionType::SetMetadata => "set_metadata",
            TransactionType::AddMusing => "add_musing",
            TransactionType::AddReference => "add_reference",
            TransactionType::ScheduleFollowup => "schedule_followup",
        }
    }

    /// Whether `data` for this type must be a list of patch operations.
    /// Other types carry a structured payload and never touch seed state.
    pub fn is_patch_shaped(&self) -> bool {
        !matches!(self, TransactionType::ScheduleFollowup)
    }
}

impl fmt::Display for TransactionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransactionType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TransactionType::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| anyhow::anyhow!("unknown transaction type: {}", s))
    }
}

// ============================================================================
// Transaction data
// ============================================================================

/// Either a patch against the seed document or a structured payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TransactionData {
    Patch(Vec<PatchOperation>),
    Payload(Value),
}

impl TransactionData {
    pub fn as_patch(&self) -> Option<&[PatchOperation]> {
        match self {
            TransactionData::Patch(ops) => Some(ops),
            TransactionData::Payload(_) => None,
        }
    }
}

// ============================================================================
// Transaction
// ============================================================================

/// Immutable seed log entry. Only `enabled` changes after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: TransactionId,
    pub seed_id: SeedId,
    #[serde(rename = "type")]
    pub transaction_type: TransactionType,
    pub data: TransactionData,
    pub created_at: DateTime<Utc>,
    pub automation_id: Option<AutomationId>,
    pub enabled: bool,
}

impl Transaction {
    /// Patch operations this transaction applies to seed state.
    ///
    /// Returns `Ok(None)` for payload-shaped types and an error when a
    /// patch-shaped type carries something other than a patch list.
    pub fn state_patch(&self) -> Result<Option<&[PatchOperation]>, ValidationError> {
        if !self.transaction_type.is_patch_shaped() {
            return Ok(None);
        }
        match &self.data {
            TransactionData::Patch(ops) => Ok(Some(ops)),
            TransactionData::Payload(_) => Err(ValidationError::NotAPatch {
                kind: self.transaction_type,
            }),
        }
    }

    pub fn is_from_automation(&self) -> bool {
        self.automation_id.is_some()
    }
}

/// A transaction that has not been persisted yet. Automations return these;
/// the worker stamps and commits them.
#[derive(Debug, Clone, PartialEq)]
pub struct TransactionDraft {
    pub seed_id: SeedId,
    pub transaction_type: TransactionType,
    pub data: TransactionData,
    pub automation_id: Option<AutomationId>,
}

impl TransactionDraft {
    pub fn patch(
        seed_id: SeedId,
        transaction_type: TransactionType,
        ops: Vec<PatchOperation>,
    ) -> Self {
        Self {
            seed_id,
            transaction_type,
            data: TransactionData::Patch(ops),
            automation_id: None,
        }
    }

    pub fn payload(seed_id: SeedId, transaction_type: TransactionType, payload: Value) -> Self {
        Self {
            seed_id,
            transaction_type,
            data: TransactionData::Payload(payload),
            automation_id: None,
        }
    }

    /// The transaction that records a seed's initial content.
    pub fn create_seed(seed_id: SeedId, content: &str) -> Self {
        Self::patch(
            seed_id,
            TransactionType::CreateSeed,
            vec![PatchOperation::replace("/seed", Value::String(content.to_string()))],
        )
    }

    pub fn by_automation(mut self, automation_id: AutomationId) -> Self {
        self.automation_id = Some(automation_id);
        self
    }

    pub fn into_transaction(self, created_at: DateTime<Utc>) -> Transaction {
        Transaction {
            id: TransactionId::new(),
            seed_id: self.seed_id,
            transaction_type: self.transaction_type,
            data: self.data,
            created_at,
            automation_id: self.automation_id,
            enabled: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn patch_data_deserializes_from_operation_list() {
        let data: TransactionData =
            serde_json::from_value(json!([{"op": "add", "path": "/tags/-", "value": {"id": "1", "name": "work"}}]))
                .expect("deserialize");
        assert!(matches!(data, TransactionData::Patch(ref ops) if ops.len() == 1));
    }

    #[test]
    fn object_data_is_a_payload() {
        let data: TransactionData =
            serde_json::from_value(json!({"due_time": "2026-01-01T00:00:00Z", "message": "call"}))
                .expect("deserialize");
        assert!(matches!(data, TransactionData::Payload(_)));
    }

    #[test]
    fn patch_shaped_type_with_payload_is_rejected() {
        let tx = TransactionDraft::payload(SeedId::new(), TransactionType::AddTag, json!({"name": "x"}))
            .into_transaction(Utc::now());
        assert_eq!(
            tx.state_patch(),
            Err(ValidationError::NotAPatch {
                kind: TransactionType::AddTag
            })
        );
    }

    #[test]
    fn followup_payload_has_no_state_patch() {
        let tx = TransactionDraft::payload(
            SeedId::new(),
            TransactionType::ScheduleFollowup,
            json!({"message": "call"}),
        )
        .into_transaction(Utc::now());
        assert_eq!(tx.state_patch(), Ok(None));
    }

    #[test]
    fn type_names_round_trip() {
        for kind in TransactionType::ALL {
            assert_eq!(kind.as_str().parse::<TransactionType>().expect("parse"), kind);
        }
        assert!("explode".parse::<TransactionType>().is_err());
    }
}
