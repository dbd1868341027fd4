//! Patch validation for seed transactions.
//!
//! Transactions describe state changes as JSON-Patch-shaped operation lists
//! against the seed document. Only a narrow subset is accepted:
//!
//! - `op` is one of `add`, `remove`, `replace`
//! - `path` addresses `/tags`, `/categories`, `/metadata` or `/seed`
//! - `add` and `replace` carry a `value` (which may be `null`)
//!
//! Validation is pure and runs before any mutation, both when a transaction
//! is recorded and again when it is replayed.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use super::models::TransactionType;

pub const ALLOWED_OPS: [&str; 3] = ["add", "remove", "replace"];

pub const ALLOWED_PATH_ROOTS: [&str; 4] = ["/tags", "/categories", "/metadata", "/seed"];

/// One raw patch operation as stored in a transaction.
///
/// Fields are kept as strings so that unknown operations survive
/// deserialization and can be rejected with a precise error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatchOperation {
    pub op: String,
    pub path: String,
    #[serde(
        default,
        deserialize_with = "deserialize_present",
        skip_serializing_if = "Option::is_none"
    )]
    pub value: Option<Value>,
}

/// Distinguishes `"value": null` (present) from a missing `value`.
fn deserialize_present<'de, D>(deserializer: D) -> Result<Option<Value>, D::Error>
where
    D: Deserializer<'de>,
{
    Value::deserialize(deserializer).map(Some)
}

impl PatchOperation {
    pub fn add(path: impl Into<String>, value: Value) -> Self {
        Self {
            op: "add".to_string(),
            path: path.into(),
            value: Some(value),
        }
    }

    pub fn remove(path: impl Into<String>) -> Self {
        Self {
            op: "remove".to_string(),
            path: path.into(),
            value: None,
        }
    }

    pub fn replace(path: impl Into<String>, value: Value) -> Self {
        Self {
            op: "replace".to_string(),
            path: path.into(),
            value: Some(value),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("patch must contain at least one operation")]
    EmptyPatch,

    #[error("operation {index}: op must not be empty")]
    MissingOp { index: usize },

    #[error("operation {index}: path must not be empty")]
    MissingPath { index: usize },

    #[error("operation {index}: unsupported op `{op}` (expected add, remove or replace)")]
    UnsupportedOp { index: usize, op: String },

    #[error("operation {index}: path `{path}` is outside /tags, /categories, /metadata and /seed")]
    DisallowedPath { index: usize, path: String },

    #[error("operation {index}: `{op}` at `{path}` requires a value")]
    MissingValue {
        index: usize,
        op: String,
        path: String,
    },

    #[error("{kind} transactions must carry a list of patch operations")]
    NotAPatch { kind: TransactionType },
}

/// Checks an operation list against the op/path allow-list.
pub fn validate(patch: &[PatchOperation]) -> Result<(), ValidationError> {
    if patch.is_empty() {
        return Err(ValidationError::EmptyPatch);
    }

    for (index, operation) in patch.iter().enumerate() {
        validate_operation(index, operation)?;
    }

    Ok(())
}

fn validate_operation(index: usize, operation: &PatchOperation) -> Result<(), ValidationError> {
    let op = operation.op.trim();
    if op.is_empty() {
        return Err(ValidationError::MissingOp { index });
    }
    if operation.path.is_empty() {
        return Err(ValidationError::MissingPath { index });
    }
    if !ALLOWED_OPS.contains(&operation.op.as_str()) {
        return Err(ValidationError::UnsupportedOp {
            index,
            op: operation.op.clone(),
        });
    }
    if !is_allowed_path(&operation.path) {
        return Err(ValidationError::DisallowedPath {
            index,
            path: operation.path.clone(),
        });
    }
    if operation.op != "remove" && operation.value.is_none() {
        return Err(ValidationError::MissingValue {
            index,
            op: operation.op.clone(),
            path: operation.path.clone(),
        });
    }
    Ok(())
}

/// A path is allowed when its first segment is one of the allowed roots.
/// `/seedling` does not match `/seed`.
fn is_allowed_path(path: &str) -> bool {
    ALLOWED_PATH_ROOTS.iter().any(|root| {
        path.strip_prefix(root)
            .is_some_and(|rest| rest.is_empty() || rest.starts_with('/'))
    })
}

/// Converts validated operations into a `json_patch::Patch`.
pub fn to_json_patch(patch: &[PatchOperation]) -> Result<json_patch::Patch, serde_json::Error> {
    serde_json::from_value(serde_json::to_value(patch)?)
}
