use serde::{Deserialize, Serialize};

use crate::common::AutomationId;

/// Persisted configuration row for one automation kind.
///
/// `name` ties the row to its implementation; `enabled` is the only field
/// operators change at runtime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct AutomationSettings {
    pub id: AutomationId,
    pub name: String,
    pub description: String,
    pub enabled: bool,
}

impl AutomationSettings {
    /// Default row for a kind that has never been persisted. New kinds start
    /// enabled.
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            id: AutomationId::new(),
            name: name.into(),
            description: description.into(),
            enabled: true,
        }
    }
}
