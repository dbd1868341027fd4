use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::state::{create_base, SeedState};
use crate::common::{SeedId, UserId};

/// Persisted seed row. `content` is the text the seed was created with; the
/// current content comes from replaying the seed's transactions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Seed {
    pub id: SeedId,
    pub user_id: UserId,
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub archived_at: Option<DateTime<Utc>>,
}

impl Seed {
    pub fn new(user_id: UserId, content: impl Into<String>) -> Self {
        Self {
            id: SeedId::new(),
            user_id,
            content: content.into(),
            created_at: Utc::now(),
            archived_at: None,
        }
    }

    /// Archived seeds are never evaluated by the scheduler.
    pub fn is_active(&self) -> bool {
        self.archived_at.is_none()
    }

    pub fn base_state(&self) -> SeedState {
        create_base(self.content.clone(), self.created_at)
    }
}
