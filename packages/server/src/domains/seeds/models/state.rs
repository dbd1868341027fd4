use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::common::{SeedId, UserId};

/// A tag attached to a seed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tag {
    pub id: String,
    pub name: String,
}

/// A category attached to a seed. `path` is slash-separated, `name` is its
/// last segment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Category {
    pub id: String,
    pub name: String,
    pub path: String,
}

/// Current state of a seed, derived by replaying its transaction log.
///
/// Never persisted. The JSON form is the document that transaction patches
/// address: content lives at `/seed`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeedState {
    #[serde(rename = "seed")]
    pub content: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
    #[serde(default)]
    pub tags: Vec<Tag>,
    #[serde(default)]
    pub categories: Vec<Category>,
}

impl SeedState {
    pub fn has_tag(&self, name: &str) -> bool {
        self.tags
            .iter()
            .any(|tag| tag.name.trim().eq_ignore_ascii_case(name.trim()))
    }

    pub fn has_category(&self, path: &str) -> bool {
        self.categories
            .iter()
            .any(|category| category.path.trim().eq_ignore_ascii_case(path.trim()))
    }

    pub fn word_count(&self) -> usize {
        self.content.split_whitespace().count()
    }
}

/// Base snapshot every replay starts from.
pub fn create_base(content: impl Into<String>, created_at: DateTime<Utc>) -> SeedState {
    SeedState {
        content: content.into(),
        timestamp: created_at,
        metadata: Map::new(),
        tags: Vec::new(),
        categories: Vec::new(),
    }
}

/// Read-only view of a seed handed to automations.
#[derive(Debug, Clone)]
pub struct SeedSnapshot {
    pub id: SeedId,
    pub user_id: UserId,
    pub state: SeedState,
}
