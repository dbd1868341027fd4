// Trait definitions for dependency injection
//
// These are INFRASTRUCTURE traits only - no business logic.
// Stores persist and load; ordering, validation and state rules live in domains.
//
// Naming convention: Base* for trait names (e.g., BaseAI, BaseSeedStore)

use std::collections::HashMap;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::common::{AutomationId, FollowupId, SeedId, TransactionId, UserId};
use crate::domains::automations::{AutomationSettings, RunCommit};
use crate::domains::followups::Followup;
use crate::domains::seeds::{Seed, Transaction};

// =============================================================================
// AI Trait (Infrastructure - content generation)
// =============================================================================

#[async_trait]
pub trait BaseAI: Send + Sync {
    /// Complete a prompt with an LLM (returns raw text response)
    async fn complete(&self, prompt: &str) -> Result<String>;

    /// Complete a prompt expecting JSON response (returns raw JSON string)
    /// Parse with `kernel::ai::parse_structured` in calling code
    async fn complete_json(&self, prompt: &str) -> Result<String> {
        self.complete(prompt).await
    }

    /// Generate with tool calling support
    /// Returns the assistant's response which may include tool_calls
    async fn generate_with_tools(
        &self,
        messages: &[serde_json::Value],
        tools: &serde_json::Value,
    ) -> Result<serde_json::Value> {
        // Default implementation - not all providers support tools
        let _ = tools;
        let last_user = messages
            .iter()
            .rev()
            .find(|m| m.get("role").and_then(|r| r.as_str()) == Some("user"))
            .and_then(|m| m.get("content"))
            .and_then(|c| c.as_str())
            .unwrap_or("");
        let response = self.complete(last_user).await?;
        Ok(serde_json::json!({ "content": response }))
    }
}

// =============================================================================
// Seed Store (Infrastructure)
// =============================================================================

#[async_trait]
pub trait BaseSeedStore: Send + Sync {
    /// Persists a new seed together with its `create_seed` transaction.
    /// Either both are stored or neither is.
    async fn create(&self, seed: &Seed, creation: &Transaction) -> Result<()>;

    async fn find(&self, id: SeedId) -> Result<Option<Seed>>;

    /// Seeds that are not archived.
    async fn list_active(&self) -> Result<Vec<Seed>>;

    async fn list_for_user(&self, user_id: UserId) -> Result<Vec<Seed>>;

    /// Returns false when the seed does not exist.
    async fn archive(&self, id: SeedId, at: DateTime<Utc>) -> Result<bool>;
}

// =============================================================================
// Transaction Store (Infrastructure)
// =============================================================================

/// Durable transaction log.
///
/// Implementations serialize appends per seed (single writer per seed) so two
/// jobs committing to the same seed never lose each other's writes.
#[async_trait]
pub trait BaseTransactionStore: Send + Sync {
    async fn append(&self, transaction: &Transaction) -> Result<TransactionId>;

    /// Appends every transaction or none of them.
    async fn append_all(&self, transactions: &[Transaction]) -> Result<()>;

    /// All transactions of a seed, enabled or not, ordered by
    /// `created_at` then id.
    async fn get_by_seed_id(&self, seed_id: SeedId) -> Result<Vec<Transaction>>;

    async fn find(&self, id: TransactionId) -> Result<Option<Transaction>>;

    /// Returns the updated transaction, or `None` when it does not exist.
    async fn set_enabled(&self, id: TransactionId, enabled: bool) -> Result<Option<Transaction>>;

    /// Physically deletes what an automation produced for a seed. Only the
    /// administrative regenerate path calls this.
    async fn delete_by_automation(&self, seed_id: SeedId, automation_id: AutomationId)
        -> Result<u64>;
}

// =============================================================================
// Followup Store (Infrastructure)
// =============================================================================

#[async_trait]
pub trait BaseFollowupStore: Send + Sync {
    async fn insert(&self, followup: &Followup) -> Result<()>;

    async fn find(&self, id: FollowupId) -> Result<Option<Followup>>;

    /// Writes `followup` unless the stored row is already dismissed.
    /// Returns false when the write was refused.
    async fn update(&self, followup: &Followup) -> Result<bool>;

    async fn list_for_seed(&self, seed_id: SeedId) -> Result<Vec<Followup>>;

    /// Followups of the given seeds that are not dismissed.
    async fn list_open_for_seeds(&self, seed_ids: &[SeedId]) -> Result<Vec<Followup>>;
}

// =============================================================================
// Automation Settings Store (Infrastructure)
// =============================================================================

#[async_trait]
pub trait BaseAutomationSettingsStore: Send + Sync {
    async fn load(&self) -> Result<Vec<AutomationSettings>>;

    async fn insert(&self, settings: &AutomationSettings) -> Result<()>;

    async fn set_enabled(&self, id: AutomationId, enabled: bool) -> Result<()>;
}

// =============================================================================
// Automation Run Store (Infrastructure)
// =============================================================================

/// Automation run bookkeeping.
///
/// `commit_run` is the only write a finished job makes: its transactions,
/// the followups they schedule and the run marker land together or not at
/// all, so a retried job never finds half of an earlier attempt stored.
#[async_trait]
pub trait BaseAutomationRunStore: Send + Sync {
    /// Stores `run` atomically. The run marker keeps the latest
    /// `finished_at` seen for the (seed, automation) pair.
    async fn commit_run(&self, run: &RunCommit) -> Result<()>;

    /// When each automation last finished a run against the seed, whether
    /// or not the run produced transactions.
    async fn last_runs(&self, seed_id: SeedId) -> Result<HashMap<AutomationId, DateTime<Utc>>>;
}
