//! The automation capability.
//!
//! An automation scores how ready a seed is for it (`calculate_pressure`),
//! and when asked, does its work (`process`) by returning transaction drafts.
//! It never persists anything itself: the worker commits a job's drafts
//! together or not at all.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::json;

use crate::common::{AutomationId, JobId, UserId};
use crate::domains::seeds::{SeedSnapshot, Transaction, TransactionDraft, TransactionType};
use crate::kernel::jobs::{
    submit_best_effort, AutomationJob, EnqueueOptions, JobQueue, SubmitOutcome,
};
use crate::kernel::BaseAI;

/// Pressure at or above which an automation queues itself.
pub const DEFAULT_THRESHOLD: f64 = 75.0;

pub const MIN_PRESSURE: f64 = 0.0;
pub const MAX_PRESSURE: f64 = 100.0;

/// Clamps a raw score into `[0, 100]`. NaN counts as no pressure.
pub fn clamp_pressure(raw: f64) -> f64 {
    if raw.is_nan() {
        return MIN_PRESSURE;
    }
    raw.clamp(MIN_PRESSURE, MAX_PRESSURE)
}

// ============================================================================
// Context
// ============================================================================

/// Everything an automation may consult besides the seed snapshot.
#[derive(Clone)]
pub struct AutomationContext {
    pub ai: Arc<dyn BaseAI>,
    pub automation_id: AutomationId,
    pub user_id: UserId,
    /// The seed's full transaction log, enabled or not, in replay order.
    pub transactions: Arc<[Transaction]>,
    /// When this automation last finished a run against the seed.
    pub last_run_at: Option<DateTime<Utc>>,
    pub now: DateTime<Utc>,
}

impl AutomationContext {
    pub fn has_run(&self) -> bool {
        self.last_run_at.is_some()
    }

    /// User edits (enabled, not produced by any automation) after this
    /// automation's last run, or since creation when it never ran. The
    /// `create_seed` transaction is not an edit.
    pub fn edits_since_last_run(&self) -> usize {
        self.transactions
            .iter()
            .filter(|tx| tx.enabled && !tx.is_from_automation())
            .filter(|tx| tx.transaction_type != TransactionType::CreateSeed)
            .filter(|tx| match self.last_run_at {
                Some(last_run) => tx.created_at > last_run,
                None => true,
            })
            .count()
    }

    /// Time of the most recent user-authored transaction.
    pub fn last_user_activity_at(&self) -> Option<DateTime<Utc>> {
        self.transactions
            .iter()
            .filter(|tx| tx.enabled && !tx.is_from_automation())
            .map(|tx| tx.created_at)
            .max()
    }
}

// ============================================================================
// Pressure outcome
// ============================================================================

/// Best-effort result of `Automation::handle_pressure`. Never an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PressureOutcome {
    BelowThreshold,
    Enqueued(JobId),
    Duplicate(JobId),
    /// Submission failed and was logged.
    Failed,
}

impl From<SubmitOutcome> for PressureOutcome {
    fn from(outcome: SubmitOutcome) -> Self {
        match outcome {
            SubmitOutcome::Enqueued(id) => PressureOutcome::Enqueued(id),
            SubmitOutcome::Duplicate(id) => PressureOutcome::Duplicate(id),
            SubmitOutcome::Failed => PressureOutcome::Failed,
        }
    }
}

// ============================================================================
// Automation
// ============================================================================

#[async_trait]
pub trait Automation: Send + Sync {
    /// Stable name that ties the implementation to its settings row.
    fn name(&self) -> &'static str;

    fn description(&self) -> &'static str;

    fn threshold(&self) -> f64 {
        DEFAULT_THRESHOLD
    }

    /// How ready `seed` is for this automation, in `[0, 100]`.
    async fn calculate_pressure(&self, seed: &SeedSnapshot, ctx: &AutomationContext)
        -> Result<f64>;

    /// Does the work and returns the transactions to append.
    async fn process(
        &self,
        seed: &SeedSnapshot,
        ctx: &AutomationContext,
    ) -> Result<Vec<TransactionDraft>>;

    /// Queues a run with `priority = pressure` once `pressure` reaches the
    /// threshold. Queue failures are logged and reported, never returned.
    async fn handle_pressure(
        &self,
        seed: &SeedSnapshot,
        pressure: f64,
        ctx: &AutomationContext,
        queue: &dyn JobQueue,
    ) -> PressureOutcome {
        let pressure = clamp_pressure(pressure);
        if pressure < self.threshold() {
            return PressureOutcome::BelowThreshold;
        }

        let job = AutomationJob::new(
            seed.id,
            ctx.automation_id,
            seed.user_id,
            pressure.round() as i32,
        )
        .with_metadata(json!({
            "trigger": "pressure",
            "automation": self.name(),
            "pressure": pressure,
        }));

        submit_best_effort(queue, job, EnqueueOptions::default())
            .await
            .into()
    }
}
