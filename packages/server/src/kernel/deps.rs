//! Server dependencies for activities (using traits for testability)
//!
//! This module provides the central dependency container used by every
//! domain activity, the scheduler and the worker pool. All collaborators are
//! trait objects so tests can swap in memory stores and mocks.

use std::sync::Arc;

use typed_builder::TypedBuilder;

use crate::domains::automations::AutomationRegistry;
use crate::kernel::jobs::JobQueue;
use crate::kernel::{
    BaseAI, BaseAutomationRunStore, BaseFollowupStore, BaseSeedStore, BaseTransactionStore,
};

// =============================================================================
// ServerDeps
// =============================================================================

/// Server dependencies accessible to activities (using traits for testability)
#[derive(Clone, TypedBuilder)]
pub struct ServerDeps {
    pub seeds: Arc<dyn BaseSeedStore>,
    /// Append-only transaction log. Serializes appends per seed.
    pub transactions: Arc<dyn BaseTransactionStore>,
    pub followups: Arc<dyn BaseFollowupStore>,
    pub automation_runs: Arc<dyn BaseAutomationRunStore>,
    /// Generation collaborator handed to automations.
    pub ai: Arc<dyn BaseAI>,
    pub registry: Arc<AutomationRegistry>,
    /// The only structure shared between the scheduler and the workers.
    pub job_queue: Arc<dyn JobQueue>,
}
