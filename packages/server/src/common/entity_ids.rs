//! Typed ID aliases for every entity the core touches.

use super::id::{Id, V4};

// ============================================================================
// Entity marker types
// ============================================================================

/// Marker type for Seed entities (atomic notes).
pub struct Seed;

/// Marker type for Transaction entities (seed log entries).
pub struct Transaction;

/// Marker type for Followup entities (reminders).
pub struct Followup;

/// Marker type for User entities.
pub struct User;

/// Marker type for Automation entities.
pub struct Automation;

/// Marker type for queued AutomationJob entities.
pub struct AutomationJob;

// ============================================================================
// Type aliases
// ============================================================================

pub type SeedId = Id<Seed>;

pub type TransactionId = Id<Transaction>;

pub type FollowupId = Id<Followup>;

pub type UserId = Id<User>;

pub type AutomationId = Id<Automation>;

/// Queue job IDs are random; ordering inside the queue uses a submission
/// sequence, never the ID.
pub type JobId = Id<AutomationJob, V4>;
