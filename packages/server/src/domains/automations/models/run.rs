use chrono::{DateTime, Utc};

use crate::common::{AutomationId, SeedId};
use crate::domains::followups::Followup;
use crate::domains::seeds::Transaction;

/// Everything one finished automation run writes.
///
/// Stored as a unit by `BaseAutomationRunStore::commit_run`: the run marker
/// only exists if the transactions and the followups they schedule do.
#[derive(Debug, Clone)]
pub struct RunCommit {
    pub seed_id: SeedId,
    pub automation_id: AutomationId,
    pub finished_at: DateTime<Utc>,
    pub transactions: Vec<Transaction>,
    /// Followups scheduled by `schedule_followup` entries in `transactions`.
    pub followups: Vec<Followup>,
}

impl RunCommit {
    /// A run that produced nothing still settles the automation's pressure.
    pub fn empty(seed_id: SeedId, automation_id: AutomationId, finished_at: DateTime<Utc>) -> Self {
        Self {
            seed_id,
            automation_id,
            finished_at,
            transactions: Vec::new(),
            followups: Vec::new(),
        }
    }
}
