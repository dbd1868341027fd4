//! In-memory stores.
//!
//! Each store keeps its rows behind one lock. Writes that span tables
//! (`MemorySeedStore::create`, `MemoryAutomationRunStore::commit_run`) hold
//! the stores they share, and take locks in a fixed order: seeds,
//! transactions, followups, runs.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::common::{AutomationId, FollowupId, SeedId, TransactionId, UserId};
use crate::domains::automations::{AutomationSettings, RunCommit};
use crate::domains::followups::Followup;
use crate::domains::seeds::{Seed, Transaction};
use crate::kernel::traits::{
    BaseAutomationRunStore, BaseAutomationSettingsStore, BaseFollowupStore, BaseSeedStore,
    BaseTransactionStore,
};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// =============================================================================
// Seeds
// =============================================================================

pub struct MemorySeedStore {
    seeds: Mutex<HashMap<SeedId, Seed>>,
    transactions: Arc<MemoryTransactionStore>,
}

impl MemorySeedStore {
    /// Creation transactions are written to `transactions`.
    pub fn new(transactions: Arc<MemoryTransactionStore>) -> Self {
        Self {
            seeds: Mutex::new(HashMap::new()),
            transactions,
        }
    }
}

#[async_trait]
impl BaseSeedStore for MemorySeedStore {
    async fn create(&self, seed: &Seed, creation: &Transaction) -> Result<()> {
        let mut seeds = lock(&self.seeds);
        if seeds.contains_key(&seed.id) {
            bail!("seed {} already exists", seed.id);
        }
        let mut transactions = lock(&self.transactions.transactions);
        push_transactions(&mut transactions, std::slice::from_ref(creation))?;
        seeds.insert(seed.id, seed.clone());
        Ok(())
    }

    async fn find(&self, id: SeedId) -> Result<Option<Seed>> {
        Ok(lock(&self.seeds).get(&id).cloned())
    }

    async fn list_active(&self) -> Result<Vec<Seed>> {
        let mut seeds: Vec<Seed> = lock(&self.seeds)
            .values()
            .filter(|seed| seed.is_active())
            .cloned()
            .collect();
        seeds.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(seeds)
    }

    async fn list_for_user(&self, user_id: UserId) -> Result<Vec<Seed>> {
        let mut seeds: Vec<Seed> = lock(&self.seeds)
            .values()
            .filter(|seed| seed.user_id == user_id)
            .cloned()
            .collect();
        seeds.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| b.id.cmp(&a.id)));
        Ok(seeds)
    }

    async fn archive(&self, id: SeedId, at: DateTime<Utc>) -> Result<bool> {
        let mut seeds = lock(&self.seeds);
        let Some(seed) = seeds.get_mut(&id) else {
            return Ok(false);
        };
        seed.archived_at.get_or_insert(at);
        Ok(true)
    }
}

// =============================================================================
// Transactions
// =============================================================================

#[derive(Default)]
pub struct MemoryTransactionStore {
    transactions: Mutex<Vec<Transaction>>,
}

impl MemoryTransactionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl BaseTransactionStore for MemoryTransactionStore {
    async fn append(&self, transaction: &Transaction) -> Result<TransactionId> {
        self.append_all(std::slice::from_ref(transaction)).await?;
        Ok(transaction.id)
    }

    async fn append_all(&self, transactions: &[Transaction]) -> Result<()> {
        push_transactions(&mut lock(&self.transactions), transactions)
    }

    async fn get_by_seed_id(&self, seed_id: SeedId) -> Result<Vec<Transaction>> {
        let mut transactions: Vec<Transaction> = lock(&self.transactions)
            .iter()
            .filter(|tx| tx.seed_id == seed_id)
            .cloned()
            .collect();
        transactions.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(transactions)
    }

    async fn find(&self, id: TransactionId) -> Result<Option<Transaction>> {
        Ok(lock(&self.transactions).iter().find(|tx| tx.id == id).cloned())
    }

    async fn set_enabled(&self, id: TransactionId, enabled: bool) -> Result<Option<Transaction>> {
        let mut transactions = lock(&self.transactions);
        Ok(transactions.iter_mut().find(|tx| tx.id == id).map(|tx| {
            tx.enabled = enabled;
            tx.clone()
        }))
    }

    async fn delete_by_automation(
        &self,
        seed_id: SeedId,
        automation_id: AutomationId,
    ) -> Result<u64> {
        let mut transactions = lock(&self.transactions);
        let before = transactions.len();
        transactions.retain(|tx| !(tx.seed_id == seed_id && tx.automation_id == Some(automation_id)));
        Ok((before - transactions.len()) as u64)
    }
}

/// Appends all of `new` or, on a duplicate id, none of it.
fn push_transactions(stored: &mut Vec<Transaction>, new: &[Transaction]) -> Result<()> {
    for transaction in new {
        if stored.iter().any(|existing| existing.id == transaction.id) {
            bail!("transaction {} already exists", transaction.id);
        }
    }
    stored.extend(new.iter().cloned());
    Ok(())
}

// =============================================================================
// Followups
// =============================================================================

#[derive(Default)]
pub struct MemoryFollowupStore {
    followups: Mutex<HashMap<FollowupId, Followup>>,
}

impl MemoryFollowupStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl BaseFollowupStore for MemoryFollowupStore {
    async fn insert(&self, followup: &Followup) -> Result<()> {
        let mut followups = lock(&self.followups);
        if followups.contains_key(&followup.id) {
            bail!("followup {} already exists", followup.id);
        }
        followups.insert(followup.id, followup.clone());
        Ok(())
    }

    async fn find(&self, id: FollowupId) -> Result<Option<Followup>> {
        Ok(lock(&self.followups).get(&id).cloned())
    }

    async fn update(&self, followup: &Followup) -> Result<bool> {
        let mut followups = lock(&self.followups);
        match followups.get_mut(&followup.id) {
            Some(stored) if !stored.dismissed => {
                *stored = followup.clone();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn list_for_seed(&self, seed_id: SeedId) -> Result<Vec<Followup>> {
        let mut followups: Vec<Followup> = lock(&self.followups)
            .values()
            .filter(|f| f.seed_id == seed_id)
            .cloned()
            .collect();
        followups.sort_by(|a, b| a.due_time.cmp(&b.due_time).then_with(|| a.id.cmp(&b.id)));
        Ok(followups)
    }

    async fn list_open_for_seeds(&self, seed_ids: &[SeedId]) -> Result<Vec<Followup>> {
        Ok(lock(&self.followups)
            .values()
            .filter(|f| !f.dismissed && seed_ids.contains(&f.seed_id))
            .cloned()
            .collect())
    }
}

// =============================================================================
// Automation settings
// =============================================================================

#[derive(Default)]
pub struct MemoryAutomationSettingsStore {
    rows: Mutex<Vec<AutomationSettings>>,
}

impl MemoryAutomationSettingsStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store pre-populated with `rows`, as if persisted by an earlier process.
    pub fn with_rows(rows: Vec<AutomationSettings>) -> Self {
        Self {
            rows: Mutex::new(rows),
        }
    }
}

#[async_trait]
impl BaseAutomationSettingsStore for MemoryAutomationSettingsStore {
    async fn load(&self) -> Result<Vec<AutomationSettings>> {
        Ok(lock(&self.rows).clone())
    }

    async fn insert(&self, settings: &AutomationSettings) -> Result<()> {
        let mut rows = lock(&self.rows);
        if rows.iter().any(|row| row.name == settings.name) {
            bail!("automation {} already exists", settings.name);
        }
        rows.push(settings.clone());
        Ok(())
    }

    async fn set_enabled(&self, id: AutomationId, enabled: bool) -> Result<()> {
        let mut rows = lock(&self.rows);
        let Some(row) = rows.iter_mut().find(|row| row.id == id) else {
            bail!("automation {} not found", id);
        };
        row.enabled = enabled;
        Ok(())
    }
}

// =============================================================================
// Automation runs
// =============================================================================

pub struct MemoryAutomationRunStore {
    runs: Mutex<HashMap<(SeedId, AutomationId), DateTime<Utc>>>,
    transactions: Arc<MemoryTransactionStore>,
    followups: Arc<MemoryFollowupStore>,
}

impl MemoryAutomationRunStore {
    /// Committed runs write their output to `transactions` and `followups`.
    pub fn new(transactions: Arc<MemoryTransactionStore>, followups: Arc<MemoryFollowupStore>) -> Self {
        Self {
            runs: Mutex::new(HashMap::new()),
            transactions,
            followups,
        }
    }
}

#[async_trait]
impl BaseAutomationRunStore for MemoryAutomationRunStore {
    async fn commit_run(&self, run: &RunCommit) -> Result<()> {
        let mut transactions = lock(&self.transactions.transactions);
        let mut followups = lock(&self.followups.followups);
        let mut runs = lock(&self.runs);

        if let Some(duplicate) = run.followups.iter().find(|f| followups.contains_key(&f.id)) {
            bail!("followup {} already exists", duplicate.id);
        }
        push_transactions(&mut transactions, &run.transactions)?;
        followups.extend(run.followups.iter().map(|f| (f.id, f.clone())));

        let last = runs
            .entry((run.seed_id, run.automation_id))
            .or_insert(run.finished_at);
        if *last < run.finished_at {
            *last = run.finished_at;
        }
        Ok(())
    }

    async fn last_runs(&self, seed_id: SeedId) -> Result<HashMap<AutomationId, DateTime<Utc>>> {
        Ok(lock(&self.runs)
            .iter()
            .filter(|((seed, _), _)| *seed == seed_id)
            .map(|((_, automation), at)| (*automation, *at))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;
    use serde_json::json;

    use super::*;
    use crate::domains::followups::{FollowupOrigin, NewFollowup};
    use crate::domains::seeds::{TransactionDraft, TransactionType};

    fn payload_draft(seed_id: SeedId) -> TransactionDraft {
        TransactionDraft::payload(seed_id, TransactionType::ScheduleFollowup, json!({}))
    }

    #[tokio::test]
    async fn transactions_are_ordered_by_created_at_then_id() {
        let store = MemoryTransactionStore::new();
        let seed_id = SeedId::new();
        let t0 = Utc::now();

        let later = payload_draft(seed_id).into_transaction(t0 + Duration::seconds(5));
        let first = payload_draft(seed_id).into_transaction(t0);
        let mut tied = payload_draft(seed_id).into_transaction(t0);
        tied.id = TransactionId::new();

        store.append(&later).await.unwrap();
        store.append_all(&[tied.clone(), first.clone()]).await.unwrap();

        let ids: Vec<_> = store
            .get_by_seed_id(seed_id)
            .await
            .unwrap()
            .into_iter()
            .map(|tx| tx.id)
            .collect();
        let mut tied_pair = vec![first.id, tied.id];
        tied_pair.sort();
        assert_eq!(ids, vec![tied_pair[0], tied_pair[1], later.id]);
    }

    #[tokio::test]
    async fn append_all_is_all_or_nothing() {
        let store = MemoryTransactionStore::new();
        let seed_id = SeedId::new();
        let existing = payload_draft(seed_id).into_transaction(Utc::now());
        store.append(&existing).await.unwrap();

        let fresh = payload_draft(seed_id).into_transaction(Utc::now());
        assert!(store.append_all(&[fresh, existing]).await.is_err());
        assert_eq!(store.get_by_seed_id(seed_id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn delete_by_automation_only_touches_that_automation() {
        let store = MemoryTransactionStore::new();
        let seed_id = SeedId::new();
        let automation = AutomationId::new();
        let now = Utc::now();

        store
            .append_all(&[
                payload_draft(seed_id).by_automation(automation).into_transaction(now),
                payload_draft(seed_id).by_automation(AutomationId::new()).into_transaction(now),
                payload_draft(seed_id).into_transaction(now),
            ])
            .await
            .unwrap();

        assert_eq!(store.delete_by_automation(seed_id, automation).await.unwrap(), 1);
        assert_eq!(store.get_by_seed_id(seed_id).await.unwrap().len(), 2);
    }

    fn run_store() -> (Arc<MemoryTransactionStore>, Arc<MemoryFollowupStore>, MemoryAutomationRunStore) {
        let transactions = Arc::new(MemoryTransactionStore::new());
        let followups = Arc::new(MemoryFollowupStore::new());
        let runs = MemoryAutomationRunStore::new(transactions.clone(), followups.clone());
        (transactions, followups, runs)
    }

    fn scheduled_followup(transaction: &Transaction) -> Followup {
        let mut followup = Followup::create(
            transaction.seed_id,
            &NewFollowup {
                due_time: "2030-01-01T09:00:00Z".into(),
                message: "call the bank".into(),
            },
            FollowupOrigin::Automation,
            Utc::now(),
        )
        .unwrap();
        followup.transaction_id = Some(transaction.id);
        followup
    }

    #[tokio::test]
    async fn commit_run_keeps_the_latest_time() {
        let (_, _, store) = run_store();
        let seed_id = SeedId::new();
        let automation = AutomationId::new();
        let now = Utc::now();

        store.commit_run(&RunCommit::empty(seed_id, automation, now)).await.unwrap();
        store
            .commit_run(&RunCommit::empty(seed_id, automation, now - Duration::minutes(5)))
            .await
            .unwrap();

        let runs = store.last_runs(seed_id).await.unwrap();
        assert_eq!(runs.get(&automation), Some(&now));
        assert!(store.last_runs(SeedId::new()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn commit_run_stores_output_and_marker_together() {
        let (transactions, followups, store) = run_store();
        let seed_id = SeedId::new();
        let automation = AutomationId::new();
        let now = Utc::now();

        let scheduled = payload_draft(seed_id).by_automation(automation).into_transaction(now);
        let followup = scheduled_followup(&scheduled);
        let mut run = RunCommit::empty(seed_id, automation, now);
        run.transactions.push(scheduled);
        run.followups.push(followup.clone());
        store.commit_run(&run).await.unwrap();

        assert_eq!(transactions.get_by_seed_id(seed_id).await.unwrap().len(), 1);
        assert_eq!(followups.list_for_seed(seed_id).await.unwrap(), vec![followup]);
        assert!(store.last_runs(seed_id).await.unwrap().contains_key(&automation));
    }

    #[tokio::test]
    async fn rejected_commit_run_writes_nothing() {
        let (transactions, followups, store) = run_store();
        let seed_id = SeedId::new();
        let automation = AutomationId::new();
        let now = Utc::now();

        let existing = payload_draft(seed_id).into_transaction(now);
        transactions.append(&existing).await.unwrap();

        let fresh = payload_draft(seed_id).by_automation(automation).into_transaction(now);
        let mut run = RunCommit::empty(seed_id, automation, now);
        run.followups.push(scheduled_followup(&fresh));
        run.transactions.push(fresh);
        run.transactions.push(existing);

        assert!(store.commit_run(&run).await.is_err());
        assert_eq!(transactions.get_by_seed_id(seed_id).await.unwrap().len(), 1);
        assert!(followups.list_for_seed(seed_id).await.unwrap().is_empty());
        assert!(store.last_runs(seed_id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn create_writes_seed_and_creation_transaction_together() {
        let transactions = Arc::new(MemoryTransactionStore::new());
        let seeds = MemorySeedStore::new(transactions.clone());
        let seed = Seed::new(UserId::new(), "draft");
        let creation = TransactionDraft::create_seed(seed.id, "draft").into_transaction(seed.created_at);

        seeds.create(&seed, &creation).await.unwrap();
        assert!(seeds.find(seed.id).await.unwrap().is_some());
        assert_eq!(transactions.get_by_seed_id(seed.id).await.unwrap(), vec![creation.clone()]);

        // A clashing creation transaction leaves no seed behind
        let other = Seed::new(UserId::new(), "other");
        assert!(seeds.create(&other, &creation).await.is_err());
        assert!(seeds.find(other.id).await.unwrap().is_none());
    }
}
