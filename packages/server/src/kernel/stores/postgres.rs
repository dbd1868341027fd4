//! PostgreSQL stores.
//!
//! Tables are created by `migrations/`. Enum-like columns are stored as text
//! and transaction data as JSONB; rows are decoded through `*Row` structs so
//! a bad value surfaces as an error instead of a panic.
//!
//! Row writers take a `&mut PgConnection` so writes spanning tables
//! (`create`, `append_all`, `commit_run`) share one SQL transaction.

use std::collections::HashMap;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::{PgConnection, PgPool};

use crate::common::{AutomationId, FollowupId, SeedId, TransactionId, UserId};
use crate::domains::automations::{AutomationSettings, RunCommit};
use crate::domains::followups::{DismissalType, Followup, FollowupOrigin};
use crate::domains::seeds::{Seed, Transaction, TransactionData};
use crate::kernel::traits::{
    BaseAutomationRunStore, BaseAutomationSettingsStore, BaseFollowupStore, BaseSeedStore,
    BaseTransactionStore,
};

// =============================================================================
// Seeds
// =============================================================================

pub struct PgSeedStore {
    pool: PgPool,
}

impl PgSeedStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl BaseSeedStore for PgSeedStore {
    async fn create(&self, seed: &Seed, creation: &Transaction) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO seeds (id, user_id, content, created_at, archived_at)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(seed.id)
        .bind(seed.user_id)
        .bind(&seed.content)
        .bind(seed.created_at)
        .bind(seed.archived_at)
        .execute(&mut *tx)
        .await
        .context("failed to insert seed")?;
        insert_transaction(&mut tx, creation).await?;

        tx.commit().await?;
        Ok(())
    }

    async fn find(&self, id: SeedId) -> Result<Option<Seed>> {
        let seed = sqlx::query_as::<_, Seed>("SELECT * FROM seeds WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(seed)
    }

    async fn list_active(&self) -> Result<Vec<Seed>> {
        let seeds = sqlx::query_as::<_, Seed>(
            "SELECT * FROM seeds WHERE archived_at IS NULL ORDER BY created_at, id",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(seeds)
    }

    async fn list_for_user(&self, user_id: UserId) -> Result<Vec<Seed>> {
        let seeds = sqlx::query_as::<_, Seed>(
            "SELECT * FROM seeds WHERE user_id = $1 ORDER BY created_at DESC, id DESC",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(seeds)
    }

    async fn archive(&self, id: SeedId, at: DateTime<Utc>) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE seeds SET archived_at = COALESCE(archived_at, $2) WHERE id = $1",
        )
        .bind(id)
        .bind(at)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }
}

// =============================================================================
// Transactions
// =============================================================================

#[derive(sqlx::FromRow)]
struct TransactionRow {
    id: TransactionId,
    seed_id: SeedId,
    transaction_type: String,
    data: Json<TransactionData>,
    created_at: DateTime<Utc>,
    automation_id: Option<AutomationId>,
    enabled: bool,
}

impl TryFrom<TransactionRow> for Transaction {
    type Error = anyhow::Error;

    fn try_from(row: TransactionRow) -> Result<Self> {
        Ok(Transaction {
            id: row.id,
            seed_id: row.seed_id,
            transaction_type: row.transaction_type.parse()?,
            data: row.data.0,
            created_at: row.created_at,
            automation_id: row.automation_id,
            enabled: row.enabled,
        })
    }
}

fn into_transactions(rows: Vec<TransactionRow>) -> Result<Vec<Transaction>> {
    rows.into_iter().map(Transaction::try_from).collect()
}

/// Single writer per seed: holds the seed row until the surrounding
/// transaction ends.
async fn lock_seed(conn: &mut PgConnection, seed_id: SeedId) -> Result<()> {
    sqlx::query("SELECT id FROM seeds WHERE id = $1 FOR UPDATE")
        .bind(seed_id)
        .fetch_optional(&mut *conn)
        .await?
        .with_context(|| format!("seed {} not found", seed_id))?;
    Ok(())
}

async fn insert_transaction(conn: &mut PgConnection, transaction: &Transaction) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO transactions
            (id, seed_id, transaction_type, data, created_at, automation_id, enabled)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        "#,
    )
    .bind(transaction.id)
    .bind(transaction.seed_id)
    .bind(transaction.transaction_type.as_str())
    .bind(Json(&transaction.data))
    .bind(transaction.created_at)
    .bind(transaction.automation_id)
    .bind(transaction.enabled)
    .execute(&mut *conn)
    .await
    .with_context(|| format!("failed to insert transaction {}", transaction.id))?;
    Ok(())
}

pub struct PgTransactionStore {
    pool: PgPool,
}

impl PgTransactionStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl BaseTransactionStore for PgTransactionStore {
    async fn append(&self, transaction: &Transaction) -> Result<TransactionId> {
        self.append_all(std::slice::from_ref(transaction)).await?;
        Ok(transaction.id)
    }

    async fn append_all(&self, transactions: &[Transaction]) -> Result<()> {
        if transactions.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool.begin().await?;

        // Lock seed rows in a stable order
        let mut seed_ids: Vec<SeedId> = transactions.iter().map(|t| t.seed_id).collect();
        seed_ids.sort();
        seed_ids.dedup();
        for seed_id in seed_ids {
            lock_seed(&mut tx, seed_id).await?;
        }
        for transaction in transactions {
            insert_transaction(&mut tx, transaction).await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn get_by_seed_id(&self, seed_id: SeedId) -> Result<Vec<Transaction>> {
        let rows = sqlx::query_as::<_, TransactionRow>(
            "SELECT * FROM transactions WHERE seed_id = $1 ORDER BY created_at, id",
        )
        .bind(seed_id)
        .fetch_all(&self.pool)
        .await?;
        into_transactions(rows)
    }

    async fn find(&self, id: TransactionId) -> Result<Option<Transaction>> {
        sqlx::query_as::<_, TransactionRow>("SELECT * FROM transactions WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .map(Transaction::try_from)
            .transpose()
    }

    async fn set_enabled(&self, id: TransactionId, enabled: bool) -> Result<Option<Transaction>> {
        sqlx::query_as::<_, TransactionRow>(
            "UPDATE transactions SET enabled = $2 WHERE id = $1 RETURNING *",
        )
        .bind(id)
        .bind(enabled)
        .fetch_optional(&self.pool)
        .await?
        .map(Transaction::try_from)
        .transpose()
    }

    async fn delete_by_automation(
        &self,
        seed_id: SeedId,
        automation_id: AutomationId,
    ) -> Result<u64> {
        let result =
            sqlx::query("DELETE FROM transactions WHERE seed_id = $1 AND automation_id = $2")
                .bind(seed_id)
                .bind(automation_id)
                .execute(&self.pool)
                .await?;
        Ok(result.rows_affected())
    }
}

// =============================================================================
// Followups
// =============================================================================

#[derive(sqlx::FromRow)]
struct FollowupRow {
    id: FollowupId,
    seed_id: SeedId,
    due_time: DateTime<Utc>,
    message: String,
    dismissed: bool,
    dismissed_at: Option<DateTime<Utc>>,
    dismissal_type: Option<String>,
    origin: String,
    snooze_count: i32,
    last_snoozed_at: Option<DateTime<Utc>>,
    last_snooze_origin: Option<String>,
    transaction_id: Option<TransactionId>,
    created_at: DateTime<Utc>,
}

impl TryFrom<FollowupRow> for Followup {
    type Error = anyhow::Error;

    fn try_from(row: FollowupRow) -> Result<Self> {
        Ok(Followup {
            id: row.id,
            seed_id: row.seed_id,
            due_time: row.due_time,
            message: row.message,
            dismissed: row.dismissed,
            dismissed_at: row.dismissed_at,
            dismissal_type: row
                .dismissal_type
                .as_deref()
                .map(str::parse::<DismissalType>)
                .transpose()?,
            origin: row.origin.parse()?,
            snooze_count: row.snooze_count,
            last_snoozed_at: row.last_snoozed_at,
            last_snooze_origin: row
                .last_snooze_origin
                .as_deref()
                .map(str::parse::<FollowupOrigin>)
                .transpose()?,
            transaction_id: row.transaction_id,
            created_at: row.created_at,
        })
    }
}

fn into_followups(rows: Vec<FollowupRow>) -> Result<Vec<Followup>> {
    rows.into_iter().map(Followup::try_from).collect()
}

async fn insert_followup(conn: &mut PgConnection, followup: &Followup) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO followups (
            id, seed_id, due_time, message, dismissed, dismissed_at, dismissal_type,
            origin, snooze_count, last_snoozed_at, last_snooze_origin, transaction_id,
            created_at
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
        "#,
    )
    .bind(followup.id)
    .bind(followup.seed_id)
    .bind(followup.due_time)
    .bind(&followup.message)
    .bind(followup.dismissed)
    .bind(followup.dismissed_at)
    .bind(followup.dismissal_type.map(|t| t.as_str()))
    .bind(followup.origin.as_str())
    .bind(followup.snooze_count)
    .bind(followup.last_snoozed_at)
    .bind(followup.last_snooze_origin.map(|o| o.as_str()))
    .bind(followup.transaction_id)
    .bind(followup.created_at)
    .execute(&mut *conn)
    .await
    .with_context(|| format!("failed to insert followup {}", followup.id))?;
    Ok(())
}

pub struct PgFollowupStore {
    pool: PgPool,
}

impl PgFollowupStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl BaseFollowupStore for PgFollowupStore {
    async fn insert(&self, followup: &Followup) -> Result<()> {
        let mut conn = self.pool.acquire().await?;
        insert_followup(&mut conn, followup).await
    }

    async fn find(&self, id: FollowupId) -> Result<Option<Followup>> {
        sqlx::query_as::<_, FollowupRow>("SELECT * FROM followups WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .map(Followup::try_from)
            .transpose()
    }

    async fn update(&self, followup: &Followup) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE followups
            SET due_time = $2,
                message = $3,
                dismissed = $4,
                dismissed_at = $5,
                dismissal_type = $6,
                snooze_count = $7,
                last_snoozed_at = $8,
                last_snooze_origin = $9
            WHERE id = $1 AND dismissed = false
            "#,
        )
        .bind(followup.id)
        .bind(followup.due_time)
        .bind(&followup.message)
        .bind(followup.dismissed)
        .bind(followup.dismissed_at)
        .bind(followup.dismissal_type.map(|t| t.as_str()))
        .bind(followup.snooze_count)
        .bind(followup.last_snoozed_at)
        .bind(followup.last_snooze_origin.map(|o| o.as_str()))
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn list_for_seed(&self, seed_id: SeedId) -> Result<Vec<Followup>> {
        let rows = sqlx::query_as::<_, FollowupRow>(
            "SELECT * FROM followups WHERE seed_id = $1 ORDER BY due_time, id",
        )
        .bind(seed_id)
        .fetch_all(&self.pool)
        .await?;
        into_followups(rows)
    }

    async fn list_open_for_seeds(&self, seed_ids: &[SeedId]) -> Result<Vec<Followup>> {
        let rows = sqlx::query_as::<_, FollowupRow>(
            r#"
            SELECT * FROM followups
            WHERE seed_id = ANY($1) AND dismissed = false
            ORDER BY due_time, id
            "#,
        )
        .bind(seed_ids)
        .fetch_all(&self.pool)
        .await?;
        into_followups(rows)
    }
}

// =============================================================================
// Automation settings
// =============================================================================

pub struct PgAutomationSettingsStore {
    pool: PgPool,
}

impl PgAutomationSettingsStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl BaseAutomationSettingsStore for PgAutomationSettingsStore {
    async fn load(&self) -> Result<Vec<AutomationSettings>> {
        let rows = sqlx::query_as::<_, AutomationSettings>(
            "SELECT id, name, description, enabled FROM automation_settings ORDER BY name",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn insert(&self, settings: &AutomationSettings) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO automation_settings (id, name, description, enabled)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(settings.id)
        .bind(&settings.name)
        .bind(&settings.description)
        .bind(settings.enabled)
        .execute(&self.pool)
        .await
        .with_context(|| format!("failed to insert automation {}", settings.name))?;
        Ok(())
    }

    async fn set_enabled(&self, id: AutomationId, enabled: bool) -> Result<()> {
        let result = sqlx::query("UPDATE automation_settings SET enabled = $2 WHERE id = $1")
            .bind(id)
            .bind(enabled)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            anyhow::bail!("automation {} not found", id);
        }
        Ok(())
    }
}

// =============================================================================
// Automation runs
// =============================================================================

pub struct PgAutomationRunStore {
    pool: PgPool,
}

impl PgAutomationRunStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl BaseAutomationRunStore for PgAutomationRunStore {
    async fn commit_run(&self, run: &RunCommit) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        lock_seed(&mut tx, run.seed_id).await?;
        for transaction in &run.transactions {
            insert_transaction(&mut tx, transaction).await?;
        }
        for followup in &run.followups {
            insert_followup(&mut tx, followup).await?;
        }

        sqlx::query(
            r#"
            INSERT INTO automation_runs (seed_id, automation_id, last_run_at)
            VALUES ($1, $2, $3)
            ON CONFLICT (seed_id, automation_id)
            DO UPDATE SET last_run_at = GREATEST(automation_runs.last_run_at, EXCLUDED.last_run_at)
            "#,
        )
        .bind(run.seed_id)
        .bind(run.automation_id)
        .bind(run.finished_at)
        .execute(&mut *tx)
        .await
        .context("failed to record automation run")?;

        tx.commit().await?;
        Ok(())
    }

    async fn last_runs(&self, seed_id: SeedId) -> Result<HashMap<AutomationId, DateTime<Utc>>> {
        let rows: Vec<(AutomationId, DateTime<Utc>)> = sqlx::query_as(
            "SELECT automation_id, last_run_at FROM automation_runs WHERE seed_id = $1",
        )
        .bind(seed_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().collect())
    }
}
