//! Pressure scheduler.
//!
//! Periodically asks every enabled automation how ready each active seed is
//! and queues a run wherever pressure reaches the automation's threshold.
//!
//! ```text
//! every interval
//!     │
//!     └─► list_active() seeds (bounded concurrency)
//!             └─► replay seed ─► for each enabled automation
//!                     ├─► calculate_pressure()
//!                     └─► handle_pressure() ─► JobQueue (dedup by seed+automation)
//! ```
//!
//! Scheduling is best-effort: one seed or automation failing is logged and
//! counted, never fatal to the tick.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use anyhow::Result;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use futures::stream::{self, StreamExt};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::common::AutomationId;
use crate::config::SchedulerConfig;
use crate::domains::automations::{AutomationContext, PressureOutcome, RegisteredAutomation};
use crate::domains::seeds::activities::{load_seed_view, SeedView};
use crate::domains::seeds::Seed;
use crate::kernel::ServerDeps;

/// Counters for one scheduler pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    pub seeds: usize,
    /// (seed, automation) pairs whose pressure was computed.
    pub evaluated: usize,
    pub enqueued: usize,
    pub duplicates: usize,
    pub failed: usize,
}

impl TickReport {
    fn merge(&mut self, other: TickReport) {
        self.seeds += other.seeds;
        self.evaluated += other.evaluated;
        self.enqueued += other.enqueued;
        self.duplicates += other.duplicates;
        self.failed += other.failed;
    }

    fn record(&mut self, outcome: &PressureOutcome) {
        match outcome {
            PressureOutcome::BelowThreshold => {}
            PressureOutcome::Enqueued(_) => self.enqueued += 1,
            PressureOutcome::Duplicate(_) => self.duplicates += 1,
            PressureOutcome::Failed => self.failed += 1,
        }
    }
}

struct Running {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

pub struct PressureScheduler {
    deps: Arc<ServerDeps>,
    config: SchedulerConfig,
    running: Mutex<Option<Running>>,
}

impl PressureScheduler {
    pub fn new(deps: Arc<ServerDeps>, config: SchedulerConfig) -> Self {
        Self {
            deps,
            config,
            running: Mutex::new(None),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Starts the periodic loop. Calling `start` while running is a no-op.
    pub fn start(self: &Arc<Self>) {
        let mut running = self.running.lock().unwrap_or_else(PoisonError::into_inner);
        if running.is_some() {
            debug!("pressure scheduler already running");
            return;
        }

        let cancel = CancellationToken::new();
        let scheduler = Arc::clone(self);
        let token = cancel.clone();
        let handle = tokio::spawn(async move { scheduler.run_loop(token).await });

        info!(
            interval_secs = self.config.interval.as_secs(),
            concurrency = self.config.concurrency,
            "pressure scheduler started"
        );
        *running = Some(Running { cancel, handle });
    }

    /// Stops the loop and waits for an in-progress tick to wind down.
    /// Pressure calculations still running are dropped; a submission that
    /// already started completes. The scheduler can be started again
    /// afterwards.
    pub async fn stop(&self) {
        let running = self
            .running
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        let Some(Running { cancel, handle }) = running else {
            return;
        };
        cancel.cancel();
        if let Err(e) = handle.await {
            error!(error = %e, "pressure scheduler loop exited abnormally");
        }
        info!("pressure scheduler stopped");
    }

    /// Runs a single pass immediately.
    pub async fn tick(&self) -> Result<TickReport> {
        self.run_tick(&CancellationToken::new()).await
    }

    async fn run_loop(&self, cancel: CancellationToken) {
        let mut interval = tokio::time::interval(self.config.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = interval.tick() => {}
            }

            match self.run_tick(&cancel).await {
                Ok(report) if report.enqueued > 0 || report.failed > 0 => info!(
                    seeds = report.seeds,
                    evaluated = report.evaluated,
                    enqueued = report.enqueued,
                    duplicates = report.duplicates,
                    failed = report.failed,
                    "pressure tick finished"
                ),
                Ok(report) => debug!(
                    seeds = report.seeds,
                    evaluated = report.evaluated,
                    duplicates = report.duplicates,
                    "pressure tick finished"
                ),
                Err(e) => error!(error = %e, "pressure tick failed"),
            }
        }
    }

    async fn run_tick(&self, cancel: &CancellationToken) -> Result<TickReport> {
        let automations = self.deps.registry.get_enabled();
        if automations.is_empty() {
            return Ok(TickReport::default());
        }
        let seeds = self.deps.seeds.list_active().await?;

        let mut report = TickReport::default();
        let mut per_seed = stream::iter(seeds)
            .map(|seed| self.evaluate_seed(seed, &automations, cancel))
            .buffer_unordered(self.config.concurrency.max(1));

        while let Some(seed_report) = per_seed.next().await {
            report.merge(seed_report);
        }
        Ok(report)
    }

    async fn evaluate_seed(
        &self,
        seed: Seed,
        automations: &[RegisteredAutomation],
        cancel: &CancellationToken,
    ) -> TickReport {
        let mut report = TickReport {
            seeds: 1,
            ..TickReport::default()
        };
        if cancel.is_cancelled() {
            return report;
        }

        let view = match load_seed_view(&self.deps, &seed).await {
            Ok(view) => view,
            Err(e) => {
                warn!(seed_id = %seed.id, error = %e, "skipping seed, could not compute state");
                report.failed += 1;
                return report;
            }
        };
        let last_runs = match self.deps.automation_runs.last_runs(seed.id).await {
            Ok(runs) => runs,
            Err(e) => {
                warn!(seed_id = %seed.id, error = %e, "skipping seed, could not load automation runs");
                report.failed += 1;
                return report;
            }
        };

        let now = Utc::now();
        let outcomes = join_all(automations.iter().map(|entry| {
            self.evaluate_automation(&seed, &view, entry, &last_runs, now, cancel)
        }))
        .await;

        for outcome in outcomes.into_iter().flatten() {
            match outcome {
                Ok(outcome) => {
                    report.evaluated += 1;
                    report.record(&outcome);
                }
                Err(()) => report.failed += 1,
            }
        }
        report
    }

    /// `None` when the tick was cancelled before this automation submitted,
    /// `Err(())` when pressure could not be computed (already logged).
    async fn evaluate_automation(
        &self,
        seed: &Seed,
        view: &SeedView,
        entry: &RegisteredAutomation,
        last_runs: &HashMap<AutomationId, DateTime<Utc>>,
        now: DateTime<Utc>,
        cancel: &CancellationToken,
    ) -> Option<Result<PressureOutcome, ()>> {
        if cancel.is_cancelled() {
            return None;
        }

        let ctx = AutomationContext {
            ai: self.deps.ai.clone(),
            automation_id: entry.id(),
            user_id: seed.user_id,
            transactions: view.transactions.clone(),
            last_run_at: last_runs.get(&entry.id()).copied(),
            now,
        };

        let calculated = tokio::select! {
            _ = cancel.cancelled() => {
                debug!(seed_id = %seed.id, automation = entry.name(), "tick cancelled mid-evaluation");
                return None;
            }
            calculated = entry.automation.calculate_pressure(&view.snapshot, &ctx) => calculated,
        };

        let pressure = match calculated {
            Ok(pressure) => pressure,
            Err(e) => {
                warn!(
                    seed_id = %seed.id,
                    automation = entry.name(),
                    error = %e,
                    "pressure calculation failed"
                );
                return Some(Err(()));
            }
        };

        let outcome = entry
            .automation
            .handle_pressure(&view.snapshot, pressure, &ctx, self.deps.job_queue.as_ref())
            .await;

        debug!(
            seed_id = %seed.id,
            automation = entry.name(),
            pressure,
            outcome = ?outcome,
            "pressure evaluated"
        );
        Some(Ok(outcome))
    }
}
