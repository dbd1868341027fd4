//! Pressure scheduler ticks and loop control.

mod common;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use tokio::sync::Notify;

use crate::common::{insert_seed, TestHarness, TWENTY_WORDS};
use seeds_core::config::SchedulerConfig;
use seeds_core::domains::automations::kinds::TagAutomation;
use seeds_core::domains::automations::{Automation, AutomationContext};
use seeds_core::domains::seeds::activities::archive_seed;
use seeds_core::domains::seeds::{SeedSnapshot, TransactionDraft};
use seeds_core::kernel::test_dependencies::{TestDependencies, UnavailableJobQueue};
use seeds_core::kernel::{PressureScheduler, TickReport};

/// Cannot score anything.
struct BrokenPressure;

#[async_trait]
impl Automation for BrokenPressure {
    fn name(&self) -> &'static str {
        "broken"
    }

    fn description(&self) -> &'static str {
        "Pressure calculation always fails"
    }

    async fn calculate_pressure(&self, _seed: &SeedSnapshot, _ctx: &AutomationContext) -> Result<f64> {
        Err(anyhow!("scoring model unavailable"))
    }

    async fn process(&self, _seed: &SeedSnapshot, _ctx: &AutomationContext) -> Result<Vec<TransactionDraft>> {
        Ok(Vec::new())
    }
}

/// Scores 90, but seeds mentioning "slow" wait for `gate` first.
struct GatedPressure {
    gate: Arc<Notify>,
}

#[async_trait]
impl Automation for GatedPressure {
    fn name(&self) -> &'static str {
        "gated"
    }

    fn description(&self) -> &'static str {
        "Pressure calculation that can be held open"
    }

    async fn calculate_pressure(&self, seed: &SeedSnapshot, _ctx: &AutomationContext) -> Result<f64> {
        if seed.state.content.contains("slow") {
            self.gate.notified().await;
        }
        Ok(90.0)
    }

    async fn process(&self, _seed: &SeedSnapshot, _ctx: &AutomationContext) -> Result<Vec<TransactionDraft>> {
        Ok(Vec::new())
    }
}

async fn gated(gate: Arc<Notify>) -> TestHarness {
    TestHarness::with(
        TestDependencies::new().with_automations(vec![Arc::new(GatedPressure { gate })]),
    )
    .await
    .unwrap()
}

async fn wait_for_waiting(harness: &TestHarness, waiting: usize) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while harness.deps.job_queue.counts().await.unwrap().waiting < waiting {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("jobs were queued");
}

async fn tag_only() -> TestHarness {
    TestHarness::with(TestDependencies::new().with_automations(vec![Arc::new(TagAutomation)]))
        .await
        .unwrap()
}

#[tokio::test]
async fn tick_only_queues_seeds_over_threshold() {
    let harness = tag_only().await;
    let deps = &harness.deps;
    insert_seed(deps, TWENTY_WORDS).await;
    // 60 + 3 words = 63, below the default threshold of 75
    insert_seed(deps, "three short words").await;

    let scheduler = PressureScheduler::new(deps.clone(), SchedulerConfig::default());
    let report = scheduler.tick().await.unwrap();

    assert_eq!(
        report,
        TickReport {
            seeds: 2,
            evaluated: 2,
            enqueued: 1,
            duplicates: 0,
            failed: 0,
        }
    );
}

#[tokio::test]
async fn pending_jobs_are_not_queued_twice() {
    let harness = tag_only().await;
    let deps = &harness.deps;
    insert_seed(deps, TWENTY_WORDS).await;

    let scheduler = PressureScheduler::new(deps.clone(), SchedulerConfig::default());
    assert_eq!(scheduler.tick().await.unwrap().enqueued, 1);

    let second = scheduler.tick().await.unwrap();
    assert_eq!(second.enqueued, 0);
    assert_eq!(second.duplicates, 1);
    assert_eq!(deps.job_queue.counts().await.unwrap().waiting, 1);
}

#[tokio::test]
async fn archived_seeds_are_skipped() {
    let harness = tag_only().await;
    let deps = &harness.deps;
    let seed = insert_seed(deps, TWENTY_WORDS).await;
    archive_seed(deps, seed.id).await.unwrap();

    let scheduler = PressureScheduler::new(deps.clone(), SchedulerConfig::default());
    assert_eq!(scheduler.tick().await.unwrap(), TickReport::default());
}

#[tokio::test]
async fn one_failing_automation_does_not_stop_the_others() {
    let harness = TestHarness::with(
        TestDependencies::new()
            .with_automations(vec![Arc::new(BrokenPressure), Arc::new(TagAutomation)]),
    )
    .await
    .unwrap();
    let deps = &harness.deps;
    insert_seed(deps, TWENTY_WORDS).await;

    let scheduler = PressureScheduler::new(deps.clone(), SchedulerConfig::default());
    let report = scheduler.tick().await.unwrap();

    assert_eq!(report.failed, 1);
    assert_eq!(report.evaluated, 1);
    assert_eq!(report.enqueued, 1);
}

#[tokio::test]
async fn queue_outages_are_counted_not_raised() {
    let harness = TestHarness::with(
        TestDependencies::new()
            .with_automations(vec![Arc::new(TagAutomation)])
            .with_job_queue(Arc::new(UnavailableJobQueue)),
    )
    .await
    .unwrap();
    let deps = &harness.deps;
    insert_seed(deps, TWENTY_WORDS).await;

    let scheduler = PressureScheduler::new(deps.clone(), SchedulerConfig::default());
    let report = scheduler.tick().await.unwrap();

    assert_eq!(report.evaluated, 1);
    assert_eq!(report.enqueued, 0);
    assert_eq!(report.failed, 1);
}

#[tokio::test]
async fn disabled_automations_are_not_evaluated() {
    let harness = tag_only().await;
    let deps = &harness.deps;
    insert_seed(deps, TWENTY_WORDS).await;
    deps.registry
        .set_enabled(harness.automation_id("tag"), false)
        .await
        .unwrap();

    let scheduler = PressureScheduler::new(deps.clone(), SchedulerConfig::default());
    assert_eq!(scheduler.tick().await.unwrap().evaluated, 0);
}

#[tokio::test]
async fn loop_runs_until_stopped_and_can_restart() {
    let harness = tag_only().await;
    let deps = &harness.deps;
    insert_seed(deps, TWENTY_WORDS).await;

    let scheduler = Arc::new(PressureScheduler::new(
        deps.clone(),
        SchedulerConfig {
            interval: Duration::from_millis(10),
            concurrency: 2,
        },
    ));

    scheduler.start();
    scheduler.start();
    assert!(scheduler.is_running());

    tokio::time::timeout(Duration::from_secs(5), async {
        while deps.job_queue.counts().await.unwrap().waiting == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("the loop queues the seed");

    scheduler.stop().await;
    assert!(!scheduler.is_running());

    scheduler.start();
    assert!(scheduler.is_running());
    scheduler.stop().await;
}

#[tokio::test(start_paused = true)]
async fn a_stalled_seed_does_not_hold_back_the_others() {
    let gate = Arc::new(Notify::new());
    let harness = gated(gate.clone()).await;
    let deps = &harness.deps;
    insert_seed(deps, "slow thoughts about the garden").await;
    insert_seed(deps, "call the plumber").await;

    let scheduler = Arc::new(PressureScheduler::new(
        deps.clone(),
        SchedulerConfig {
            interval: Duration::from_secs(30),
            concurrency: 2,
        },
    ));
    let tick = tokio::spawn({
        let scheduler = scheduler.clone();
        async move { scheduler.tick().await }
    });

    wait_for_waiting(&harness, 1).await;
    assert!(!tick.is_finished());

    gate.notify_one();
    let report = tick.await.unwrap().unwrap();
    assert_eq!(report.evaluated, 2);
    assert_eq!(report.enqueued, 2);
}

#[tokio::test(start_paused = true)]
async fn stop_returns_while_a_pressure_calculation_is_stalled() {
    let gate = Arc::new(Notify::new());
    let harness = gated(gate.clone()).await;
    let deps = &harness.deps;
    insert_seed(deps, "slow thoughts about the garden").await;
    insert_seed(deps, "call the plumber").await;

    let scheduler = Arc::new(PressureScheduler::new(
        deps.clone(),
        SchedulerConfig {
            interval: Duration::from_secs(30),
            concurrency: 2,
        },
    ));
    scheduler.start();
    wait_for_waiting(&harness, 1).await;

    tokio::time::timeout(Duration::from_secs(5), scheduler.stop())
        .await
        .expect("stop does not wait for the stalled calculation");
    assert!(!scheduler.is_running());

    // The cancelled evaluation never submits, even once unblocked
    gate.notify_one();
    tokio::time::sleep(Duration::from_millis(50)).await;
    let counts = deps.job_queue.counts().await.unwrap();
    assert_eq!(counts.waiting, 1);
}
