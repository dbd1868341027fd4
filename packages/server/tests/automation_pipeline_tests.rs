//! Pressure → queue → run → committed transactions.

mod common;

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::json;
use tokio_util::sync::CancellationToken;

use crate::common::{insert_seed, TestHarness, TWENTY_WORDS};
use seeds_core::config::SchedulerConfig;
use seeds_core::domains::automations::activities::{
    regenerate_automation, run_automation_job, trigger_automation,
};
use seeds_core::domains::automations::kinds::{FollowupAutomation, TagAutomation};
use seeds_core::domains::automations::{
    Automation, AutomationContext, JobError, TriggerError,
};
use seeds_core::domains::followups::activities::list_for_seed;
use seeds_core::domains::followups::FollowupOrigin;
use seeds_core::domains::seeds::activities::{archive_seed, compute_state, list_transactions};
use seeds_core::domains::seeds::{
    PatchOperation, SeedSnapshot, TransactionDraft, TransactionType,
};
use seeds_core::kernel::jobs::{ErrorKind, JobStatus, MANUAL_PRIORITY};
use seeds_core::kernel::test_dependencies::{FaultyRunStore, MockAI, TestDependencies};
use seeds_core::kernel::PressureScheduler;

async fn tag_only(ai: MockAI) -> TestHarness {
    TestHarness::with(
        TestDependencies::new()
            .mock_ai(ai)
            .with_automations(vec![Arc::new(TagAutomation)]),
    )
    .await
    .unwrap()
}

#[tokio::test]
async fn pressure_run_tags_the_seed() {
    let harness = tag_only(MockAI::new().with_response(r#"{"tags": ["gardening"]}"#)).await;
    let deps = &harness.deps;
    let tag_id = harness.automation_id("tag");
    let seed = insert_seed(deps, TWENTY_WORDS).await;

    let scheduler = PressureScheduler::new(deps.clone(), SchedulerConfig::default());
    let report = scheduler.tick().await.unwrap();
    assert_eq!(report.seeds, 1);
    assert_eq!(report.evaluated, 1);
    assert_eq!(report.enqueued, 1);

    let claimed = deps
        .job_queue
        .next(&CancellationToken::new())
        .await
        .unwrap()
        .expect("a queued job");
    assert_eq!(claimed.job.seed_id, seed.id);
    assert_eq!(claimed.job.automation_id, tag_id);
    assert_eq!(claimed.job.priority, 80);
    assert_eq!(claimed.job.metadata["trigger"], "pressure");

    let report = run_automation_job(deps, &claimed.job).await.unwrap();
    assert_eq!(report.transactions, 1);
    deps.job_queue.complete(claimed.id).await.unwrap();

    let state = compute_state(deps, seed.id).await.unwrap();
    assert!(state.has_tag("gardening"));

    let transactions = list_transactions(deps, seed.id).await.unwrap();
    let added = transactions.last().unwrap();
    assert_eq!(added.transaction_type, TransactionType::AddTag);
    assert_eq!(added.automation_id, Some(tag_id));

    // Nothing changed since the run, so nothing is queued again
    let report = scheduler.tick().await.unwrap();
    assert_eq!(report.enqueued, 0);
    assert_eq!(report.duplicates, 0);
}

#[tokio::test]
async fn a_run_that_emits_nothing_still_settles_pressure() {
    let harness = tag_only(MockAI::new().with_response(r#"{"tags": []}"#)).await;
    let deps = &harness.deps;
    let seed = insert_seed(deps, TWENTY_WORDS).await;
    let tag_id = harness.automation_id("tag");

    let job_id = trigger_automation(deps, seed.id, tag_id, false).await.unwrap();
    let record = deps.job_queue.get_job(job_id).await.unwrap().unwrap();
    let report = run_automation_job(deps, &record.job).await.unwrap();
    assert_eq!(report.transactions, 0);

    let runs = deps.automation_runs.last_runs(seed.id).await.unwrap();
    assert!(runs.contains_key(&tag_id));
}

#[tokio::test]
async fn non_manual_triggers_are_deduplicated_and_manual_ones_are_not() {
    let harness = tag_only(MockAI::new()).await;
    let deps = &harness.deps;
    let seed = insert_seed(deps, TWENTY_WORDS).await;
    let tag_id = harness.automation_id("tag");

    let first = trigger_automation(deps, seed.id, tag_id, false).await.unwrap();
    let second = trigger_automation(deps, seed.id, tag_id, false).await.unwrap();
    assert_eq!(first, second);

    let manual = trigger_automation(deps, seed.id, tag_id, true).await.unwrap();
    assert_ne!(manual, first);
    let record = deps.job_queue.get_job(manual).await.unwrap().unwrap();
    assert_eq!(record.priority, MANUAL_PRIORITY);

    // Manual runs jump the queue
    let claimed = deps
        .job_queue
        .next(&CancellationToken::new())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(claimed.id, manual);
}

#[tokio::test]
async fn triggers_check_seed_and_automation() {
    let harness = tag_only(MockAI::new()).await;
    let deps = &harness.deps;
    let seed = insert_seed(deps, TWENTY_WORDS).await;
    let tag_id = harness.automation_id("tag");

    assert!(matches!(
        trigger_automation(deps, seed.id, seeds_core::common::AutomationId::new(), true).await,
        Err(TriggerError::AutomationNotFound(_))
    ));

    deps.registry.set_enabled(tag_id, false).await.unwrap();
    assert!(matches!(
        trigger_automation(deps, seed.id, tag_id, true).await,
        Err(TriggerError::AutomationDisabled(_))
    ));
    deps.registry.set_enabled(tag_id, true).await.unwrap();

    archive_seed(deps, seed.id).await.unwrap();
    assert!(matches!(
        trigger_automation(deps, seed.id, tag_id, true).await,
        Err(TriggerError::SeedArchived(_))
    ));
}

#[tokio::test]
async fn regenerate_replaces_what_the_automation_produced() {
    let ai = MockAI::new()
        .with_response(r#"{"tags": ["compost"]}"#)
        .with_response(r#"{"tags": ["soil"]}"#);
    let harness = tag_only(ai).await;
    let deps = &harness.deps;
    let seed = insert_seed(deps, TWENTY_WORDS).await;
    let tag_id = harness.automation_id("tag");

    let job_id = trigger_automation(deps, seed.id, tag_id, true).await.unwrap();
    let record = deps.job_queue.get_job(job_id).await.unwrap().unwrap();
    run_automation_job(deps, &record.job).await.unwrap();
    assert!(compute_state(deps, seed.id).await.unwrap().has_tag("compost"));

    let regenerated = regenerate_automation(deps, seed.id, tag_id).await.unwrap();
    assert!(compute_state(deps, seed.id).await.unwrap().tags.is_empty());

    let record = deps.job_queue.get_job(regenerated).await.unwrap().unwrap();
    run_automation_job(deps, &record.job).await.unwrap();
    let state = compute_state(deps, seed.id).await.unwrap();
    assert!(state.has_tag("soil"));
    assert!(!state.has_tag("compost"));
}

#[tokio::test]
async fn followup_automation_schedules_a_reminder() {
    let ai = MockAI::new()
        .with_response(r#"{"followup": {"message": "Call the bank", "due_in_hours": 24}}"#);
    let harness = TestHarness::with(
        TestDependencies::new()
            .mock_ai(ai)
            .with_automations(vec![Arc::new(FollowupAutomation)]),
    )
    .await
    .unwrap();
    let deps = &harness.deps;
    let seed = insert_seed(deps, "call the bank tomorrow about the loan").await;
    let automation_id = harness.automation_id("followup");

    let job_id = trigger_automation(deps, seed.id, automation_id, true).await.unwrap();
    let record = deps.job_queue.get_job(job_id).await.unwrap().unwrap();
    let report = run_automation_job(deps, &record.job).await.unwrap();
    assert_eq!(report.transactions, 1);
    assert_eq!(report.followups, 1);

    let followups = list_for_seed(deps, seed.id).await.unwrap();
    assert_eq!(followups.len(), 1);
    assert_eq!(followups[0].message, "Call the bank");
    assert_eq!(followups[0].origin, FollowupOrigin::Automation);

    let transactions = list_transactions(deps, seed.id).await.unwrap();
    let scheduled = transactions.last().unwrap();
    assert_eq!(scheduled.transaction_type, TransactionType::ScheduleFollowup);
    assert_eq!(followups[0].transaction_id, Some(scheduled.id));

    // Payload transactions never touch replayed state
    assert_eq!(
        compute_state(deps, seed.id).await.unwrap().content,
        "call the bank tomorrow about the loan"
    );
}

#[tokio::test]
async fn failed_generation_commits_nothing_and_is_retryable() {
    let harness = tag_only(MockAI::new().with_error("model overloaded")).await;
    let deps = &harness.deps;
    let seed = insert_seed(deps, TWENTY_WORDS).await;
    let tag_id = harness.automation_id("tag");

    let job_id = trigger_automation(deps, seed.id, tag_id, true).await.unwrap();
    let record = deps.job_queue.get_job(job_id).await.unwrap().unwrap();
    let err = run_automation_job(deps, &record.job).await.unwrap_err();

    assert!(matches!(err, JobError::Automation(_)));
    assert_eq!(err.kind(), ErrorKind::Retryable);
    assert_eq!(list_transactions(deps, seed.id).await.unwrap().len(), 1);
    assert!(deps.automation_runs.last_runs(seed.id).await.unwrap().is_empty());
}

#[tokio::test]
async fn a_rejected_commit_stores_nothing_and_the_retry_settles_pressure() {
    let followup = r#"{"followup": {"message": "Call the bank", "due_in_hours": 24}}"#;
    let harness = TestHarness::with(
        TestDependencies::new()
            .mock_ai(MockAI::new().with_response(followup).with_response(followup))
            .with_automations(vec![Arc::new(FollowupAutomation)]),
    )
    .await
    .unwrap();
    let mut deps = (*harness.deps).clone();
    deps.automation_runs =
        Arc::new(FaultyRunStore::wrap(harness.deps.automation_runs.clone()).failing(1));
    let deps = Arc::new(deps);
    let seed = insert_seed(&deps, "call the bank tomorrow about the loan").await;

    let scheduler = PressureScheduler::new(deps.clone(), SchedulerConfig::default());
    assert_eq!(scheduler.tick().await.unwrap().enqueued, 1);
    let claimed = deps
        .job_queue
        .next(&CancellationToken::new())
        .await
        .unwrap()
        .expect("a queued job");

    let err = run_automation_job(&deps, &claimed.job).await.unwrap_err();
    assert!(matches!(err, JobError::Store(_)));
    assert_eq!(err.kind(), ErrorKind::Retryable);
    assert_eq!(list_transactions(&deps, seed.id).await.unwrap().len(), 1);
    assert!(list_for_seed(&deps, seed.id).await.unwrap().is_empty());
    assert!(deps.automation_runs.last_runs(seed.id).await.unwrap().is_empty());

    let report = run_automation_job(&deps, &claimed.job).await.unwrap();
    assert_eq!(report.followups, 1);
    deps.job_queue.complete(claimed.id).await.unwrap();

    // The run marker landed with the followup, so pressure stays settled
    for _ in 0..3 {
        let report = scheduler.tick().await.unwrap();
        assert_eq!(report.evaluated, 1);
        assert_eq!(report.enqueued, 0);
    }
    assert_eq!(list_for_seed(&deps, seed.id).await.unwrap().len(), 1);
    assert_eq!(harness.ai.call_count(), 2);
}

/// Emits one valid and one out-of-bounds patch.
struct RogueAutomation;

#[async_trait]
impl Automation for RogueAutomation {
    fn name(&self) -> &'static str {
        "rogue"
    }

    fn description(&self) -> &'static str {
        "Writes outside the seed document"
    }

    async fn calculate_pressure(&self, _seed: &SeedSnapshot, _ctx: &AutomationContext) -> Result<f64> {
        Ok(100.0)
    }

    async fn process(&self, seed: &SeedSnapshot, _ctx: &AutomationContext) -> Result<Vec<TransactionDraft>> {
        Ok(vec![
            TransactionDraft::patch(
                seed.id,
                TransactionType::AddTag,
                vec![PatchOperation::add("/tags/-", json!({"id": "1", "name": "ok"}))],
            ),
            TransactionDraft::patch(
                seed.id,
                TransactionType::SetMetadata,
                vec![PatchOperation::replace("/user_id", json!("someone else"))],
            ),
        ])
    }
}

#[tokio::test]
async fn invalid_automation_output_is_rejected_as_a_whole() {
    let harness = TestHarness::with(
        TestDependencies::new().with_automations(vec![Arc::new(RogueAutomation)]),
    )
    .await
    .unwrap();
    let deps = &harness.deps;
    let seed = insert_seed(deps, TWENTY_WORDS).await;
    let rogue_id = harness.automation_id("rogue");

    let job_id = trigger_automation(deps, seed.id, rogue_id, true).await.unwrap();
    let record = deps.job_queue.get_job(job_id).await.unwrap().unwrap();
    let err = run_automation_job(deps, &record.job).await.unwrap_err();

    assert!(matches!(err, JobError::InvalidOutput(_)));
    assert_eq!(err.kind(), ErrorKind::NonRetryable);
    assert_eq!(list_transactions(deps, seed.id).await.unwrap().len(), 1);
}

#[tokio::test]
async fn jobs_for_archived_seeds_fail_permanently() {
    let harness = tag_only(MockAI::new()).await;
    let deps = &harness.deps;
    let seed = insert_seed(deps, TWENTY_WORDS).await;
    let tag_id = harness.automation_id("tag");

    let job_id = trigger_automation(deps, seed.id, tag_id, true).await.unwrap();
    archive_seed(deps, seed.id).await.unwrap();

    let record = deps.job_queue.get_job(job_id).await.unwrap().unwrap();
    assert_eq!(record.status, JobStatus::Waiting);
    let err = run_automation_job(deps, &record.job).await.unwrap_err();
    assert!(matches!(err, JobError::SeedArchived(_)));
    assert_eq!(err.kind(), ErrorKind::NonRetryable);
}
