use std::collections::HashSet;

use anyhow::Result;
use async_trait::async_trait;
use chrono::Duration;
use serde::Deserialize;
use serde_json::json;

use super::normalized_words;
use crate::domains::automations::{Automation, AutomationContext};
use crate::domains::seeds::{SeedSnapshot, TransactionDraft, TransactionType};
use crate::kernel::ai::parse_structured;

/// Words that suggest a time-bound intention.
const TIME_KEYWORDS: &[&str] = &[
    "tomorrow",
    "tonight",
    "today",
    "remind",
    "reminder",
    "deadline",
    "due",
    "call",
    "meet",
    "meeting",
    "appointment",
    "schedule",
    "monday",
    "tuesday",
    "wednesday",
    "thursday",
    "friday",
    "saturday",
    "sunday",
];

const TIME_PHRASES: &[&str] = &["next week", "next month", "follow up", "by the end of"];

const MAX_DUE_IN_HOURS: i64 = 24 * 365;

#[derive(Debug, Default, Deserialize)]
struct FollowupResponse {
    #[serde(default)]
    followup: Option<FollowupSuggestion>,
}

#[derive(Debug, Deserialize)]
struct FollowupSuggestion {
    message: String,
    due_in_hours: i64,
}

/// Distinct time-related keywords and phrases in `content`.
fn time_signal_count(content: &str) -> usize {
    let words: HashSet<String> = normalized_words(content).into_iter().collect();
    let keyword_hits = TIME_KEYWORDS.iter().filter(|k| words.contains(**k)).count();

    let lowered = content.to_lowercase();
    let phrase_hits = TIME_PHRASES.iter().filter(|p| lowered.contains(**p)).count();

    keyword_hits + phrase_hits
}

/// Turns time-bound intentions ("call the bank tomorrow") into reminders.
///
/// The emitted `schedule_followup` transaction carries a payload rather
/// than a patch; the worker creates the followup when it commits.
pub struct FollowupAutomation;

#[async_trait]
impl Automation for FollowupAutomation {
    fn name(&self) -> &'static str {
        "followup"
    }

    fn description(&self) -> &'static str {
        "Creates reminders for time-bound intentions"
    }

    async fn calculate_pressure(&self, seed: &SeedSnapshot, ctx: &AutomationContext) -> Result<f64> {
        let hits = time_signal_count(&seed.state.content);
        if hits == 0 {
            return Ok(0.0);
        }
        if ctx.has_run() && ctx.edits_since_last_run() == 0 {
            return Ok(0.0);
        }
        Ok(70.0 + 10.0 * hits as f64)
    }

    async fn process(&self, seed: &SeedSnapshot, ctx: &AutomationContext) -> Result<Vec<TransactionDraft>> {
        let prompt = format!(
            "The current time is {}. If this note contains something the author should be \
             reminded about, respond with JSON {{\"followup\": {{\"message\": \"...\", \
             \"due_in_hours\": N}}}}; otherwise respond with {{\"followup\": null}}.\n\nNote:\n{}",
            ctx.now.to_rfc3339(),
            seed.state.content
        );

        let raw = ctx.ai.complete_json(&prompt).await?;
        let response: FollowupResponse = parse_structured(&raw)?;

        let Some(suggestion) = response.followup else {
            return Ok(Vec::new());
        };
        let message = suggestion.message.trim();
        if message.is_empty() {
            return Ok(Vec::new());
        }

        let hours = suggestion.due_in_hours.clamp(1, MAX_DUE_IN_HOURS);
        let due_time = ctx.now + Duration::hours(hours);

        Ok(vec![TransactionDraft::payload(
            seed.id,
            TransactionType::ScheduleFollowup,
            json!({ "due_time": due_time.to_rfc3339(), "message": message }),
        )
        .by_automation(ctx.automation_id)])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domains::automations::kinds::testing::{context, snapshot};
    use crate::domains::seeds::TransactionData;
    use crate::kernel::test_dependencies::MockAI;
    use chrono::Utc;

    #[test]
    fn counts_keywords_and_phrases_once() {
        assert_eq!(time_signal_count("Call mom tomorrow, call dad next week"), 3);
        assert_eq!(time_signal_count("a quiet thought about clouds"), 0);
    }

    #[tokio::test]
    async fn pressure_requires_time_signals() {
        let ctx = context(MockAI::new(), vec![], None, Utc::now());
        let calm = FollowupAutomation
            .calculate_pressure(&snapshot("clouds are nice"), &ctx)
            .await
            .expect("pressure");
        assert_eq!(calm, 0.0);

        let urgent = FollowupAutomation
            .calculate_pressure(&snapshot("call the bank tomorrow"), &ctx)
            .await
            .expect("pressure");
        assert_eq!(urgent, 90.0);
    }

    #[tokio::test]
    async fn emits_followup_payload() {
        let now = Utc::now();
        let ai = MockAI::new().with_response(r#"{"followup": {"message": " Call the bank ", "due_in_hours": 24}}"#);
        let ctx = context(ai, vec![], None, now);

        let drafts = FollowupAutomation
            .process(&snapshot("call the bank tomorrow"), &ctx)
            .await
            .expect("process");
        assert_eq!(drafts.len(), 1);
        assert_eq!(drafts[0].transaction_type, TransactionType::ScheduleFollowup);
        let TransactionData::Payload(payload) = &drafts[0].data else {
            panic!("expected payload");
        };
        assert_eq!(payload["message"], "Call the bank");
        assert_eq!(payload["due_time"], (now + Duration::hours(24)).to_rfc3339());
    }

    #[tokio::test]
    async fn null_followup_emits_nothing() {
        let ctx = context(MockAI::new().with_response(r#"{"followup": null}"#), vec![], None, Utc::now());
        let drafts = FollowupAutomation
            .process(&snapshot("call someday"), &ctx)
            .await
            .expect("process");
        assert!(drafts.is_empty());
    }
}
