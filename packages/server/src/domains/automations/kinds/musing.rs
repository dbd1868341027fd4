use anyhow::Result;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use crate::domains::automations::{Automation, AutomationContext};
use crate::domains::seeds::{PatchOperation, SeedSnapshot, TransactionDraft, TransactionType};
use crate::kernel::ai::parse_structured;

const MIN_WORDS: usize = 5;
const PRESSURE_PER_IDLE_DAY: f64 = 12.0;
const MAX_IDEAS: usize = 5;

#[derive(Debug, Default, Deserialize)]
struct MusingResponse {
    #[serde(default)]
    ideas: Vec<String>,
}

/// Revisits seeds that have been left alone and offers ideas to develop
/// them. Pressure grows by 12 per idle day.
pub struct MusingAutomation;

#[async_trait]
impl Automation for MusingAutomation {
    fn name(&self) -> &'static str {
        "musing"
    }

    fn description(&self) -> &'static str {
        "Suggests ideas for seeds left untouched"
    }

    async fn calculate_pressure(&self, seed: &SeedSnapshot, ctx: &AutomationContext) -> Result<f64> {
        if seed.state.word_count() < MIN_WORDS {
            return Ok(0.0);
        }
        if ctx.has_run() && ctx.edits_since_last_run() == 0 {
            return Ok(0.0);
        }

        let last_touched = ctx
            .last_user_activity_at()
            .unwrap_or(seed.state.timestamp)
            .max(seed.state.timestamp);
        let idle_days = (ctx.now - last_touched).num_days().max(0) as f64;
        Ok(idle_days * PRESSURE_PER_IDLE_DAY)
    }

    async fn process(&self, seed: &SeedSnapshot, ctx: &AutomationContext) -> Result<Vec<TransactionDraft>> {
        let prompt = format!(
            "Offer up to {MAX_IDEAS} brief ideas that would develop this note further. \
             Respond with JSON: {{\"ideas\": [\"...\"]}}.\n\nNote:\n{}",
            seed.state.content
        );

        let raw = ctx.ai.complete_json(&prompt).await?;
        let response: MusingResponse = parse_structured(&raw)?;

        let ideas: Vec<String> = response
            .ideas
            .into_iter()
            .map(|idea| idea.trim().to_string())
            .filter(|idea| !idea.is_empty())
            .take(MAX_IDEAS)
            .collect();
        if ideas.is_empty() {
            return Ok(Vec::new());
        }

        Ok(vec![TransactionDraft::patch(
            seed.id,
            TransactionType::AddMusing,
            vec![PatchOperation::add(
                "/metadata/musing",
                json!({ "ideas": ideas, "generated_at": ctx.now.to_rfc3339() }),
            )],
        )
        .by_automation(ctx.automation_id)])
    }
}
