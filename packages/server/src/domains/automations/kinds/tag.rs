use anyhow::Result;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use crate::domains::automations::{Automation, AutomationContext};
use crate::domains::seeds::{PatchOperation, SeedSnapshot, TransactionDraft, TransactionType};
use crate::kernel::ai::parse_structured;

const MAX_TAGS: usize = 5;

#[derive(Debug, Default, Deserialize)]
struct TagSuggestions {
    #[serde(default)]
    tags: Vec<String>,
}

/// Suggests short topical tags.
///
/// Pressure: a seed that was never tagged starts at 60 plus one point per
/// word (up to 40). Afterwards only new edits raise it.
pub struct TagAutomation;

#[async_trait]
impl Automation for TagAutomation {
    fn name(&self) -> &'static str {
        "tag"
    }

    fn description(&self) -> &'static str {
        "Suggests tags for a seed"
    }

    async fn calculate_pressure(&self, seed: &SeedSnapshot, ctx: &AutomationContext) -> Result<f64> {
        let words = seed.state.word_count() as f64;
        if words == 0.0 {
            return Ok(0.0);
        }
        if !ctx.has_run() {
            return Ok(60.0 + words.min(40.0));
        }

        let edits = ctx.edits_since_last_run() as f64;
        if edits == 0.0 {
            return Ok(0.0);
        }
        Ok(40.0 + 15.0 * edits + (words / 4.0).min(20.0))
    }

    async fn process(&self, seed: &SeedSnapshot, ctx: &AutomationContext) -> Result<Vec<TransactionDraft>> {
        let existing: Vec<&str> = seed.state.tags.iter().map(|t| t.name.as_str()).collect();
        let prompt = format!(
            "Suggest up to {MAX_TAGS} short topical tags for this note. \
             Existing tags: {existing:?}. Respond with JSON: {{\"tags\": [\"...\"]}}.\n\nNote:\n{}",
            seed.state.content
        );

        let raw = ctx.ai.complete_json(&prompt).await?;
        let suggestions: TagSuggestions = parse_structured(&raw)?;

        let mut accepted: Vec<String> = Vec::new();
        for name in suggestions.tags {
            let name = name.trim().to_string();
            if name.is_empty()
                || seed.state.has_tag(&name)
                || accepted.iter().any(|a| a.eq_ignore_ascii_case(&name))
            {
                continue;
            }
            accepted.push(name);
            if accepted.len() == MAX_TAGS {
                break;
            }
        }

        Ok(accepted
            .into_iter()
            .map(|name| {
                TransactionDraft::patch(
                    seed.id,
                    TransactionType::AddTag,
                    vec![PatchOperation::add(
                        "/tags/-",
                        json!({ "id": Uuid::now_v7().to_string(), "name": name }),
                    )],
                )
                .by_automation(ctx.automation_id)
            })
            .collect())
    }
}
