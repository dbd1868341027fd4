use anyhow::Result;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use crate::domains::automations::{Automation, AutomationContext};
use crate::domains::seeds::{PatchOperation, SeedSnapshot, TransactionDraft, TransactionType};
use crate::kernel::ai::parse_structured;

#[derive(Debug, Default, Deserialize)]
struct CategorySuggestion {
    #[serde(default)]
    category: Option<String>,
}

/// `" Work / Projects//Q3 "` becomes `"Work/Projects/Q3"`.
fn normalize_path(raw: &str) -> Option<String> {
    let segments: Vec<&str> = raw
        .split('/')
        .map(str::trim)
        .filter(|segment| !segment.is_empty())
        .collect();
    if segments.is_empty() {
        None
    } else {
        Some(segments.join("/"))
    }
}

/// Files a seed under one hierarchical category path.
pub struct CategorizeAutomation;

#[async_trait]
impl Automation for CategorizeAutomation {
    fn name(&self) -> &'static str {
        "categorize"
    }

    fn description(&self) -> &'static str {
        "Assigns a hierarchical category to a seed"
    }

    async fn calculate_pressure(&self, seed: &SeedSnapshot, ctx: &AutomationContext) -> Result<f64> {
        let words = seed.state.word_count() as f64;
        if words == 0.0 {
            return Ok(0.0);
        }
        if !ctx.has_run() {
            return Ok(55.0 + words.min(45.0));
        }

        let edits = ctx.edits_since_last_run() as f64;
        if edits == 0.0 {
            return Ok(0.0);
        }
        Ok(45.0 + 10.0 * edits)
    }

    async fn process(&self, seed: &SeedSnapshot, ctx: &AutomationContext) -> Result<Vec<TransactionDraft>> {
        let existing: Vec<&str> = seed
            .state
            .categories
            .iter()
            .map(|c| c.path.as_str())
            .collect();
        let prompt = format!(
            "Choose one category path for this note, most general first, separated by '/' \
             (for example \"work/projects/launch\"). Existing categories: {existing:?}. \
             Respond with JSON: {{\"category\": \"...\"}} or {{\"category\": null}}.\n\nNote:\n{}",
            seed.state.content
        );

        let raw = ctx.ai.complete_json(&prompt).await?;
        let suggestion: CategorySuggestion = parse_structured(&raw)?;

        let Some(path) = suggestion.category.as_deref().and_then(normalize_path) else {
            return Ok(Vec::new());
        };
        if seed.state.has_category(&path) {
            return Ok(Vec::new());
        }

        let name = path.rsplit('/').next().unwrap_or(&path).to_string();
        Ok(vec![TransactionDraft::patch(
            seed.id,
            TransactionType::SetCategory,
            vec![PatchOperation::add(
                "/categories/-",
                json!({ "id": Uuid::now_v7().to_string(), "name": name, "path": path }),
            )],
        )
        .by_automation(ctx.automation_id)])
    }
}
