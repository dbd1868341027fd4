use std::collections::BTreeSet;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::domains::automations::{Automation, AutomationContext};
use crate::domains::seeds::{PatchOperation, SeedSnapshot, TransactionDraft, TransactionType};
use crate::kernel::ai::parse_structured;

const MAX_REFERENCES: usize = 5;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Reference {
    title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    note: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ReferenceResponse {
    #[serde(default)]
    references: Vec<Reference>,
}

/// Capitalized words that do not start a sentence, e.g. "met Ada in Paris".
fn proper_nouns(content: &str) -> BTreeSet<String> {
    let mut nouns = BTreeSet::new();
    let mut sentence_start = true;

    for raw in content.split_whitespace() {
        let word = raw.trim_matches(|c: char| !c.is_alphanumeric());
        let starts_upper = word.chars().next().is_some_and(char::is_uppercase);

        if !sentence_start && starts_upper && word.chars().count() > 1 {
            nouns.insert(word.to_string());
        }
        sentence_start = raw.ends_with(['.', '!', '?']);
    }
    nouns
}

/// Looks up background references for people, places and works mentioned
/// in a seed.
pub struct ReferenceAutomation;

#[async_trait]
impl Automation for ReferenceAutomation {
    fn name(&self) -> &'static str {
        "reference"
    }

    fn description(&self) -> &'static str {
        "Finds references for names mentioned in a seed"
    }

    async fn calculate_pressure(&self, seed: &SeedSnapshot, ctx: &AutomationContext) -> Result<f64> {
        let count = proper_nouns(&seed.state.content).len();
        if count == 0 {
            return Ok(0.0);
        }
        if ctx.has_run() && ctx.edits_since_last_run() == 0 {
            return Ok(0.0);
        }
        Ok(50.0 + 15.0 * count as f64)
    }

    async fn process(&self, seed: &SeedSnapshot, ctx: &AutomationContext) -> Result<Vec<TransactionDraft>> {
        let names: Vec<String> = proper_nouns(&seed.state.content).into_iter().collect();
        let prompt = format!(
            "List up to {MAX_REFERENCES} references (title, optional url, optional note) that \
             give background on {names:?} as mentioned in this note. Respond with JSON: \
             {{\"references\": [{{\"title\": \"...\", \"url\": \"...\", \"note\": \"...\"}}]}}.\
             \n\nNote:\n{}",
            seed.state.content
        );

        let raw = ctx.ai.complete_json(&prompt).await?;
        let response: ReferenceResponse = parse_structured(&raw)?;

        let references: Vec<Reference> = response
            .references
            .into_iter()
            .filter(|r| !r.title.trim().is_empty())
            .take(MAX_REFERENCES)
            .collect();
        if references.is_empty() {
            return Ok(Vec::new());
        }

        Ok(vec![TransactionDraft::patch(
            seed.id,
            TransactionType::AddReference,
            vec![PatchOperation::add("/metadata/references", json!(references))],
        )
        .by_automation(ctx.automation_id)])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domains::automations::kinds::testing::{context, snapshot};
    use crate::kernel::test_dependencies::MockAI;
    use chrono::Utc;

    #[test]
    fn finds_capitalized_words_mid_sentence() {
        let nouns = proper_nouns("Met Ada in Paris. Then we read Dune together");
        let nouns: Vec<&str> = nouns.iter().map(String::as_str).collect();
        assert_eq!(nouns, vec!["Ada", "Dune", "Paris"]);
    }

    #[tokio::test]
    async fn pressure_counts_names() {
        let ctx = context(MockAI::new(), vec![], None, Utc::now());
        let pressure = ReferenceAutomation
            .calculate_pressure(&snapshot("met Ada in Paris"), &ctx)
            .await
            .expect("pressure");
        assert_eq!(pressure, 80.0);

        let none = ReferenceAutomation
            .calculate_pressure(&snapshot("nothing special here"), &ctx)
            .await
            .expect("pressure");
        assert_eq!(none, 0.0);
    }

    #[tokio::test]
    async fn stores_references_in_metadata() {
        let ai = MockAI::new().with_response(
            r#"{"references": [{"title": "Ada Lovelace", "url": "https://example.org/ada"}, {"title": ""}]}"#,
        );
        let ctx = context(ai, vec![], None, Utc::now());

        let drafts = ReferenceAutomation
            .process(&snapshot("met Ada in Paris"), &ctx)
            .await
            .expect("process");
        let op = &drafts[0].data.as_patch().expect("patch")[0];
        assert_eq!(op.path, "/metadata/references");
        assert_eq!(
            op.value.as_ref().expect("value"),
            &json!([{"title": "Ada Lovelace", "url": "https://example.org/ada"}])
        );
    }
}
