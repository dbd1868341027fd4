// AI implementation using OpenAI
//
// This is the infrastructure implementation of BaseAI.
// Business logic (what to prompt for) lives in the automation kinds.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::BaseAI;

const CHAT_COMPLETIONS_URL: &str = "https://api.openai.com/v1/chat/completions";
const SYSTEM_PROMPT: &str = "You are a helpful assistant.";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<&'a Value>,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: Value,
}

/// OpenAI chat completions client
#[derive(Clone)]
pub struct OpenAIClient {
    http: reqwest::Client,
    api_key: String,
    model: String,
}

impl OpenAIClient {
    pub fn new(api_key: String, model: String) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            http,
            api_key,
            model,
        })
    }

    async fn chat(&self, request: ChatRequest<'_>) -> Result<Value> {
        tracing::debug!(model = %self.model, messages = request.messages.len(), "Calling OpenAI API");

        let response = self
            .http
            .post(CHAT_COMPLETIONS_URL)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .context("Failed to send request to OpenAI")?
            .error_for_status()
            .context("OpenAI API returned an error status")?;

        let body: ChatResponse = response
            .json()
            .await
            .context("Failed to parse OpenAI response")?;

        body.choices
            .into_iter()
            .next()
            .map(|choice| choice.message)
            .context("OpenAI response contained no choices")
    }

    fn messages_for(prompt: &str) -> Vec<Value> {
        vec![
            serde_json::json!({ "role": "system", "content": SYSTEM_PROMPT }),
            serde_json::json!({ "role": "user", "content": prompt }),
        ]
    }
}

fn message_text(message: &Value) -> String {
    message
        .get("content")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

#[async_trait]
impl BaseAI for OpenAIClient {
    async fn complete(&self, prompt: &str) -> Result<String> {
        let message = self
            .chat(ChatRequest {
                model: &self.model,
                messages: Self::messages_for(prompt),
                response_format: None,
                tools: None,
            })
            .await?;
        Ok(message_text(&message))
    }

    async fn complete_json(&self, prompt: &str) -> Result<String> {
        let message = self
            .chat(ChatRequest {
                model: &self.model,
                messages: Self::messages_for(prompt),
                response_format: Some(serde_json::json!({ "type": "json_object" })),
                tools: None,
            })
            .await?;
        Ok(message_text(&message))
    }

    async fn generate_with_tools(&self, messages: &[Value], tools: &Value) -> Result<Value> {
        self.chat(ChatRequest {
            model: &self.model,
            messages: messages.to_vec(),
            response_format: None,
            tools: Some(tools),
        })
        .await
    }
}

/// Generator used when no API key is configured. Every JSON completion is an
/// empty object, which the automations read as "nothing to suggest".
#[derive(Debug, Clone, Default)]
pub struct NoopAI;

#[async_trait]
impl BaseAI for NoopAI {
    async fn complete(&self, _prompt: &str) -> Result<String> {
        Ok(String::new())
    }

    async fn complete_json(&self, _prompt: &str) -> Result<String> {
        Ok("{}".to_string())
    }
}

/// Parses a JSON completion into `T`, tolerating markdown code fences around
/// the payload.
pub fn parse_structured<T: DeserializeOwned>(raw: &str) -> Result<T> {
    let trimmed = raw.trim();
    let body = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .map(|rest| rest.trim_end().trim_end_matches("```").trim())
        .unwrap_or(trimmed);

    serde_json::from_str(body).with_context(|| {
        let preview: String = body.chars().take(200).collect();
        format!("Failed to parse structured response: {}", preview)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Tags {
        tags: Vec<String>,
    }

    #[test]
    fn parses_plain_json() {
        let parsed: Tags = parse_structured(r#"{"tags": ["a"]}"#).expect("parse");
        assert_eq!(parsed.tags, vec!["a"]);
    }

    #[test]
    fn strips_code_fences() {
        let raw = "```json\n{\"tags\": [\"a\", \"b\"]}\n```";
        let parsed: Tags = parse_structured(raw).expect("parse");
        assert_eq!(parsed.tags.len(), 2);
    }

    #[test]
    fn rejects_garbage() {
        assert!(parse_structured::<Tags>("not json").is_err());
    }

    #[tokio::test]
    async fn noop_returns_empty_object() {
        let raw = NoopAI.complete_json("anything").await.expect("complete");
        assert_eq!(raw, "{}");
    }
}
