use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// One role-tagged entry of a completion request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

/// Stateless text-generation collaborator. The send pipeline only depends on
/// this seam, so tests can script replies without a network.
#[async_trait]
pub trait CompletionBackend: Send + Sync {
    async fn complete(&self, input: Vec<ChatMessage>) -> Result<String>;
}

/// Client for the OpenAI Responses API (single-shot, stateless).
#[derive(Clone)]
pub struct CompletionClient {
    api_url: String,
    api_key: String,
    model: String,
    client: reqwest::Client,
}

#[derive(Debug, Serialize)]
struct ResponsesRequest {
    model: String,
    input: Vec<ChatMessage>,
}

#[derive(Debug, Default, Deserialize)]
struct ResponsesBody {
    #[serde(default)]
    output_text: Option<String>,
    #[serde(default)]
    output: Vec<OutputItem>,
}

#[derive(Debug, Default, Deserialize)]
struct OutputItem {
    #[serde(default)]
    content: Vec<OutputContent>,
}

#[derive(Debug, Default, Deserialize)]
struct OutputContent {
    #[serde(default)]
    text: Option<String>,
}

impl CompletionClient {
    /// Build a client. Every request is bounded by `timeout`; expiry surfaces
    /// as a completion failure.
    pub fn new(api_url: String, api_key: String, model: String, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build completion HTTP client")?;
        Ok(Self {
            api_url,
            api_key,
            model,
            client,
        })
    }
}

#[async_trait]
impl CompletionBackend for CompletionClient {
    async fn complete(&self, input: Vec<ChatMessage>) -> Result<String> {
        let url = format!("{}/v1/responses", self.api_url.trim_end_matches('/'));

        let request = ResponsesRequest {
            model: self.model.clone(),
            input,
        };

        let mut req = self.client.post(&url).json(&request);

        // Add API key header if provided (not needed for local models)
        if !self.api_key.is_empty() {
            req = req.header("Authorization", format!("Bearer {}", self.api_key));
        }

        let response = req.send().await.context("Failed to send completion request")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unable to read body".to_string());
            anyhow::bail!("Completion API returned error {}: {}", status, body);
        }

        let body: ResponsesBody = response
            .json()
            .await
            .context("Failed to parse completion response")?;

        Ok(extract_reply_text(&body))
    }
}

/// Pull the reply text out of a Responses API payload. Tolerates both the
/// flat `output_text` field and the nested `output[].content[].text` shape;
/// missing text is an empty string, not an error.
fn extract_reply_text(body: &ResponsesBody) -> String {
    if let Some(text) = &body.output_text {
        return text.clone();
    }
    body.output
        .first()
        .and_then(|item| item.content.first())
        .and_then(|content| content.text.clone())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_flat_output_text() {
        let body: ResponsesBody = serde_json::from_str(
            r#"{"output_text": "hello from the model", "id": "resp_1"}"#,
        )
        .unwrap();
        assert_eq!(extract_reply_text(&body), "hello from the model");
    }

    #[test]
    fn extracts_nested_output_content() {
        let body: ResponsesBody = serde_json::from_str(
            r#"{"output": [{"content": [{"type": "output_text", "text": "nested reply"}]}]}"#,
        )
        .unwrap();
        assert_eq!(extract_reply_text(&body), "nested reply");
    }

    #[test]
    fn flat_text_wins_over_nested() {
        let body: ResponsesBody = serde_json::from_str(
            r#"{"output_text": "flat", "output": [{"content": [{"text": "nested"}]}]}"#,
        )
        .unwrap();
        assert_eq!(extract_reply_text(&body), "flat");
    }

    #[test]
    fn missing_text_is_empty_string() {
        let body: ResponsesBody = serde_json::from_str(r#"{"id": "resp_2"}"#).unwrap();
        assert_eq!(extract_reply_text(&body), "");

        let body: ResponsesBody =
            serde_json::from_str(r#"{"output": [{"content": []}]}"#).unwrap();
        assert_eq!(extract_reply_text(&body), "");
    }

    #[test]
    fn request_serializes_role_tagged_input() {
        let request = ResponsesRequest {
            model: "gpt-4o-mini".to_string(),
            input: vec![ChatMessage {
                role: "system".to_string(),
                content: "be brief".to_string(),
            }],
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["model"], "gpt-4o-mini");
        assert_eq!(json["input"][0]["role"], "system");
        assert_eq!(json["input"][0]["content"], "be brief");
    }
}
