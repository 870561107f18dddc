use crate::config::LlmSettings;
use crate::conversation::{Message, ToolCallRequest};
use crate::error::{AssistantError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// A callable capability advertised to the model, in chat-completions shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSpec {
    #[serde(rename = "type")]
    pub kind: String,
    pub function: FunctionSpec,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionSpec {
    pub name: String,
    pub description: String,
    /// JSON schema of the arguments object.
    pub parameters: serde_json::Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolChoice {
    Auto,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChatRequest {
    pub messages: Vec<Message>,
    /// Empty means no tools are offered this round.
    pub tools: Vec<ToolSpec>,
    pub tool_choice: Option<ToolChoice>,
}

/// The model's reply: text, tool-call requests, or both.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct AssistantMessage {
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub tool_calls: Vec<ToolCallRequest>,
}

impl AssistantMessage {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
            tool_calls: Vec::new(),
        }
    }

    pub fn with_tool_calls(tool_calls: Vec<ToolCallRequest>) -> Self {
        Self {
            content: None,
            tool_calls,
        }
    }

    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }
}

fn null_as_empty<'de, D>(deserializer: D) -> std::result::Result<Vec<ToolCallRequest>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(Option::<Vec<ToolCallRequest>>::deserialize(deserializer)?.unwrap_or_default())
}

/// Chat-completion provider boundary.
#[async_trait]
pub trait ChatProvider: Send + Sync {
    async fn complete(&self, request: ChatRequest) -> Result<AssistantMessage>;
}

#[derive(Serialize)]
struct CompletionBody<'a> {
    model: &'a str,
    messages: &'a [Message],
    #[serde(skip_serializing_if = "<[ToolSpec]>::is_empty")]
    tools: &'a [ToolSpec],
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_choice: Option<ToolChoice>,
    max_completion_tokens: u32,
}

/// Client for any OpenAI-compatible `/chat/completions` endpoint (Groq by
/// default).
pub struct LlmClient {
    http: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
    max_completion_tokens: u32,
}

impl LlmClient {
    pub fn new(settings: &LlmSettings) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_key: settings.api_key.clone(),
            base_url: settings.base_url.clone(),
            model: settings.model.clone(),
            max_completion_tokens: settings.max_completion_tokens,
        }
    }

    fn body<'a>(&'a self, request: &'a ChatRequest) -> CompletionBody<'a> {
        CompletionBody {
            model: &self.model,
            messages: &request.messages,
            tools: &request.tools,
            tool_choice: if request.tools.is_empty() {
                None
            } else {
                request.tool_choice
            },
            max_completion_tokens: self.max_completion_tokens,
        }
    }
}

#[async_trait]
impl ChatProvider for LlmClient {
    async fn complete(&self, request: ChatRequest) -> Result<AssistantMessage> {
        debug!(
            "Calling {} with {} messages and {} tools",
            self.model,
            request.messages.len(),
            request.tools.len()
        );

        let response = self
            .http
            .post(format!("{}/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&self.body(&request))
            .send()
            .await
            .map_err(|e| AssistantError::Provider(format!("LLM API call failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AssistantError::Provider(format!(
                "LLM API returned {}: {}",
                status, body
            )));
        }

        let response_json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| AssistantError::Provider(format!("Failed to parse LLM response: {}", e)))?;

        parse_completion(response_json)
    }
}

/// Extract `choices[0].message` from a chat-completions response body.
pub fn parse_completion(mut response_json: serde_json::Value) -> Result<AssistantMessage> {
    let message = response_json
        .get_mut("choices")
        .and_then(|choices| choices.get_mut(0))
        .and_then(|choice| choice.get_mut("message"))
        .map(serde_json::Value::take)
        .ok_or_else(|| AssistantError::Provider("No message in LLM response".to_string()))?;

    serde_json::from_value(message)
        .map_err(|e| AssistantError::Provider(format!("Malformed LLM message: {}", e)))
}
