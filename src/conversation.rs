//! Conversation data model
//!
//! Messages serialize in chat-completions wire shape. `Conversation` enforces
//! the ordering rules: one leading system message, and tool results only in
//! answer to an outstanding tool call of the latest assistant message.

use crate::db::Rows;
use crate::error::{AssistantError, Result};
use crate::llm::AssistantMessage;
use serde::{Deserialize, Serialize};
use serde_json::json;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "lowercase")]
pub enum Message {
    System {
        content: String,
    },
    User {
        content: String,
    },
    Assistant {
        #[serde(default)]
        content: Option<String>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        tool_calls: Vec<ToolCallRequest>,
    },
    Tool {
        tool_call_id: String,
        name: String,
        content: String,
    },
}

impl Message {
    pub fn role(&self) -> &'static str {
        match self {
            Message::System { .. } => "system",
            Message::User { .. } => "user",
            Message::Assistant { .. } => "assistant",
            Message::Tool { .. } => "tool",
        }
    }
}

impl From<AssistantMessage> for Message {
    fn from(message: AssistantMessage) -> Self {
        Message::Assistant {
            content: message.content,
            tool_calls: message.tool_calls,
        }
    }
}

/// A tool invocation requested by the model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCallRequest {
    pub id: String,
    #[serde(rename = "type", default = "function_kind")]
    pub kind: String,
    pub function: FunctionCall,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionCall {
    pub name: String,
    /// JSON-encoded arguments, exactly as the model produced them.
    pub arguments: String,
}

fn function_kind() -> String {
    "function".to_string()
}

impl ToolCallRequest {
    pub fn new(id: impl Into<String>, name: impl Into<String>, arguments: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: function_kind(),
            function: FunctionCall {
                name: name.into(),
                arguments: arguments.into(),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolErrorMarker {
    pub kind: String,
    pub message: String,
}

/// Outcome of one tool call. `rows` is `None` whenever `error` is set.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolResult {
    pub tool_call_id: String,
    pub tool_name: String,
    pub rows: Option<Rows>,
    pub error: Option<ToolErrorMarker>,
}

impl ToolResult {
    pub fn success(call: &ToolCallRequest, rows: Rows) -> Self {
        Self {
            tool_call_id: call.id.clone(),
            tool_name: call.function.name.clone(),
            rows: Some(rows),
            error: None,
        }
    }

    pub fn failure(call: &ToolCallRequest, error: &AssistantError) -> Self {
        Self {
            tool_call_id: call.id.clone(),
            tool_name: call.function.name.clone(),
            rows: None,
            error: Some(ToolErrorMarker {
                kind: error.kind().to_string(),
                message: error.to_string(),
            }),
        }
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }

    /// `{"rows": [...] | null, "error": null | {"kind", "message"}}`
    pub fn payload(&self) -> serde_json::Value {
        json!({
            "rows": self.rows,
            "error": self.error,
        })
    }
}

impl From<ToolResult> for Message {
    fn from(result: ToolResult) -> Self {
        Message::Tool {
            content: result.payload().to_string(),
            tool_call_id: result.tool_call_id,
            name: result.tool_name,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Conversation {
    messages: Vec<Message>,
}

impl Conversation {
    pub fn new(system_context: impl Into<String>) -> Self {
        Self {
            messages: vec![Message::System {
                content: system_context.into(),
            }],
        }
    }

    /// Replay earlier turns. Only plain user and assistant text is accepted;
    /// tool traffic from earlier turns is not carried over.
    pub fn extend_history(&mut self, history: &[Message]) -> Result<()> {
        for message in history {
            match message {
                Message::User { .. } => {}
                Message::Assistant { tool_calls, .. } if tool_calls.is_empty() => {}
                other => {
                    return Err(AssistantError::Protocol(format!(
                        "History may only contain user and assistant text, found a {} message",
                        other.role()
                    )))
                }
            }
        }
        self.messages.extend_from_slice(history);
        Ok(())
    }

    pub fn push_user(&mut self, content: impl Into<String>) {
        self.messages.push(Message::User {
            content: content.into(),
        });
    }

    pub fn push_assistant(&mut self, message: AssistantMessage) {
        self.messages.push(message.into());
    }

    pub fn push_tool_result(&mut self, result: ToolResult) -> Result<()> {
        let pending = self.pending_tool_calls();
        if !pending.iter().any(|id| *id == result.tool_call_id) {
            return Err(AssistantError::Protocol(format!(
                "Tool result '{}' does not answer an outstanding tool call",
                result.tool_call_id
            )));
        }
        self.messages.push(result.into());
        Ok(())
    }

    /// Ids of the latest assistant message's tool calls that have no result
    /// yet. Empty if anything other than tool results follows that message.
    pub fn pending_tool_calls(&self) -> Vec<&str> {
        let Some(position) = self
            .messages
            .iter()
            .rposition(|m| matches!(m, Message::Assistant { .. }))
        else {
            return Vec::new();
        };

        let Message::Assistant { tool_calls, .. } = &self.messages[position] else {
            return Vec::new();
        };

        let mut answered = Vec::new();
        for message in &self.messages[position + 1..] {
            match message {
                Message::Tool { tool_call_id, .. } => answered.push(tool_call_id.as_str()),
                _ => return Vec::new(),
            }
        }

        tool_calls
            .iter()
            .map(|call| call.id.as_str())
            .filter(|id| !answered.contains(id))
            .collect()
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn tool_messages(&self) -> impl Iterator<Item = &Message> {
        self.messages
            .iter()
            .filter(|m| matches!(m, Message::Tool { .. }))
    }

    /// Text of the final assistant message, if the conversation ends with one.
    pub fn final_answer(&self) -> Option<&str> {
        match self.messages.last() {
            Some(Message::Assistant {
                content: Some(content),
                tool_calls,
            }) if tool_calls.is_empty() => Some(content),
            _ => None,
        }
    }
}
