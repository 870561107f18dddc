//! Conversation Orchestrator
//!
//! Runs one turn of the tool-calling protocol:
//!
//! ```text
//! Init -> AwaitingFirstCompletion -> Done
//!                                 -> ExecutingTools -> AwaitingFinalCompletion -> Done
//! ```
//!
//! `Failed` is reachable from every non-terminal state and always yields
//! the apology text. Query failures, unknown tools and bad arguments are
//! reported back to the model as tool results; a lost store connection or
//! a provider failure ends the turn.

use crate::conversation::{Conversation, Message, ToolCallRequest, ToolResult};
use crate::db::{QueryExecutor, Rows};
use crate::error::{AssistantError, Result};
use crate::llm::{AssistantMessage, ChatProvider, ChatRequest, ToolChoice};
use crate::schema;
use crate::tools::ToolRegistry;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

pub const APOLOGY: &str = "An error occurred while processing your request.";

pub struct Orchestrator {
    provider: Arc<dyn ChatProvider>,
    executor: Arc<QueryExecutor>,
    registry: ToolRegistry,
}

/// Everything a turn produced, for callers that need more than the answer.
#[derive(Debug)]
pub struct TurnReport {
    pub turn_id: Uuid,
    pub answer: String,
    pub conversation: Conversation,
    /// Set when the turn ended in `Failed`; `answer` is then the apology.
    pub error: Option<AssistantError>,
}

impl TurnReport {
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }

    /// The user/assistant pair to re-supply as history on the next turn.
    /// Failed turns contribute nothing.
    pub fn history_entries(&self, prompt: &str) -> Vec<Message> {
        if !self.is_success() {
            return Vec::new();
        }
        vec![
            Message::User {
                content: prompt.to_string(),
            },
            AssistantMessage::text(self.answer.clone()).into(),
        ]
    }
}

#[derive(Debug)]
enum TurnState {
    Init,
    AwaitingFirstCompletion,
    ExecutingTools(Vec<ToolCallRequest>),
    AwaitingFinalCompletion,
    Done(String),
    Failed(AssistantError),
}

impl Orchestrator {
    pub fn new(
        provider: Arc<dyn ChatProvider>,
        executor: Arc<QueryExecutor>,
        registry: ToolRegistry,
    ) -> Self {
        Self {
            provider,
            executor,
            registry,
        }
    }

    /// Answer a single prompt with no prior history. Never fails: errors are
    /// logged and turned into the apology text.
    pub async fn respond(&self, prompt: &str) -> String {
        self.run_turn(&[], prompt).await.answer
    }

    /// Run one turn on top of earlier user/assistant exchanges.
    pub async fn run_turn(&self, history: &[Message], prompt: &str) -> TurnReport {
        let turn_id = Uuid::new_v4();
        let mut conversation = Conversation::new(schema::context());
        let mut state = TurnState::Init;

        info!(turn = %turn_id, "Received user prompt: {}", prompt);

        loop {
            state = match state {
                TurnState::Init => match conversation.extend_history(history) {
                    Ok(()) => {
                        conversation.push_user(prompt);
                        TurnState::AwaitingFirstCompletion
                    }
                    Err(e) => TurnState::Failed(e),
                },
                TurnState::AwaitingFirstCompletion => {
                    self.first_completion(&mut conversation).await
                }
                TurnState::ExecutingTools(calls) => {
                    match self.execute_tools(&mut conversation, calls).await {
                        Ok(()) => TurnState::AwaitingFinalCompletion,
                        Err(e) => TurnState::Failed(e),
                    }
                }
                TurnState::AwaitingFinalCompletion => {
                    self.final_completion(&mut conversation).await
                }
                TurnState::Done(answer) => {
                    info!(turn = %turn_id, "✅ Turn completed");
                    return TurnReport {
                        turn_id,
                        answer,
                        conversation,
                        error: None,
                    };
                }
                TurnState::Failed(e) => {
                    error!(turn = %turn_id, "Error in LLM query processing: {}", e);
                    return TurnReport {
                        turn_id,
                        answer: APOLOGY.to_string(),
                        conversation,
                        error: Some(e),
                    };
                }
            };
        }
    }

    async fn first_completion(&self, conversation: &mut Conversation) -> TurnState {
        let request = ChatRequest {
            messages: conversation.messages().to_vec(),
            tools: self.registry.list_tools().to_vec(),
            tool_choice: Some(ToolChoice::Auto),
        };

        let message = match self.provider.complete(request).await {
            Ok(message) => message,
            Err(e) => return TurnState::Failed(e),
        };
        info!("LLM response received successfully.");

        if message.has_tool_calls() {
            let message = without_repeated_ids(message);
            let calls = message.tool_calls.clone();
            info!(
                "Tool calls detected: {}",
                calls
                    .iter()
                    .map(|c| c.function.name.as_str())
                    .collect::<Vec<_>>()
                    .join(", ")
            );
            conversation.push_assistant(message);
            return TurnState::ExecutingTools(calls);
        }

        match answer_text(&message) {
            Ok(answer) => {
                conversation.push_assistant(message);
                TurnState::Done(answer)
            }
            Err(e) => TurnState::Failed(e),
        }
    }

    /// Every call gets exactly one result, in the order the model sent them.
    async fn execute_tools(
        &self,
        conversation: &mut Conversation,
        calls: Vec<ToolCallRequest>,
    ) -> Result<()> {
        for call in &calls {
            let result = match self.invoke(call).await {
                Ok(rows) => {
                    info!("🔧 {} returned {} rows", call.function.name, rows.len());
                    ToolResult::success(call, rows)
                }
                Err(e) if e.is_absorbable() => {
                    warn!("Tool call '{}' failed: {}", call.id, e);
                    ToolResult::failure(call, &e)
                }
                Err(e) => return Err(e),
            };
            conversation.push_tool_result(result)?;
        }
        Ok(())
    }

    async fn invoke(&self, call: &ToolCallRequest) -> Result<Rows> {
        let tool = self
            .registry
            .resolve(&call.function.name)
            .ok_or_else(|| AssistantError::ToolResolution(call.function.name.clone()))?;
        let arguments = tool.parse_arguments(&call.function.arguments)?;
        tool.invoke(arguments, &self.executor).await
    }

    /// The follow-up completion offers no tools, so the turn ends here.
    async fn final_completion(&self, conversation: &mut Conversation) -> TurnState {
        let request = ChatRequest {
            messages: conversation.messages().to_vec(),
            tools: Vec::new(),
            tool_choice: None,
        };

        let message = match self.provider.complete(request).await {
            Ok(message) => message,
            Err(e) => return TurnState::Failed(e),
        };

        if message.has_tool_calls() {
            warn!(
                "Ignoring {} tool calls in the final completion",
                message.tool_calls.len()
            );
        }

        match answer_text(&message) {
            Ok(answer) => {
                conversation.push_assistant(AssistantMessage::text(answer.clone()));
                TurnState::Done(answer)
            }
            Err(e) => TurnState::Failed(e),
        }
    }
}

/// Keep the first call for each id. A repeated id can't be answered
/// unambiguously, so its statement is never run.
fn without_repeated_ids(mut message: AssistantMessage) -> AssistantMessage {
    let mut seen = HashSet::new();
    let before = message.tool_calls.len();
    message.tool_calls.retain(|call| seen.insert(call.id.clone()));
    let dropped = before - message.tool_calls.len();
    if dropped > 0 {
        warn!("Dropped {} tool calls with a repeated id", dropped);
    }
    message
}

fn answer_text(message: &AssistantMessage) -> Result<String> {
    message
        .content
        .as_deref()
        .filter(|text| !text.trim().is_empty())
        .map(str::to_string)
        .ok_or_else(|| AssistantError::Provider("LLM returned an empty answer".to_string()))
}
