pub mod config;
pub mod conversation;
pub mod dataset;
pub mod db;
pub mod error;
pub mod llm;
pub mod orchestrator;
pub mod schema;
pub mod tools;

pub use config::AppConfig;
pub use conversation::{Conversation, Message, ToolCallRequest, ToolResult};
pub use db::{PgConnector, QueryExecutor, QuerySpec};
pub use error::{AssistantError, Result};
pub use llm::{ChatProvider, LlmClient};
pub use orchestrator::{Orchestrator, TurnReport, APOLOGY};
pub use tools::{Tool, ToolRegistry};
