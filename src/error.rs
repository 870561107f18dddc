use thiserror::Error;

#[derive(Error, Debug)]
pub enum AssistantError {
    /// Store unreachable after the single reconnect attempt.
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Query execution error: {0}")]
    QueryExecution(String),

    #[error("Unknown tool requested: {0}")]
    ToolResolution(String),

    #[error("LLM provider error: {0}")]
    Provider(String),

    #[error("Malformed tool arguments: {0}")]
    MalformedToolArguments(String),

    #[error("Conversation protocol error: {0}")]
    Protocol(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Dataset error: {0}")]
    Dataset(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl AssistantError {
    /// Errors that are folded back into the conversation as a tool result
    /// instead of ending the turn.
    pub fn is_absorbable(&self) -> bool {
        matches!(
            self,
            AssistantError::QueryExecution(_)
                | AssistantError::ToolResolution(_)
                | AssistantError::MalformedToolArguments(_)
        )
    }

    /// Stable snake_case tag used in tool result error markers.
    pub fn kind(&self) -> &'static str {
        match self {
            AssistantError::Connection(_) => "connection_error",
            AssistantError::QueryExecution(_) => "query_execution_error",
            AssistantError::ToolResolution(_) => "tool_resolution_error",
            AssistantError::Provider(_) => "provider_error",
            AssistantError::MalformedToolArguments(_) => "malformed_tool_arguments",
            AssistantError::Protocol(_) => "protocol_error",
            AssistantError::Config(_) => "config_error",
            AssistantError::Dataset(_) => "dataset_error",
            AssistantError::Io(_) => "io_error",
            AssistantError::Json(_) => "json_error",
        }
    }
}

pub type Result<T> = std::result::Result<T, AssistantError>;
