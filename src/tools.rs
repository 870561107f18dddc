//! Tool Contract Registry
//!
//! The model may only call tools listed here. `Tool` is a closed enum, so
//! an unknown name can only show up as a failed `resolve`, which the
//! orchestrator reports back to the model as a tool error.

use crate::db::{QueryExecutor, QuerySpec, Rows};
use crate::error::{AssistantError, Result};
use crate::llm::{FunctionSpec, ToolSpec};
use serde_json::{json, Value};
use std::collections::HashSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tool {
    /// Run one SQL statement against the trending table.
    ExecuteQuery,
}

/// Parsed, validated arguments for a tool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolArguments {
    ExecuteQuery { query: String },
}

impl Tool {
    pub const ALL: [Tool; 1] = [Tool::ExecuteQuery];

    pub fn name(self) -> &'static str {
        match self {
            Tool::ExecuteQuery => "execute_query",
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            Tool::ExecuteQuery => {
                "Executes SQL queries on the youtube_trending_data table based on user requirements."
            }
        }
    }

    pub fn parameters(self) -> Value {
        match self {
            Tool::ExecuteQuery => json!({
                "type": "object",
                "properties": {
                    "query": {
                        "type": "string",
                        "description": "The SQL query string to execute on the database."
                    }
                },
                "required": ["query"]
            }),
        }
    }

    pub fn spec(self) -> ToolSpec {
        ToolSpec {
            kind: "function".to_string(),
            function: FunctionSpec {
                name: self.name().to_string(),
                description: self.description().to_string(),
                parameters: self.parameters(),
            },
        }
    }

    /// Decode the model's JSON argument string. Fields other than the
    /// declared ones are ignored.
    pub fn parse_arguments(self, raw: &str) -> Result<ToolArguments> {
        let value: Value = serde_json::from_str(raw)
            .map_err(|e| AssistantError::MalformedToolArguments(format!("{}: {}", self.name(), e)))?;

        match self {
            Tool::ExecuteQuery => {
                let query = value
                    .get("query")
                    .and_then(Value::as_str)
                    .map(str::trim)
                    .filter(|q| !q.is_empty())
                    .ok_or_else(|| {
                        AssistantError::MalformedToolArguments(format!(
                            "{}: missing required string field 'query'",
                            self.name()
                        ))
                    })?;
                Ok(ToolArguments::ExecuteQuery {
                    query: query.to_string(),
                })
            }
        }
    }

    /// Run the tool. The fetch mode is always inferred from the statement.
    pub async fn invoke(self, arguments: ToolArguments, executor: &QueryExecutor) -> Result<Rows> {
        match (self, arguments) {
            (Tool::ExecuteQuery, ToolArguments::ExecuteQuery { query }) => {
                executor.execute(QuerySpec::new(query)).await
            }
        }
    }
}

pub struct ToolRegistry {
    tools: Vec<Tool>,
    specs: Vec<ToolSpec>,
}

impl ToolRegistry {
    /// Registry with every known tool, validated.
    pub fn new() -> Result<Self> {
        Self::with_tools(&Tool::ALL)
    }

    pub fn with_tools(tools: &[Tool]) -> Result<Self> {
        let mut seen = HashSet::new();
        for tool in tools {
            if !seen.insert(tool.name()) {
                return Err(AssistantError::Config(format!(
                    "Tool '{}' registered twice",
                    tool.name()
                )));
            }
            validate_schema(*tool)?;
        }
        Ok(Self {
            tools: tools.to_vec(),
            specs: tools.iter().map(|t| t.spec()).collect(),
        })
    }

    pub fn list_tools(&self) -> &[ToolSpec] {
        &self.specs
    }

    pub fn resolve(&self, name: &str) -> Option<Tool> {
        self.tools.iter().copied().find(|tool| tool.name() == name)
    }
}

/// Every required field must be declared under `properties`.
fn validate_schema(tool: Tool) -> Result<()> {
    let schema = tool.parameters();
    let invalid = |reason: &str| {
        AssistantError::Config(format!("Tool '{}' has an invalid schema: {}", tool.name(), reason))
    };

    if schema.get("type").and_then(Value::as_str) != Some("object") {
        return Err(invalid("parameters must be an object"));
    }
    let properties = schema
        .get("properties")
        .and_then(Value::as_object)
        .ok_or_else(|| invalid("missing properties"))?;
    let required = schema
        .get("required")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or(&[]);
    for field in required {
        let declared = field
            .as_str()
            .map(|name| properties.contains_key(name))
            .unwrap_or(false);
        if !declared {
            return Err(invalid(&format!("required field {} is not declared", field)));
        }
    }
    Ok(())
}
