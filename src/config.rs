//! Runtime configuration loaded from the environment
//!
//! `.env` is read first (via `dotenv`), then:
//! - `DATABASE_URL`, or the discrete `user` / `password` / `host` / `port` /
//!   `dbname` variables (libpq's `PGUSER`, `PGHOST`, ... are accepted too)
//! - `GROQ_API_KEY` (or `groq_api_key`) for the model provider
//! - optional `LLM_BASE_URL`, `LLM_MODEL`, `LLM_MAX_COMPLETION_TOKENS`

use crate::error::{AssistantError, Result};
use std::collections::HashMap;

pub const DEFAULT_BASE_URL: &str = "https://api.groq.com/openai/v1";
pub const DEFAULT_MODEL: &str = "llama-3.3-70b-versatile";
pub const DEFAULT_MAX_COMPLETION_TOKENS: u32 = 4096;
const DEFAULT_PG_PORT: u16 = 5432;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DatabaseSettings {
    Url(String),
    Parts {
        user: String,
        password: String,
        host: String,
        port: u16,
        dbname: String,
    },
}

impl DatabaseSettings {
    /// Connection target with credentials stripped, for logs.
    pub fn redacted(&self) -> String {
        match self {
            DatabaseSettings::Url(url) => url
                .rsplit_once('@')
                .map(|(_, host)| host.to_string())
                .unwrap_or_else(|| "database".to_string()),
            DatabaseSettings::Parts {
                host, port, dbname, ..
            } => format!("{}:{}/{}", host, port, dbname),
        }
    }

    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();
        let vars: HashMap<String, String> = std::env::vars().collect();
        Self::from_vars(&vars)
    }

    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self> {
        if let Some(url) = lookup(vars, &["DATABASE_URL"]) {
            return Ok(DatabaseSettings::Url(url));
        }

        let require = |names: &[&str]| {
            lookup(vars, names).ok_or_else(|| {
                AssistantError::Config(format!(
                    "Neither DATABASE_URL nor {} is set",
                    names.join("/")
                ))
            })
        };

        let port = match lookup(vars, &["port", "PGPORT"]) {
            Some(raw) => raw
                .parse::<u16>()
                .map_err(|e| AssistantError::Config(format!("Invalid port '{}': {}", raw, e)))?,
            None => DEFAULT_PG_PORT,
        };

        Ok(DatabaseSettings::Parts {
            user: require(&["user", "PGUSER"])?,
            password: require(&["password", "PGPASSWORD"])?,
            host: require(&["host", "PGHOST"])?,
            port,
            dbname: require(&["dbname", "PGDATABASE"])?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LlmSettings {
    pub api_key: String,
    pub base_url: String,
    pub model: String,
    pub max_completion_tokens: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
    pub database: DatabaseSettings,
    pub llm: LlmSettings,
}

impl AppConfig {
    /// Load `.env` and read the process environment.
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();
        let vars: HashMap<String, String> = std::env::vars().collect();
        Self::from_vars(&vars)
    }

    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self> {
        Ok(Self {
            database: DatabaseSettings::from_vars(vars)?,
            llm: LlmSettings::from_vars(vars)?,
        })
    }
}

impl LlmSettings {
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();
        let vars: HashMap<String, String> = std::env::vars().collect();
        Self::from_vars(&vars)
    }

    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self> {
        let api_key = lookup(vars, &["GROQ_API_KEY", "groq_api_key"]).ok_or_else(|| {
            AssistantError::Config("GROQ_API_KEY is not set".to_string())
        })?;

        let max_completion_tokens = match lookup(vars, &["LLM_MAX_COMPLETION_TOKENS"]) {
            Some(raw) => raw.parse::<u32>().map_err(|e| {
                AssistantError::Config(format!(
                    "Invalid LLM_MAX_COMPLETION_TOKENS '{}': {}",
                    raw, e
                ))
            })?,
            None => DEFAULT_MAX_COMPLETION_TOKENS,
        };

        Ok(Self {
            api_key,
            base_url: lookup(vars, &["LLM_BASE_URL"])
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string())
                .trim_end_matches('/')
                .to_string(),
            model: lookup(vars, &["LLM_MODEL"]).unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            max_completion_tokens,
        })
    }
}

/// First non-empty value among `names`.
fn lookup(vars: &HashMap<String, String>, names: &[&str]) -> Option<String> {
    names
        .iter()
        .filter_map(|name| vars.get(*name))
        .map(|value| value.trim())
        .find(|value| !value.is_empty())
        .map(str::to_string)
}
