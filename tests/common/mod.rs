#![allow(dead_code)]

use async_trait::async_trait;
use serde_json::json;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use youtrend_insights::db::{
    FetchMode, Row, Rows, SqlParam, StoreConnection, StoreConnector, StoreError, StoreResult,
};
use youtrend_insights::error::{AssistantError, Result};
use youtrend_insights::llm::{AssistantMessage, ChatProvider, ChatRequest};

/// Replays canned completions and records every request it receives.
#[derive(Default)]
pub struct ScriptedProvider {
    responses: Mutex<VecDeque<Result<AssistantMessage>>>,
    requests: Mutex<Vec<ChatRequest>>,
}

impl ScriptedProvider {
    pub fn new(responses: Vec<Result<AssistantMessage>>) -> Arc<Self> {
        Arc::new(Self {
            responses: Mutex::new(responses.into()),
            requests: Mutex::new(Vec::new()),
        })
    }

    pub fn requests(&self) -> Vec<ChatRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChatProvider for ScriptedProvider {
    async fn complete(&self, request: ChatRequest) -> Result<AssistantMessage> {
        self.requests.lock().unwrap().push(request);
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(AssistantError::Provider("script exhausted".to_string())))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallKind {
    Fetch(FetchMode),
    Execute,
    Batch,
}

#[derive(Debug, Clone)]
pub struct StoreCall {
    pub kind: CallKind,
    pub sql: String,
    pub params: Vec<SqlParam>,
    pub batch_rows: usize,
}

/// Shared, inspectable state behind `ScriptedConnector`.
#[derive(Default)]
pub struct StoreState {
    /// The next `fail_connects` connection attempts are refused.
    pub fail_connects: u32,
    pub connect_attempts: u32,
    pub close_calls: u32,
    pub calls: Vec<StoreCall>,
    /// Consumed one per statement; an empty queue answers `Ok(vec![])`.
    pub responses: VecDeque<StoreResult<Rows>>,
}

pub type SharedStore = Arc<Mutex<StoreState>>;

pub struct ScriptedConnector {
    state: SharedStore,
}

impl ScriptedConnector {
    pub fn new() -> (Self, SharedStore) {
        let state = SharedStore::default();
        (
            Self {
                state: Arc::clone(&state),
            },
            state,
        )
    }
}

#[async_trait]
impl StoreConnector for ScriptedConnector {
    async fn connect(&self) -> StoreResult<Box<dyn StoreConnection>> {
        let mut state = self.state.lock().unwrap();
        state.connect_attempts += 1;
        if state.fail_connects > 0 {
            state.fail_connects -= 1;
            return Err(StoreError::Disconnected("connection refused".to_string()));
        }
        Ok(Box::new(ScriptedConnection {
            state: Arc::clone(&self.state),
            closed: false,
        }))
    }

    fn describe(&self) -> String {
        "scripted store".to_string()
    }
}

struct ScriptedConnection {
    state: SharedStore,
    closed: bool,
}

impl ScriptedConnection {
    fn record(&mut self, call: StoreCall) -> StoreResult<Rows> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(call);
        let response = state.responses.pop_front().unwrap_or_else(|| Ok(Rows::new()));
        if matches!(response, Err(StoreError::Disconnected(_))) {
            self.closed = true;
        }
        response
    }
}

#[async_trait]
impl StoreConnection for ScriptedConnection {
    async fn fetch(&mut self, sql: &str, params: &[SqlParam], mode: FetchMode) -> StoreResult<Rows> {
        self.record(StoreCall {
            kind: CallKind::Fetch(mode),
            sql: sql.to_string(),
            params: params.to_vec(),
            batch_rows: 0,
        })
    }

    async fn execute(&mut self, sql: &str, params: &[SqlParam]) -> StoreResult<u64> {
        self.record(StoreCall {
            kind: CallKind::Execute,
            sql: sql.to_string(),
            params: params.to_vec(),
            batch_rows: 0,
        })
        .map(|_| 1)
    }

    async fn execute_batch(&mut self, sql: &str, rows: &[Vec<SqlParam>]) -> StoreResult<u64> {
        self.record(StoreCall {
            kind: CallKind::Batch,
            sql: sql.to_string(),
            params: Vec::new(),
            batch_rows: rows.len(),
        })
        .map(|_| rows.len() as u64)
    }

    fn is_closed(&self) -> bool {
        self.closed
    }

    async fn close(self: Box<Self>) {
        self.state.lock().unwrap().close_calls += 1;
    }
}

/// A trending-table row with the columns the assistant always reports.
pub fn video_row(video_id: &str, title: &str, comment_count: i64) -> Row {
    let mut row = Row::new();
    row.insert("video_id".to_string(), json!(video_id));
    row.insert("title".to_string(), json!(title));
    row.insert(
        "thumbnail_link".to_string(),
        json!(format!("https://i.ytimg.com/vi/{}/default.jpg", video_id)),
    );
    row.insert("comment_count".to_string(), json!(comment_count));
    row
}

pub fn exists_row(exists: bool) -> Rows {
    let mut row = Row::new();
    row.insert("table_exists".to_string(), json!(exists));
    vec![row]
}
