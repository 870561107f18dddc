//! Relational store boundary
//!
//! The executor only talks to the store through these traits, so any
//! ANSI-SQL store with positional parameters can stand behind it. The
//! PostgreSQL implementation lives in `db::connection`.

use crate::db::query::{FetchMode, Rows, SqlParam};
use async_trait::async_trait;
use thiserror::Error;

/// Failure reported by a store connection.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The connection is gone; the executor may reconnect once.
    #[error("connection lost: {0}")]
    Disconnected(String),

    /// The statement itself failed; any open transaction was rolled back.
    #[error("{0}")]
    Statement(String),
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Opens connections to the store.
#[async_trait]
pub trait StoreConnector: Send + Sync {
    async fn connect(&self) -> StoreResult<Box<dyn StoreConnection>>;

    /// Human-readable target, without credentials, for logs.
    fn describe(&self) -> String;
}

/// A single live connection.
#[async_trait]
pub trait StoreConnection: Send {
    /// Run a row-returning statement. `mode` is `One` or `All`.
    async fn fetch(&mut self, sql: &str, params: &[SqlParam], mode: FetchMode) -> StoreResult<Rows>;

    /// Run a statement in its own transaction and commit it. Rolls back on
    /// failure. Returns the affected row count.
    async fn execute(&mut self, sql: &str, params: &[SqlParam]) -> StoreResult<u64>;

    /// Run the same statement once per parameter row inside one transaction.
    async fn execute_batch(&mut self, sql: &str, rows: &[Vec<SqlParam>]) -> StoreResult<u64>;

    fn is_closed(&self) -> bool;

    async fn close(self: Box<Self>);
}
