//! Database module for the relational store
//!
//! Statement specs, the store boundary traits, the PostgreSQL connection and
//! the executor that owns it.

pub mod connection;
pub mod executor;
pub mod provision;
pub mod query;
pub mod store;

pub use connection::PgConnector;
pub use executor::QueryExecutor;
pub use provision::{ColumnDef, ColumnType, ProvisionOutcome, TableDefinition};
pub use query::{FetchMode, QuerySpec, Row, Rows, SqlParam};
pub use store::{StoreConnection, StoreConnector, StoreError, StoreResult};
