//! Query Execution Layer
//!
//! Owns the single store connection. Every call holds the connection lock
//! for the whole check-connection, execute, commit-or-rollback region, so a
//! reconnect never interleaves with another caller's statement.
//!
//! Reconnect policy: one transparent retry per call. A connection found
//! missing or closed is reopened before the statement runs; a read that
//! loses its connection mid-flight is replayed once. Writes are never
//! replayed. A second consecutive failure is returned as
//! `AssistantError::Connection`.

use crate::db::provision::{ProvisionOutcome, TableDefinition, TABLE_EXISTS_SQL};
use crate::db::query::{placeholder_count, FetchMode, QuerySpec, Rows, SqlParam};
use crate::db::store::{StoreConnection, StoreConnector, StoreError, StoreResult};
use crate::error::{AssistantError, Result};
use tokio::sync::Mutex;
use tracing::{error, info, warn};

const MAX_RECONNECT_ATTEMPTS: u32 = 1;

pub struct QueryExecutor {
    connector: Box<dyn StoreConnector>,
    connection: Mutex<Option<Box<dyn StoreConnection>>>,
}

enum Operation<'a> {
    Statement {
        sql: &'a str,
        params: &'a [SqlParam],
        mode: FetchMode,
    },
    Batch {
        sql: &'a str,
        rows: &'a [Vec<SqlParam>],
    },
}

struct Outcome {
    rows: Rows,
    affected: u64,
}

impl Operation<'_> {
    /// Only reads are replayed after a mid-statement disconnect. A write may
    /// have committed before the connection dropped.
    fn is_replayable(&self) -> bool {
        matches!(self, Operation::Statement { mode, .. } if mode.returns_rows())
    }

    async fn run(&self, connection: &mut Box<dyn StoreConnection>) -> StoreResult<Outcome> {
        match self {
            Operation::Statement { sql, params, mode } if mode.returns_rows() => {
                let rows = connection.fetch(sql, params, *mode).await?;
                Ok(Outcome { rows, affected: 0 })
            }
            Operation::Statement { sql, params, .. } => {
                let affected = connection.execute(sql, params).await?;
                Ok(Outcome {
                    rows: Rows::new(),
                    affected,
                })
            }
            Operation::Batch { sql, rows } => {
                let affected = connection.execute_batch(sql, rows).await?;
                Ok(Outcome {
                    rows: Rows::new(),
                    affected,
                })
            }
        }
    }
}

impl QueryExecutor {
    /// The connection is opened lazily on first use.
    pub fn new(connector: Box<dyn StoreConnector>) -> Self {
        Self {
            connector,
            connection: Mutex::new(None),
        }
    }

    pub async fn is_connected(&self) -> bool {
        self.connection
            .lock()
            .await
            .as_ref()
            .map(|c| !c.is_closed())
            .unwrap_or(false)
    }

    /// Execute one statement. `SELECT` statements return rows, everything
    /// else is committed and returns an empty result.
    pub async fn execute(&self, spec: QuerySpec) -> Result<Rows> {
        validate(&spec)?;
        let operation = Operation::Statement {
            sql: &spec.text,
            params: spec.params(),
            mode: spec.effective_fetch(),
        };
        let outcome = self.run(&operation).await?;
        Ok(match spec.effective_fetch() {
            FetchMode::One => outcome.rows.into_iter().take(1).collect(),
            FetchMode::All => outcome.rows,
            FetchMode::None => Rows::new(),
        })
    }

    pub async fn table_exists(&self, table_name: &str) -> Result<bool> {
        let spec = QuerySpec::new(TABLE_EXISTS_SQL)
            .with_params(vec![SqlParam::from(table_name)])
            .with_fetch(FetchMode::One);
        let rows = self.execute(spec).await?;
        Ok(rows
            .first()
            .and_then(|row| row.get("table_exists"))
            .and_then(|value| value.as_bool())
            .unwrap_or(false))
    }

    /// Create the table unless the catalog already has it.
    pub async fn provision_table(&self, table: &TableDefinition) -> Result<ProvisionOutcome> {
        let create_sql = table.create_table_sql()?;

        if self.table_exists(&table.name).await? {
            warn!("Table '{}' already exists.", table.name);
            return Ok(ProvisionOutcome::AlreadyExists);
        }

        self.execute(QuerySpec::new(create_sql).with_fetch(FetchMode::None))
            .await?;
        info!("Table '{}' created successfully.", table.name);
        Ok(ProvisionOutcome::Created)
    }

    /// Provision the table, then insert every row in a single transaction.
    pub async fn insert_rows(&self, table: &TableDefinition, rows: &[Vec<SqlParam>]) -> Result<u64> {
        let insert_sql = table.insert_sql()?;
        if let Some((index, row)) = rows
            .iter()
            .enumerate()
            .find(|(_, row)| row.len() != table.columns.len())
        {
            return Err(AssistantError::QueryExecution(format!(
                "Row {} has {} values but table '{}' has {} columns",
                index,
                row.len(),
                table.name,
                table.columns.len()
            )));
        }

        self.provision_table(table).await?;
        if rows.is_empty() {
            return Ok(0);
        }

        let outcome = self
            .run(&Operation::Batch {
                sql: &insert_sql,
                rows,
            })
            .await?;
        info!(
            "Data inserted successfully into '{}' ({} rows)!",
            table.name, outcome.affected
        );
        Ok(outcome.affected)
    }

    /// Close the connection, if one is open.
    pub async fn shutdown(&self) {
        let connection = self.connection.lock().await.take();
        if let Some(connection) = connection {
            connection.close().await;
            info!("Connection closed.");
        }
    }

    async fn run(&self, operation: &Operation<'_>) -> Result<Outcome> {
        let mut slot = self.connection.lock().await;
        let mut failures = 0u32;

        loop {
            if slot.as_ref().map(|c| c.is_closed()).unwrap_or(true) {
                // a closed handle is dropped, not reused
                slot.take();
                match self.connector.connect().await {
                    Ok(connection) => {
                        info!("🔌 Connected to {}", self.connector.describe());
                        *slot = Some(connection);
                    }
                    Err(e) => {
                        failures += 1;
                        if failures > MAX_RECONNECT_ATTEMPTS {
                            error!("Failed to connect to {}: {}", self.connector.describe(), e);
                            return Err(AssistantError::Connection(e.to_string()));
                        }
                        warn!("Connection attempt failed ({}), retrying once", e);
                        continue;
                    }
                }
            }

            let Some(connection) = slot.as_mut() else {
                continue;
            };

            match operation.run(connection).await {
                Ok(outcome) => return Ok(outcome),
                Err(StoreError::Statement(message)) => {
                    error!("Query execution failed: {}", message);
                    return Err(AssistantError::QueryExecution(message));
                }
                Err(StoreError::Disconnected(message)) => {
                    slot.take();
                    failures += 1;
                    if !operation.is_replayable() {
                        error!("Connection lost during a write, not retrying: {}", message);
                        return Err(AssistantError::Connection(message));
                    }
                    if failures > MAX_RECONNECT_ATTEMPTS {
                        error!("Connection lost again, giving up: {}", message);
                        return Err(AssistantError::Connection(message));
                    }
                    warn!("Connection lost ({}), reconnecting once", message);
                }
            }
        }
    }
}

fn validate(spec: &QuerySpec) -> Result<()> {
    if spec.text.trim().is_empty() {
        return Err(AssistantError::QueryExecution(
            "Empty SQL statement".to_string(),
        ));
    }
    if let Some(params) = &spec.params {
        let expected = placeholder_count(&spec.text);
        if expected != params.len() {
            return Err(AssistantError::QueryExecution(format!(
                "Statement expects {} parameters but {} were supplied",
                expected,
                params.len()
            )));
        }
    }
    Ok(())
}
