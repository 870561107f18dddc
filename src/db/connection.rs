//! PostgreSQL store connection using sqlx
//!
//! One `PgConnection` per `PgStoreConnection`; the executor owns it and
//! decides when to reconnect. Values are always bound through sqlx.

use crate::config::DatabaseSettings;
use crate::db::query::{FetchMode, Row, Rows, SqlParam};
use crate::db::store::{StoreConnection, StoreConnector, StoreError, StoreResult};
use crate::error::{AssistantError, Result};
use async_trait::async_trait;
use rust_decimal::prelude::ToPrimitive;
use serde_json::Value;
use sqlx::postgres::{PgArguments, PgConnectOptions, PgConnection, PgRow};
use sqlx::query::Query;
use sqlx::{Column, Connection, Postgres, Row as _, TypeInfo, ValueRef};
use tracing::{debug, warn};

pub struct PgConnector {
    options: PgConnectOptions,
    target: String,
}

impl PgConnector {
    pub fn from_settings(settings: &DatabaseSettings) -> Result<Self> {
        let options = match settings {
            DatabaseSettings::Url(url) => url
                .parse::<PgConnectOptions>()
                .map_err(|e| AssistantError::Config(format!("Invalid DATABASE_URL: {}", e)))?,
            DatabaseSettings::Parts {
                user,
                password,
                host,
                port,
                dbname,
            } => PgConnectOptions::new()
                .host(host)
                .port(*port)
                .username(user)
                .password(password)
                .database(dbname),
        };
        Ok(Self {
            target: settings.redacted(),
            options,
        })
    }
}

#[async_trait]
impl StoreConnector for PgConnector {
    async fn connect(&self) -> StoreResult<Box<dyn StoreConnection>> {
        let conn = PgConnection::connect_with(&self.options)
            .await
            .map_err(|e| StoreError::Disconnected(e.to_string()))?;
        Ok(Box::new(PgStoreConnection { conn, broken: false }))
    }

    fn describe(&self) -> String {
        self.target.clone()
    }
}

pub struct PgStoreConnection {
    conn: PgConnection,
    broken: bool,
}

#[async_trait]
impl StoreConnection for PgStoreConnection {
    async fn fetch(&mut self, sql: &str, params: &[SqlParam], mode: FetchMode) -> StoreResult<Rows> {
        debug!("fetch ({:?}): {}", mode, sql);
        let query = bind_params(sqlx::query(sql), params);
        let result: std::result::Result<Rows, sqlx::Error> = match mode {
            FetchMode::One => query
                .fetch_optional(&mut self.conn)
                .await
                .map(|row| row.iter().map(row_to_json).collect()),
            _ => query
                .fetch_all(&mut self.conn)
                .await
                .map(|rows| rows.iter().map(row_to_json).collect()),
        };
        track(&mut self.broken, result)
    }

    async fn execute(&mut self, sql: &str, params: &[SqlParam]) -> StoreResult<u64> {
        debug!("execute: {}", sql);
        let mut tx = track(&mut self.broken, self.conn.begin().await)?;
        let result = bind_params(sqlx::query(sql), params).execute(&mut *tx).await;
        match result {
            Ok(done) => {
                track(&mut self.broken, tx.commit().await)?;
                Ok(done.rows_affected())
            }
            Err(e) => {
                if let Err(rollback) = tx.rollback().await {
                    warn!("Rollback failed: {}", rollback);
                }
                track(&mut self.broken, Err(e))
            }
        }
    }

    async fn execute_batch(&mut self, sql: &str, rows: &[Vec<SqlParam>]) -> StoreResult<u64> {
        debug!("execute batch of {}: {}", rows.len(), sql);
        let mut tx = track(&mut self.broken, self.conn.begin().await)?;
        let mut affected = 0u64;
        for params in rows {
            match bind_params(sqlx::query(sql), params).execute(&mut *tx).await {
                Ok(done) => affected += done.rows_affected(),
                Err(e) => {
                    if let Err(rollback) = tx.rollback().await {
                        warn!("Rollback failed: {}", rollback);
                    }
                    return track(&mut self.broken, Err(e));
                }
            }
        }
        track(&mut self.broken, tx.commit().await)?;
        Ok(affected)
    }

    fn is_closed(&self) -> bool {
        self.broken
    }

    async fn close(self: Box<Self>) {
        if let Err(e) = self.conn.close().await {
            warn!("Error while closing connection: {}", e);
        }
    }
}

/// Classify a sqlx result and remember when the connection went away.
fn track<T>(broken: &mut bool, result: std::result::Result<T, sqlx::Error>) -> StoreResult<T> {
    result.map_err(|e| {
        let err = classify(e);
        if matches!(err, StoreError::Disconnected(_)) {
            *broken = true;
        }
        err
    })
}

fn bind_params<'q>(
    mut query: Query<'q, Postgres, PgArguments>,
    params: &'q [SqlParam],
) -> Query<'q, Postgres, PgArguments> {
    for param in params {
        query = match param {
            SqlParam::Null => query.bind(Option::<String>::None),
            SqlParam::Bool(v) => query.bind(*v),
            SqlParam::Int(v) => query.bind(*v),
            SqlParam::Float(v) => query.bind(*v),
            SqlParam::Timestamp(v) => query.bind(*v),
            SqlParam::Text(v) => query.bind(v.as_str()),
        };
    }
    query
}

/// Map a sqlx error onto the store boundary. Transport failures and
/// SQLSTATE class 08 / 57P0x mean the connection can't be reused.
fn classify(err: sqlx::Error) -> StoreError {
    let lost = match &err {
        sqlx::Error::Io(_)
        | sqlx::Error::Tls(_)
        | sqlx::Error::Protocol(_)
        | sqlx::Error::PoolClosed
        | sqlx::Error::PoolTimedOut
        | sqlx::Error::WorkerCrashed => true,
        sqlx::Error::Database(db) => db
            .code()
            .map(|code| code.starts_with("08") || code.starts_with("57P0"))
            .unwrap_or(false),
        _ => false,
    };
    if lost {
        StoreError::Disconnected(err.to_string())
    } else {
        StoreError::Statement(err.to_string())
    }
}

fn row_to_json(row: &PgRow) -> Row {
    let mut out = Row::new();
    for column in row.columns() {
        let value = decode_column(row, column.ordinal(), column.type_info().name());
        out.insert(column.name().to_string(), value);
    }
    out
}

fn decode_column(row: &PgRow, idx: usize, type_name: &str) -> Value {
    match row.try_get_raw(idx) {
        Ok(raw) if !raw.is_null() => {}
        _ => return Value::Null,
    }

    let decoded: std::result::Result<Value, sqlx::Error> = match type_name {
        "BOOL" => row.try_get::<bool, _>(idx).map(Value::from),
        "INT2" => row.try_get::<i16, _>(idx).map(Value::from),
        "INT4" => row.try_get::<i32, _>(idx).map(Value::from),
        "INT8" => row.try_get::<i64, _>(idx).map(Value::from),
        "FLOAT4" => row.try_get::<f32, _>(idx).map(|v| Value::from(f64::from(v))),
        "FLOAT8" => row.try_get::<f64, _>(idx).map(Value::from),
        // SUM/AVG over BIGINT columns come back as NUMERIC
        "NUMERIC" => row.try_get::<rust_decimal::Decimal, _>(idx).map(|v| {
            v.to_f64()
                .map(Value::from)
                .unwrap_or_else(|| Value::from(v.to_string()))
        }),
        "TIMESTAMP" => row
            .try_get::<chrono::NaiveDateTime, _>(idx)
            .map(|v| Value::from(v.format("%Y-%m-%dT%H:%M:%S").to_string())),
        "TIMESTAMPTZ" => row
            .try_get::<chrono::DateTime<chrono::Utc>, _>(idx)
            .map(|v| Value::from(v.to_rfc3339())),
        "DATE" => row
            .try_get::<chrono::NaiveDate, _>(idx)
            .map(|v| Value::from(v.to_string())),
        "JSON" | "JSONB" => row.try_get::<Value, _>(idx),
        "UUID" => row
            .try_get::<uuid::Uuid, _>(idx)
            .map(|v| Value::from(v.to_string())),
        _ => row.try_get::<String, _>(idx).map(Value::from),
    };

    decoded.unwrap_or_else(|e| {
        debug!("Column {} ({}) not decodable: {}", idx, type_name, e);
        Value::Null
    })
}
