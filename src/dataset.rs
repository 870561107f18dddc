//! Processed-dataset loader
//!
//! Reads a cleaned CSV export. Rows bound for the trending table are typed
//! by the fixed `schema::trending_table()` definition, so the stored table
//! always matches the schema context the model is given. For any other
//! table one semantic type per column is inferred from the values: integer,
//! then float, then boolean, then timestamp, falling back to text. Empty
//! cells load as NULL and don't take part in inference.
//! Cleaning and merging happen upstream; this only types what it is given.

use crate::db::provision::validate_identifier;
use crate::db::{ColumnDef, ColumnType, SqlParam, TableDefinition};
use crate::error::{AssistantError, Result};
use crate::schema::{trending_table, TRENDING_TABLE};
use chrono::{DateTime, NaiveDate, NaiveDateTime};
use std::io::Read;
use tracing::info;

const TIMESTAMP_FORMATS: [&str; 3] = ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S%.f"];

#[derive(Debug, Clone, PartialEq)]
pub struct LoadedDataset {
    pub table: TableDefinition,
    pub rows: Vec<Vec<SqlParam>>,
}

struct RawCsv {
    headers: Vec<String>,
    cells: Vec<Vec<String>>,
}

pub fn load_csv<R: Read>(reader: R, table_name: &str) -> Result<LoadedDataset> {
    validate_identifier(table_name).map_err(|e| AssistantError::Dataset(e.to_string()))?;
    let raw = read_csv(reader)?;

    let dataset = if table_name.eq_ignore_ascii_case(TRENDING_TABLE) {
        conform(&raw, trending_table())?
    } else {
        infer(&raw, table_name)?
    };

    info!(
        "📄 Loaded {} rows x {} columns for '{}'",
        dataset.rows.len(),
        dataset.table.columns.len(),
        dataset.table.name
    );
    Ok(dataset)
}

fn read_csv<R: Read>(reader: R) -> Result<RawCsv> {
    let mut csv_reader = csv::ReaderBuilder::new().trim(csv::Trim::All).from_reader(reader);
    let headers: Vec<String> = csv_reader
        .headers()
        .map_err(|e| AssistantError::Dataset(format!("Failed to read CSV header: {}", e)))?
        .iter()
        .map(|h| h.to_ascii_lowercase())
        .collect();

    if headers.is_empty() {
        return Err(AssistantError::Dataset("CSV has no columns".to_string()));
    }
    for header in &headers {
        validate_identifier(header).map_err(|e| AssistantError::Dataset(e.to_string()))?;
    }

    let mut cells: Vec<Vec<String>> = Vec::new();
    for (index, record) in csv_reader.records().enumerate() {
        let record = record
            .map_err(|e| AssistantError::Dataset(format!("Bad CSV record {}: {}", index + 1, e)))?;
        cells.push(record.iter().map(str::to_string).collect());
    }
    Ok(RawCsv { headers, cells })
}

/// Map the CSV onto a declared table. Header sets must match exactly; values
/// are reordered into the table's column order and must fit its types.
fn conform(raw: &RawCsv, table: TableDefinition) -> Result<LoadedDataset> {
    if let Some(extra) = raw
        .headers
        .iter()
        .find(|h| !table.columns.iter().any(|c| &c.name == *h))
    {
        return Err(AssistantError::Dataset(format!(
            "Column '{}' is not part of table '{}'",
            extra, table.name
        )));
    }

    let mut positions = Vec::with_capacity(table.columns.len());
    for column in &table.columns {
        let position = raw
            .headers
            .iter()
            .position(|h| *h == column.name)
            .ok_or_else(|| {
                AssistantError::Dataset(format!(
                    "CSV is missing column '{}' required by table '{}'",
                    column.name, table.name
                ))
            })?;
        positions.push(position);
    }

    let mut rows = Vec::with_capacity(raw.cells.len());
    for (index, record) in raw.cells.iter().enumerate() {
        let mut row = Vec::with_capacity(positions.len());
        for (column, position) in table.columns.iter().zip(&positions) {
            row.push(convert_cell(&record[*position], column, index)?);
        }
        rows.push(row);
    }

    Ok(LoadedDataset { table, rows })
}

fn infer(raw: &RawCsv, table_name: &str) -> Result<LoadedDataset> {
    let columns: Vec<ColumnDef> = raw
        .headers
        .iter()
        .enumerate()
        .map(|(i, name)| {
            let values = raw.cells.iter().map(|row| row[i].as_str());
            ColumnDef::new(name.clone(), infer_column_type(values))
        })
        .collect();

    let mut rows = Vec::with_capacity(raw.cells.len());
    for (index, record) in raw.cells.iter().enumerate() {
        let row = record
            .iter()
            .zip(&columns)
            .map(|(cell, column)| convert_cell(cell, column, index))
            .collect::<Result<Vec<SqlParam>>>()?;
        rows.push(row);
    }

    Ok(LoadedDataset {
        table: TableDefinition::new(table_name, columns),
        rows,
    })
}

fn convert_cell(cell: &str, column: &ColumnDef, row_index: usize) -> Result<SqlParam> {
    to_param(cell, column.column_type).ok_or_else(|| {
        AssistantError::Dataset(format!(
            "Record {}: '{}' is not a valid {} for column '{}'",
            row_index + 1,
            cell,
            column.column_type.sql_type(),
            column.name
        ))
    })
}

/// Narrowest type every non-empty value fits. An all-empty column is text.
pub fn infer_column_type<'a>(values: impl Iterator<Item = &'a str>) -> ColumnType {
    let values: Vec<&str> = values.filter(|v| !v.is_empty()).collect();
    if values.is_empty() {
        return ColumnType::Text;
    }

    let candidates = [
        ColumnType::Integer,
        ColumnType::Float,
        ColumnType::Boolean,
        ColumnType::Timestamp,
    ];
    candidates
        .into_iter()
        .find(|candidate| values.iter().all(|v| fits(v, *candidate)))
        .unwrap_or(ColumnType::Text)
}

fn fits(value: &str, column_type: ColumnType) -> bool {
    match column_type {
        ColumnType::Integer => parse_int(value).is_some(),
        ColumnType::Float => value.parse::<f64>().is_ok(),
        ColumnType::Boolean => parse_bool(value).is_some(),
        ColumnType::Timestamp => parse_timestamp(value).is_some(),
        ColumnType::Text => true,
    }
}

/// `None` when a non-empty cell doesn't fit `column_type`.
fn to_param(cell: &str, column_type: ColumnType) -> Option<SqlParam> {
    if cell.is_empty() {
        return Some(SqlParam::Null);
    }
    match column_type {
        ColumnType::Integer => parse_int(cell).map(SqlParam::Int),
        ColumnType::Float => cell.parse::<f64>().ok().map(SqlParam::Float),
        ColumnType::Boolean => parse_bool(cell).map(SqlParam::Bool),
        ColumnType::Timestamp => parse_timestamp(cell).map(SqlParam::Timestamp),
        ColumnType::Text => Some(SqlParam::Text(cell.to_string())),
    }
}

/// Accepts `1200` and the `1200.0` pandas writes for integer columns with gaps.
fn parse_int(value: &str) -> Option<i64> {
    value.parse::<i64>().ok().or_else(|| {
        value
            .parse::<f64>()
            .ok()
            .filter(|v| v.is_finite() && v.fract() == 0.0 && v.abs() < 9.0e15)
            .map(|v| v as i64)
    })
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.to_ascii_lowercase().as_str() {
        "true" => Some(true),
        "false" => Some(false),
        _ => None,
    }
}

/// RFC 3339 values (the trending exports use `...Z`) are normalized to UTC.
fn parse_timestamp(value: &str) -> Option<NaiveDateTime> {
    if let Ok(parsed) = DateTime::parse_from_rfc3339(value) {
        return Some(parsed.naive_utc());
    }
    TIMESTAMP_FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(value, format).ok())
        .or_else(|| {
            NaiveDate::parse_from_str(value, "%Y-%m-%d")
                .ok()
                .and_then(|date| date.and_hms_opt(0, 0, 0))
        })
}
