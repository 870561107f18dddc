//! Schema Context Provider
//!
//! The system message given to the model at the start of every turn: the
//! `youtube_trending_data` columns with their types, plus answering
//! directives. Built once and shared for the life of the process.

use crate::db::{ColumnDef, ColumnType, TableDefinition};
use lazy_static::lazy_static;

/// Bumped whenever the wording or the column list changes.
pub const SCHEMA_CONTEXT_VERSION: u32 = 1;

pub const TRENDING_TABLE: &str = "youtube_trending_data";

/// Column name and semantic type, in table order.
pub const TRENDING_COLUMNS: [(&str, ColumnType); 17] = [
    ("video_id", ColumnType::Text),
    ("title", ColumnType::Text),
    ("publishedat", ColumnType::Text),
    ("channelid", ColumnType::Text),
    ("channeltitle", ColumnType::Text),
    ("categoryid", ColumnType::Text),
    ("trending_date", ColumnType::Text),
    ("tags", ColumnType::Text),
    ("view_count", ColumnType::Integer),
    ("likes", ColumnType::Integer),
    ("dislikes", ColumnType::Integer),
    ("comment_count", ColumnType::Integer),
    ("thumbnail_link", ColumnType::Text),
    ("comments_disabled", ColumnType::Boolean),
    ("ratings_disabled", ColumnType::Boolean),
    ("description", ColumnType::Text),
    ("category_name", ColumnType::Text),
];

lazy_static! {
    static ref CONTEXT: String = build_context();
}

/// System context for every conversation.
pub fn context() -> &'static str {
    CONTEXT.as_str()
}

/// The trending table as a provisioning definition.
pub fn trending_table() -> TableDefinition {
    TableDefinition::new(
        TRENDING_TABLE,
        TRENDING_COLUMNS
            .iter()
            .map(|(name, column_type)| ColumnDef::new(*name, *column_type))
            .collect(),
    )
}

fn build_context() -> String {
    let mut context = String::from(
        "You are a helpful assistant providing insights on YouTube trending videos.\n\
         When asked for videos, decide if an SQL query is needed.\n\
         If needed, generate the appropriate SQL query and call `execute_query`.\n\
         If the answer is known or doesn't require a query, respond directly.\n\
         Always include video_id, title, and thumbnail_link when returning results.\n\
         You have access to the following database table schema:\n",
    );
    context.push_str(&format!("**Table: {}**\n", TRENDING_TABLE));
    for (name, column_type) in TRENDING_COLUMNS.iter() {
        context.push_str(&format!("- {} ({})\n", name, column_type.sql_type()));
    }
    context.push_str(&format!("(schema context v{})", SCHEMA_CONTEXT_VERSION));
    context
}
