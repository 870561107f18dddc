//! Statement specification passed to the query executor
//!
//! A `QuerySpec` carries SQL text, optional positional parameters and an
//! optional fetch mode. When the fetch mode is absent it is inferred from the
//! statement text: `SELECT` statements fetch every row, everything else is
//! executed and committed.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

/// One result row; column order is preserved.
pub type Row = serde_json::Map<String, serde_json::Value>;

pub type Rows = Vec<Row>;

/// Whether a statement returns rows or is committed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FetchMode {
    /// Execute, commit, return nothing.
    None,
    /// Return the first row, if any.
    One,
    /// Return every row.
    All,
}

impl FetchMode {
    /// Infer the fetch mode from the leading keyword of the statement.
    pub fn infer(text: &str) -> Self {
        let trimmed = text.trim_start();
        let is_select = trimmed
            .get(..6)
            .map(|head| head.eq_ignore_ascii_case("select"))
            .unwrap_or(false);
        if is_select {
            FetchMode::All
        } else {
            FetchMode::None
        }
    }

    pub fn returns_rows(self) -> bool {
        !matches!(self, FetchMode::None)
    }
}

/// A positional statement parameter. Values are always bound, never
/// spliced into SQL text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SqlParam {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Timestamp(NaiveDateTime),
    Text(String),
}

impl From<&str> for SqlParam {
    fn from(value: &str) -> Self {
        SqlParam::Text(value.to_string())
    }
}

impl From<String> for SqlParam {
    fn from(value: String) -> Self {
        SqlParam::Text(value)
    }
}

impl From<i64> for SqlParam {
    fn from(value: i64) -> Self {
        SqlParam::Int(value)
    }
}

impl From<f64> for SqlParam {
    fn from(value: f64) -> Self {
        SqlParam::Float(value)
    }
}

impl From<bool> for SqlParam {
    fn from(value: bool) -> Self {
        SqlParam::Bool(value)
    }
}

impl<T: Into<SqlParam>> From<Option<T>> for SqlParam {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(SqlParam::Null)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct QuerySpec {
    pub text: String,
    pub params: Option<Vec<SqlParam>>,
    pub fetch: Option<FetchMode>,
}

impl QuerySpec {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            params: None,
            fetch: None,
        }
    }

    pub fn with_params(mut self, params: Vec<SqlParam>) -> Self {
        self.params = Some(params);
        self
    }

    pub fn with_fetch(mut self, fetch: FetchMode) -> Self {
        self.fetch = Some(fetch);
        self
    }

    /// Explicit fetch mode, or the one inferred from the text.
    pub fn effective_fetch(&self) -> FetchMode {
        self.fetch.unwrap_or_else(|| FetchMode::infer(&self.text))
    }

    pub fn params(&self) -> &[SqlParam] {
        self.params.as_deref().unwrap_or(&[])
    }
}

/// Highest `$n` placeholder index in `text`, ignoring quoted literals,
/// quoted identifiers, dollar-quoted bodies and comments.
pub fn placeholder_count(text: &str) -> usize {
    let bytes = text.as_bytes();
    let mut max_index = 0usize;
    let mut i = 0;

    while i < bytes.len() {
        match bytes[i] {
            quote @ (b'\'' | b'"') => {
                i += 1;
                while i < bytes.len() {
                    if bytes[i] == quote {
                        // doubled quote is an escaped quote
                        if bytes.get(i + 1) == Some(&quote) {
                            i += 2;
                            continue;
                        }
                        break;
                    }
                    i += 1;
                }
                i += 1;
            }
            b'-' if bytes.get(i + 1) == Some(&b'-') => {
                while i < bytes.len() && bytes[i] != b'\n' {
                    i += 1;
                }
            }
            b'/' if bytes.get(i + 1) == Some(&b'*') => {
                i += 2;
                while i + 1 < bytes.len() && !(bytes[i] == b'*' && bytes[i + 1] == b'/') {
                    i += 1;
                }
                i += 2;
            }
            // `a$1` is an identifier, not a placeholder
            b'$' if i > 0 && (bytes[i - 1].is_ascii_alphanumeric() || bytes[i - 1] == b'_') => {
                i += 1;
            }
            b'$' => {
                if let Some(tag_len) = dollar_quote_tag(&bytes[i..]) {
                    let tag = &bytes[i..i + tag_len];
                    let body = i + tag_len;
                    i = bytes[body..]
                        .windows(tag_len)
                        .position(|window| window == tag)
                        .map(|offset| body + offset + tag_len)
                        .unwrap_or(bytes.len());
                    continue;
                }
                let start = i + 1;
                let mut end = start;
                while end < bytes.len() && bytes[end].is_ascii_digit() {
                    end += 1;
                }
                if end > start {
                    if let Ok(index) = text[start..end].parse::<usize>() {
                        max_index = max_index.max(index);
                    }
                }
                i = end.max(i + 1);
            }
            _ => i += 1,
        }
    }

    max_index
}

/// Length of the opening `$tag$` (or `$$`) delimiter at the start of `bytes`.
fn dollar_quote_tag(bytes: &[u8]) -> Option<usize> {
    let mut end = 1;
    while end < bytes.len()
        && (bytes[end].is_ascii_alphabetic()
            || bytes[end] == b'_'
            || (end > 1 && bytes[end].is_ascii_digit()))
    {
        end += 1;
    }
    (bytes.get(end) == Some(&b'$')).then_some(end + 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_select_infers_fetch_all() {
        for text in [
            "SELECT 1",
            "select * from youtube_trending_data",
            "   \n\tSeLeCt title FROM youtube_trending_data  ",
        ] {
            assert_eq!(FetchMode::infer(text), FetchMode::All, "{text}");
        }
    }

    #[test]
    fn test_non_select_infers_fetch_none() {
        for text in [
            "INSERT INTO t VALUES (1)",
            "update t set x = 1",
            "  delete from t",
            "CREATE TABLE t (a BIGINT)",
            "with x as (select 1) select * from x",
            "",
            "sel",
        ] {
            assert_eq!(FetchMode::infer(text), FetchMode::None, "{text}");
        }
    }

    #[test]
    fn test_explicit_fetch_wins_over_inference() {
        let spec = QuerySpec::new("SELECT 1").with_fetch(FetchMode::One);
        assert_eq!(spec.effective_fetch(), FetchMode::One);
        assert_eq!(QuerySpec::new("SELECT 1").effective_fetch(), FetchMode::All);
    }

    #[test]
    fn test_placeholder_count_skips_literals_and_comments() {
        assert_eq!(placeholder_count("SELECT 1"), 0);
        assert_eq!(
            placeholder_count("SELECT * FROM t WHERE a = $1 AND b = $2"),
            2
        );
        assert_eq!(placeholder_count("SELECT '$9' , $1"), 1);
        assert_eq!(placeholder_count("SELECT 'it''s $4', $2 -- $7\n"), 2);
        assert_eq!(placeholder_count("SELECT /* $5 */ $3"), 3);
    }

    #[test]
    fn test_placeholder_count_skips_dollar_quotes_and_identifiers() {
        assert_eq!(placeholder_count("SELECT $$ costs $9 $$, $1"), 1);
        assert_eq!(placeholder_count("SELECT $body$ $8 $$ $7 $body$ || $2"), 2);
        assert_eq!(placeholder_count("SELECT a$1 FROM t WHERE b = $1"), 1);
        assert_eq!(placeholder_count("SELECT col_$3, x FROM t"), 0);
        assert_eq!(placeholder_count("SELECT $$ unterminated $4"), 0);
    }

    #[test]
    fn test_optional_param_maps_to_null() {
        let missing: Option<i64> = None;
        assert_eq!(SqlParam::from(missing), SqlParam::Null);
        assert_eq!(SqlParam::from(Some("a")), SqlParam::Text("a".to_string()));
    }
}
