//! SQL query models.
//!
//! Contains the typed result of one diagnostic statement.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// A single cell value.
///
/// Timestamps and intervals are kept exactly as the server rendered them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum ScalarValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Timestamp(String),
}

static NULL: ScalarValue = ScalarValue::Null;

impl ScalarValue {
    /// Types a text-format value by its PostgreSQL type name.
    ///
    /// Values that do not parse as their declared type are kept as text.
    pub fn from_pg_text(type_name: &str, raw: Option<String>) -> Self {
        let Some(raw) = raw else {
            return ScalarValue::Null;
        };
        match type_name {
            "BOOL" => match raw.as_str() {
                "t" | "true" => ScalarValue::Bool(true),
                "f" | "false" => ScalarValue::Bool(false),
                _ => ScalarValue::Text(raw),
            },
            "INT2" | "INT4" | "INT8" | "OID" | "XID" => raw
                .parse()
                .map(ScalarValue::Int)
                .unwrap_or(ScalarValue::Text(raw)),
            "FLOAT4" | "FLOAT8" | "NUMERIC" => raw
                .parse()
                .map(ScalarValue::Float)
                .unwrap_or(ScalarValue::Text(raw)),
            "TIMESTAMPTZ" | "TIMESTAMP" | "DATE" | "TIME" | "TIMETZ" | "INTERVAL" => {
                ScalarValue::Timestamp(raw)
            }
            _ => ScalarValue::Text(raw),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, ScalarValue::Null)
    }

    /// Numeric view of the value; numeric-looking text is accepted.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            ScalarValue::Int(v) => Some(*v as f64),
            ScalarValue::Float(v) => Some(*v),
            ScalarValue::Text(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            ScalarValue::Int(v) => Some(*v),
            ScalarValue::Float(v) if v.fract() == 0.0 => Some(*v as i64),
            ScalarValue::Text(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            ScalarValue::Bool(v) => Some(*v),
            _ => None,
        }
    }
}

impl std::fmt::Display for ScalarValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ScalarValue::Null => f.write_str("N/A"),
            ScalarValue::Bool(v) => write!(f, "{}", v),
            ScalarValue::Int(v) => write!(f, "{}", v),
            ScalarValue::Float(v) => write!(f, "{}", v),
            ScalarValue::Text(v) | ScalarValue::Timestamp(v) => f.write_str(v),
        }
    }
}

/// Column information in query result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct ColumnInfo {
    /// Column name.
    pub name: String,

    /// PostgreSQL type name as reported by the server.
    pub data_type: String,
}

impl ColumnInfo {
    pub fn new(name: impl Into<String>, data_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            data_type: data_type.into(),
        }
    }
}

/// Result of a SQL query execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct QueryResult {
    /// Column information.
    pub columns: Vec<ColumnInfo>,

    /// Row data, positionally aligned with `columns`.
    pub rows: Vec<Vec<ScalarValue>>,

    /// Number of rows returned.
    #[serde(default)]
    pub row_count: usize,

    /// Query execution time in milliseconds.
    #[serde(default)]
    pub execution_time_ms: u64,
}

impl QueryResult {
    /// Creates a new empty query result.
    pub fn empty() -> Self {
        Self {
            columns: vec![],
            rows: vec![],
            row_count: 0,
            execution_time_ms: 0,
        }
    }

    /// Creates a result from columns and rows, deriving the row count.
    pub fn new(columns: Vec<ColumnInfo>, rows: Vec<Vec<ScalarValue>>) -> Self {
        let row_count = rows.len();
        Self {
            columns,
            rows,
            row_count,
            execution_time_ms: 0,
        }
    }

    pub fn with_execution_time(mut self, execution_time_ms: u64) -> Self {
        self.execution_time_ms = execution_time_ms;
        self
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Iterates rows as name-addressable records.
    pub fn records(&self) -> impl Iterator<Item = Record<'_>> {
        self.rows.iter().map(move |values| Record {
            columns: &self.columns,
            values,
        })
    }

    /// First row, if any.
    pub fn first(&self) -> Option<Record<'_>> {
        self.records().next()
    }

    /// Keeps at most `max_rows` rows. Returns whether anything was dropped.
    pub fn truncate(&mut self, max_rows: usize) -> bool {
        let truncated = self.rows.len() > max_rows;
        self.rows.truncate(max_rows);
        self.row_count = self.rows.len();
        truncated
    }
}

/// A borrowed row with column-name lookup.
#[derive(Debug, Clone, Copy)]
pub struct Record<'a> {
    columns: &'a [ColumnInfo],
    values: &'a [ScalarValue],
}

impl<'a> Record<'a> {
    /// Value of the named column; missing columns read as NULL.
    pub fn get(&self, column: &str) -> &'a ScalarValue {
        self.columns
            .iter()
            .position(|c| c.name == column)
            .and_then(|idx| self.values.get(idx))
            .unwrap_or(&NULL)
    }

    pub fn f64(&self, column: &str) -> Option<f64> {
        self.get(column).as_f64()
    }

    pub fn values(&self) -> &'a [ScalarValue] {
        self.values
    }
}
