//! Tabular input and output model.
//!
//! Results arrive from the analytics service as JSON rows, so cells are
//! [`serde_json::Value`]s on both sides of the cache.

use std::collections::{BTreeMap, HashSet};

use rusqlite::types::{Value as SqlValue, ValueRef};
use serde::{Deserialize, Serialize};
use serde_json::{Number, Value};

use crate::{CacheError, CacheResult};

// ---------------------------------------------------------------------------
// ColumnType
// ---------------------------------------------------------------------------

/// Column type inferred from the non-null cells of a column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnType {
    Integer,
    Float,
    /// Stored as 0/1 in a `BOOLEAN` column; read back as JSON booleans.
    Boolean,
    Text,
}

impl ColumnType {
    /// Name recorded in the metadata ledger's `dtypes` map.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Integer => "integer",
            Self::Float => "float",
            Self::Boolean => "boolean",
            Self::Text => "text",
        }
    }

    /// Declared SQLite column type.
    #[must_use]
    pub const fn sql_type(self) -> &'static str {
        match self {
            Self::Integer => "INTEGER",
            Self::Float => "REAL",
            Self::Boolean => "BOOLEAN",
            Self::Text => "TEXT",
        }
    }

    /// Returns `true` for columns that summary statistics apply to.
    #[must_use]
    pub const fn is_numeric(self) -> bool {
        matches!(self, Self::Integer | Self::Float)
    }

    fn of(value: &Value) -> Option<Self> {
        match value {
            Value::Null => None,
            Value::Bool(_) => Some(Self::Boolean),
            Value::Number(n) if n.is_i64() => Some(Self::Integer),
            Value::Number(_) => Some(Self::Float),
            Value::String(_) | Value::Array(_) | Value::Object(_) => Some(Self::Text),
        }
    }

    fn widen(self, other: Self) -> Self {
        match (self, other) {
            (a, b) if a == b => a,
            (Self::Integer, Self::Float) | (Self::Float, Self::Integer) => Self::Float,
            _ => Self::Text,
        }
    }
}

impl std::fmt::Display for ColumnType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// ResultSet
// ---------------------------------------------------------------------------

/// A tabular result: an ordered header plus rows of JSON cells.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResultSet {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

impl ResultSet {
    pub fn new(columns: Vec<String>, rows: Vec<Vec<Value>>) -> Self {
        Self { columns, rows }
    }

    #[must_use]
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    #[must_use]
    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Checks that the result can be stored as a table.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::InvalidDataset`] for an empty header, an empty or
    /// duplicate column name (compared case-insensitively, as SQLite does), or a
    /// row whose width differs from the header.
    pub fn validate(&self) -> CacheResult<()> {
        if self.columns.is_empty() {
            return Err(CacheError::InvalidDataset("result has no columns".to_string()));
        }

        let mut seen = HashSet::with_capacity(self.columns.len());
        for column in &self.columns {
            if column.trim().is_empty() {
                return Err(CacheError::InvalidDataset("empty column name".to_string()));
            }
            if !seen.insert(column.to_lowercase()) {
                return Err(CacheError::InvalidDataset(format!(
                    "duplicate column name '{column}'"
                )));
            }
        }

        if let Some((index, row)) = self
            .rows
            .iter()
            .enumerate()
            .find(|(_, row)| row.len() != self.columns.len())
        {
            return Err(CacheError::InvalidDataset(format!(
                "row {index} has {} cells, expected {}",
                row.len(),
                self.columns.len()
            )));
        }

        Ok(())
    }

    /// Infers one [`ColumnType`] per column. All-null columns are [`ColumnType::Text`].
    #[must_use]
    pub fn column_types(&self) -> Vec<ColumnType> {
        (0..self.columns.len())
            .map(|i| {
                self.rows
                    .iter()
                    .filter_map(|row| row.get(i).and_then(ColumnType::of))
                    .reduce(ColumnType::widen)
                    .unwrap_or(ColumnType::Text)
            })
            .collect()
    }

    /// Column name to type-name map, as recorded in the metadata ledger.
    #[must_use]
    pub fn dtypes(&self) -> BTreeMap<String, String> {
        self.columns
            .iter()
            .cloned()
            .zip(self.column_types().into_iter().map(|t| t.as_str().to_string()))
            .collect()
    }

    /// Returns the first `n` rows as a new result set.
    #[must_use]
    pub fn head(&self, n: usize) -> ResultSet {
        ResultSet {
            columns: self.columns.clone(),
            rows: self.rows.iter().take(n).cloned().collect(),
        }
    }
}

// ---------------------------------------------------------------------------
// Query output
// ---------------------------------------------------------------------------

/// Shape and provenance of a guarded query's result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryMetadata {
    pub row_count: usize,
    pub column_count: usize,
    pub columns: Vec<String>,
    /// The statement actually executed, with the row cap applied.
    pub query_executed: String,
    /// The caller's statement after whitespace/semicolon normalization.
    pub original_query: String,
}

/// Rows returned by a guarded query plus their metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryOutput {
    pub rows: Vec<Vec<Value>>,
    pub metadata: QueryMetadata,
}

impl QueryOutput {
    #[must_use]
    pub fn columns(&self) -> &[String] {
        &self.metadata.columns
    }

    /// Views the output as a [`ResultSet`].
    #[must_use]
    pub fn to_result_set(&self) -> ResultSet {
        ResultSet::new(self.metadata.columns.clone(), self.rows.clone())
    }
}

// ---------------------------------------------------------------------------
// SQLite value conversion
// ---------------------------------------------------------------------------

/// Converts a JSON cell into a value SQLite can bind.
pub(crate) fn to_sql_value(value: &Value) -> SqlValue {
    match value {
        Value::Null => SqlValue::Null,
        Value::Bool(b) => SqlValue::Integer(i64::from(*b)),
        Value::Number(n) => match n.as_i64() {
            Some(i) => SqlValue::Integer(i),
            None => n.as_f64().map_or(SqlValue::Null, SqlValue::Real),
        },
        Value::String(s) => SqlValue::Text(s.clone()),
        Value::Array(_) | Value::Object(_) => SqlValue::Text(value.to_string()),
    }
}

/// Converts a SQLite cell back into JSON.
pub(crate) fn from_sql_ref(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::Number(i.into()),
        ValueRef::Real(f) => Number::from_f64(f).map_or(Value::Null, Value::Number),
        ValueRef::Text(bytes) => Value::String(String::from_utf8_lossy(bytes).into_owned()),
        ValueRef::Blob(bytes) => Value::String(format!("<blob {} bytes>", bytes.len())),
    }
}

/// [`from_sql_ref`] that restores booleans for columns declared `BOOLEAN`.
pub(crate) fn from_sql_ref_declared(value: ValueRef<'_>, declared: Option<&str>) -> Value {
    match (value, declared) {
        (ValueRef::Integer(i), Some(decl))
            if decl.eq_ignore_ascii_case(ColumnType::Boolean.sql_type()) =>
        {
            Value::Bool(i != 0)
        }
        (value, _) => from_sql_ref(value),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
