//! Relational store port.
//!
//! Defines the synchronous row-store interface the chunk filesystem is
//! written against, enabling pluggable backends. Values and rows are
//! backend-neutral so callers never touch a driver type.

use thiserror::Error;

/// Errors produced by a row-store backend.
#[derive(Debug, Error)]
pub enum DbError {
    /// SQLite driver error.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Any other backend failure.
    #[error("row store error: {0}")]
    Backend(String),

    /// A row column had an unexpected type or was out of range.
    #[error("column {index}: expected {expected}")]
    ColumnType {
        /// Zero-based column index.
        index: usize,
        /// The type the caller asked for.
        expected: &'static str,
    },
}

/// Result type for row-store operations.
pub type DbResult<T> = std::result::Result<T, DbError>;

/// A single SQL parameter or column value.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    /// SQL NULL.
    Null,
    /// 64-bit integer.
    Integer(i64),
    /// UTF-8 text.
    Text(String),
    /// Raw bytes.
    Blob(Vec<u8>),
}

impl From<i64> for SqlValue {
    fn from(v: i64) -> Self {
        Self::Integer(v)
    }
}

impl From<&str> for SqlValue {
    fn from(v: &str) -> Self {
        Self::Text(v.to_string())
    }
}

impl From<String> for SqlValue {
    fn from(v: String) -> Self {
        Self::Text(v)
    }
}

impl From<Vec<u8>> for SqlValue {
    fn from(v: Vec<u8>) -> Self {
        Self::Blob(v)
    }
}

/// One result row, positionally indexed.
#[derive(Debug, Clone)]
pub struct SqlRow(Vec<SqlValue>);

impl SqlRow {
    /// Wraps a list of column values.
    pub fn new(values: Vec<SqlValue>) -> Self {
        Self(values)
    }

    /// Raw access to a column.
    pub fn get(&self, index: usize) -> Option<&SqlValue> {
        self.0.get(index)
    }

    /// Reads a column as an integer.
    pub fn as_i64(&self, index: usize) -> DbResult<i64> {
        match self.get(index) {
            Some(SqlValue::Integer(v)) => Ok(*v),
            _ => Err(DbError::ColumnType {
                index,
                expected: "integer",
            }),
        }
    }

    /// Reads a column as text.
    pub fn as_text(&self, index: usize) -> DbResult<&str> {
        match self.get(index) {
            Some(SqlValue::Text(v)) => Ok(v),
            _ => Err(DbError::ColumnType {
                index,
                expected: "text",
            }),
        }
    }

    /// Reads a column as a blob; NULL reads as an empty slice.
    pub fn as_blob(&self, index: usize) -> DbResult<&[u8]> {
        match self.get(index) {
            Some(SqlValue::Blob(v)) => Ok(v),
            Some(SqlValue::Null) => Ok(&[]),
            _ => Err(DbError::ColumnType {
                index,
                expected: "blob",
            }),
        }
    }

    /// True if the column is NULL.
    pub fn is_null(&self, index: usize) -> bool {
        matches!(self.get(index), Some(SqlValue::Null))
    }
}

/// Synchronous row-store primitives.
///
/// Absence is structural: `query_one` returns `None` and result sets come
/// back empty. Backends must never encode "no rows" as an error.
pub trait RowStore: Send + Sync {
    /// Runs a statement, returning the number of affected rows.
    fn execute(&self, sql: &str, params: &[SqlValue]) -> DbResult<usize>;

    /// Runs a query and collects every row.
    fn query_all(&self, sql: &str, params: &[SqlValue]) -> DbResult<Vec<SqlRow>>;

    /// Runs a query expected to yield at most one row.
    fn query_one(&self, sql: &str, params: &[SqlValue]) -> DbResult<Option<SqlRow>>;

    /// Streams rows to a visitor without materializing the full result.
    fn query_each(
        &self,
        sql: &str,
        params: &[SqlValue],
        visit: &mut dyn FnMut(&SqlRow) -> DbResult<()>,
    ) -> DbResult<()>;

    /// Releases backend resources. Further calls may fail.
    fn close(&self) -> DbResult<()> {
        Ok(())
    }
}

impl<T: RowStore + ?Sized> RowStore for std::sync::Arc<T> {
    fn execute(&self, sql: &str, params: &[SqlValue]) -> DbResult<usize> {
        (**self).execute(sql, params)
    }

    fn query_all(&self, sql: &str, params: &[SqlValue]) -> DbResult<Vec<SqlRow>> {
        (**self).query_all(sql, params)
    }

    fn query_one(&self, sql: &str, params: &[SqlValue]) -> DbResult<Option<SqlRow>> {
        (**self).query_one(sql, params)
    }

    fn query_each(
        &self,
        sql: &str,
        params: &[SqlValue],
        visit: &mut dyn FnMut(&SqlRow) -> DbResult<()>,
    ) -> DbResult<()> {
        (**self).query_each(sql, params, visit)
    }

    fn close(&self) -> DbResult<()> {
        (**self).close()
    }
}
