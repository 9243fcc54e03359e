//! SQLite backend for the row-store port.

use crate::sql::{DbError, DbResult, RowStore, SqlRow, SqlValue};
use parking_lot::Mutex;
use rusqlite::Connection;
use std::path::Path;

/// A [`RowStore`] backed by a single SQLite connection.
///
/// The connection sits behind a mutex so the store is `Sync`; callers are
/// serialized per repository by the host anyway, so contention is nil.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Opens (or creates) a database file.
    pub fn open(path: impl AsRef<Path>) -> DbResult<Self> {
        let conn = Connection::open(path)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Opens a fresh in-memory database.
    pub fn open_in_memory() -> DbResult<Self> {
        let conn = Connection::open_in_memory()?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

fn to_sql(value: &SqlValue) -> rusqlite::types::Value {
    use rusqlite::types::Value;
    match value {
        SqlValue::Null => Value::Null,
        SqlValue::Integer(v) => Value::Integer(*v),
        SqlValue::Text(v) => Value::Text(v.clone()),
        SqlValue::Blob(v) => Value::Blob(v.clone()),
    }
}

fn from_sql(value: rusqlite::types::Value) -> DbResult<SqlValue> {
    use rusqlite::types::Value;
    match value {
        Value::Null => Ok(SqlValue::Null),
        Value::Integer(v) => Ok(SqlValue::Integer(v)),
        // The value vocabulary has no float; a REAL here means the schema
        // or a query drifted, not something to cast through.
        Value::Real(v) => Err(DbError::Backend(format!(
            "unexpected REAL column value {}",
            v
        ))),
        Value::Text(v) => Ok(SqlValue::Text(v)),
        Value::Blob(v) => Ok(SqlValue::Blob(v)),
    }
}

fn read_row(row: &rusqlite::Row<'_>) -> DbResult<SqlRow> {
    let count = row.as_ref().column_count();
    let mut values = Vec::with_capacity(count);
    for i in 0..count {
        values.push(from_sql(row.get::<_, rusqlite::types::Value>(i)?)?);
    }
    Ok(SqlRow::new(values))
}

impl RowStore for SqliteStore {
    fn execute(&self, sql: &str, params: &[SqlValue]) -> DbResult<usize> {
        let conn = self.conn.lock();
        let owned: Vec<rusqlite::types::Value> = params.iter().map(to_sql).collect();
        let n = conn.execute(sql, rusqlite::params_from_iter(owned))?;
        Ok(n)
    }

    fn query_all(&self, sql: &str, params: &[SqlValue]) -> DbResult<Vec<SqlRow>> {
        let conn = self.conn.lock();
        let owned: Vec<rusqlite::types::Value> = params.iter().map(to_sql).collect();
        let mut stmt = conn.prepare(sql)?;
        let mut rows = stmt.query(rusqlite::params_from_iter(owned))?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            out.push(read_row(row)?);
        }
        Ok(out)
    }

    fn query_one(&self, sql: &str, params: &[SqlValue]) -> DbResult<Option<SqlRow>> {
        let conn = self.conn.lock();
        let owned: Vec<rusqlite::types::Value> = params.iter().map(to_sql).collect();
        let mut stmt = conn.prepare(sql)?;
        let mut rows = stmt.query(rusqlite::params_from_iter(owned))?;
        match rows.next()? {
            Some(row) => Ok(Some(read_row(row)?)),
            None => Ok(None),
        }
    }

    fn query_each(
        &self,
        sql: &str,
        params: &[SqlValue],
        visit: &mut dyn FnMut(&SqlRow) -> DbResult<()>,
    ) -> DbResult<()> {
        let conn = self.conn.lock();
        let owned: Vec<rusqlite::types::Value> = params.iter().map(to_sql).collect();
        let mut stmt = conn.prepare(sql)?;
        let mut rows = stmt.query(rusqlite::params_from_iter(owned))?;
        while let Some(row) = rows.next()? {
            visit(&read_row(row)?)?;
        }
        Ok(())
    }

    fn close(&self) -> DbResult<()> {
        // rusqlite closes on drop; flush pending work here.
        let conn = self.conn.lock();
        conn.cache_flush()?;
        Ok(())
    }
}
