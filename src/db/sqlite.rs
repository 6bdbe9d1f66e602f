//! SQLite-backed implementation of the driver traits.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde_json::Value;

use crate::db::driver::{DbConnection, DbDriver, DbError, Row, SqlValue};

/// How long a connection waits on a locked database file before giving up.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Opens connections against a single SQLite database file.
///
/// Every pooled connection shares the same file, which is the SQLite
/// equivalent of the endpoint/schema pair a networked driver would take.
pub struct SqliteDriver {
    path: PathBuf,
}

impl SqliteDriver {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }
}

impl DbDriver for SqliteDriver {
    type Conn = SqliteConnection;

    fn connect(&self) -> Result<Self::Conn, DbError> {
        let conn = rusqlite::Connection::open(&self.path)
            .map_err(|e| DbError::Connect(e.to_string()))?;
        conn.busy_timeout(BUSY_TIMEOUT)
            .map_err(|e| DbError::Connect(e.to_string()))?;
        Ok(SqliteConnection { inner: conn })
    }
}

/// One live SQLite connection.
pub struct SqliteConnection {
    inner: rusqlite::Connection,
}

impl DbConnection for SqliteConnection {
    fn execute(&mut self, sql: &str, params: &[SqlValue]) -> Result<u64, DbError> {
        let mut stmt = self
            .inner
            .prepare(sql)
            .map_err(|e| DbError::Execute(e.to_string()))?;
        let affected = stmt
            .execute(rusqlite::params_from_iter(params.iter().map(bind_value)))
            .map_err(|e| DbError::Execute(e.to_string()))?;
        Ok(affected as u64)
    }

    fn query(&mut self, sql: &str, params: &[SqlValue]) -> Result<Vec<Row>, DbError> {
        let mut stmt = self
            .inner
            .prepare(sql)
            .map_err(|e| DbError::Execute(e.to_string()))?;
        let columns: Vec<String> = stmt.column_names().iter().map(|c| c.to_string()).collect();

        let mut rows = stmt
            .query(rusqlite::params_from_iter(params.iter().map(bind_value)))
            .map_err(|e| DbError::Execute(e.to_string()))?;

        let mut out = Vec::new();
        while let Some(row) = rows.next().map_err(|e| DbError::Execute(e.to_string()))? {
            let mut record = Row::new();
            for (idx, name) in columns.iter().enumerate() {
                let value: rusqlite::types::Value = row
                    .get(idx)
                    .map_err(|e| DbError::Execute(e.to_string()))?;
                record.insert(name.clone(), json_value(value));
            }
            out.push(record);
        }
        Ok(out)
    }
}

fn bind_value(value: &SqlValue) -> rusqlite::types::Value {
    match value {
        SqlValue::Null => rusqlite::types::Value::Null,
        SqlValue::Integer(i) => rusqlite::types::Value::Integer(*i),
        SqlValue::Real(f) => rusqlite::types::Value::Real(*f),
        SqlValue::Text(s) => rusqlite::types::Value::Text(s.clone()),
        SqlValue::Bool(b) => rusqlite::types::Value::Integer(*b as i64),
    }
}

fn json_value(value: rusqlite::types::Value) -> Value {
    match value {
        rusqlite::types::Value::Null => Value::Null,
        rusqlite::types::Value::Integer(i) => Value::from(i),
        rusqlite::types::Value::Real(f) => Value::from(f),
        rusqlite::types::Value::Text(s) => Value::String(s),
        // Binary columns are rare over this protocol; a lossy string keeps
        // the reply valid JSON.
        rusqlite::types::Value::Blob(b) => Value::String(String::from_utf8_lossy(&b).into_owned()),
    }
}
