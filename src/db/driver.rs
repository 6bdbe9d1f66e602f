//! Database driver abstraction.
//!
//! The gateway treats the database as an external capability: something that
//! can open connections, prepare parameterized statements and iterate result
//! rows. The connection pool and the message handlers are written against
//! these traits, so the concrete driver (see [`crate::db::sqlite`]) can be
//! swapped for a fake in tests.

use serde_json::Value;
use thiserror::Error;

/// Represents errors raised by a database driver or the connection pool.
#[derive(Error, Debug)]
pub enum DbError {
    /// Error when opening a new database connection fails.
    #[error("Failed to connect: {0}")]
    Connect(String),

    /// Error when preparing or executing a statement fails.
    #[error("Query failed: {0}")]
    Execute(String),

    /// Error when a parameter value cannot be bound.
    ///
    /// Only scalar JSON values map onto SQL parameters; arrays and objects
    /// are rejected here rather than silently stringified.
    #[error("Unsupported parameter value: {0}")]
    BadParameter(String),

    /// Error when no pooled connection became available in time.
    #[error("No database connection available")]
    PoolExhausted,
}

/// A scalar value bound to a statement placeholder.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
    Bool(bool),
}

impl SqlValue {
    /// Converts a JSON value into a bindable parameter.
    ///
    /// # Errors
    /// Returns `DbError::BadParameter` for arrays and objects.
    pub fn from_json(value: &Value) -> Result<Self, DbError> {
        match value {
            Value::Null => Ok(SqlValue::Null),
            Value::Bool(b) => Ok(SqlValue::Bool(*b)),
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Ok(SqlValue::Integer(i))
                } else if let Some(f) = n.as_f64() {
                    Ok(SqlValue::Real(f))
                } else {
                    Err(DbError::BadParameter(n.to_string()))
                }
            }
            Value::String(s) => Ok(SqlValue::Text(s.clone())),
            other => Err(DbError::BadParameter(other.to_string())),
        }
    }
}

/// One result row, keyed by column name.
pub type Row = serde_json::Map<String, Value>;

/// A single live database connection.
///
/// A connection is owned by exactly one caller at a time; the pool enforces
/// this, so implementations take `&mut self` and need not be `Sync`.
pub trait DbConnection: Send + 'static {
    /// Executes a non-reading statement and returns the affected row count.
    fn execute(&mut self, sql: &str, params: &[SqlValue]) -> Result<u64, DbError>;

    /// Executes a reading statement and collects the result rows.
    fn query(&mut self, sql: &str, params: &[SqlValue]) -> Result<Vec<Row>, DbError>;
}

/// A factory for database connections.
pub trait DbDriver: Send + Sync + 'static {
    type Conn: DbConnection;

    /// Opens a new connection.
    ///
    /// # Errors
    /// Returns `DbError::Connect` when the database is unreachable; the pool
    /// logs the failure and degrades capacity instead of aborting startup.
    fn connect(&self) -> Result<Self::Conn, DbError>;
}

/// Classifies a statement as reading or writing.
///
/// Reading statements (`SELECT`, `SHOW`, `EXPLAIN` prefixes,
/// case-insensitive) produce a `rows` reply; everything else produces an
/// `affected` count.
pub fn is_read_statement(sql: &str) -> bool {
    let head = sql.trim_start().as_bytes();
    ["SELECT", "SHOW", "EXPLAIN"].iter().any(|kw| {
        head.len() >= kw.len() && head[..kw.len()].eq_ignore_ascii_case(kw.as_bytes())
    })
}
