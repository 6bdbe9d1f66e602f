pub mod driver;
pub mod pool;
pub mod sqlite;

// Re-export main components for cleaner imports
pub use driver::{DbConnection, DbDriver, DbError, Row, SqlValue};
pub use pool::{ConnectionPool, PooledConnection};
pub use sqlite::SqliteDriver;
