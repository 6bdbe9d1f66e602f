//! Registered message handlers.
//!
//! Each handler runs on the blocking thread pool, contains its own errors
//! and sends exactly one reply: database failures become
//! `{"ok":false,"error":...}` acknowledgements, never session teardowns.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tracing::{info, warn};

use crate::db::driver::{is_read_statement, DbConnection, DbDriver, DbError, SqlValue};
use crate::db::pool::ConnectionPool;
use crate::server::dispatcher::MessageDispatcher;
use crate::server::health::HealthMetrics;
use crate::server::message;
use crate::server::registry::SessionRegistry;
use crate::server::session::{Session, SessionState};

/// How long a handler waits for a pooled connection before replying with an
/// error instead of stalling its session forever.
const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(5);

/// The fixed acknowledgement of the legacy `insert` verb.
const LEGACY_INSERT_ACK: &str = "{\"type\":\"insert_ack\",\"result\":\"ok\"}\n";

/// Registers the built-in verb set on a dispatcher.
///
/// # Arguments
/// * `registry` - Used by `login` to claim nicknames.
/// * `pool` - Used by the `db.*` verbs.
/// * `enable_legacy_insert` - Whether to expose the unsafe legacy `insert`
///   verb for compatibility with old clients.
pub fn register_default_handlers<D: DbDriver>(
    dispatcher: &mut MessageDispatcher,
    registry: Arc<SessionRegistry>,
    pool: Arc<ConnectionPool<D>>,
    metrics: HealthMetrics,
    enable_legacy_insert: bool,
) {
    dispatcher.register_handler("login", {
        move |session, msg| handle_login(&registry, &session, &msg)
    });

    dispatcher.register_handler("db.query", {
        let pool = pool.clone();
        let metrics = metrics.clone();
        move |session, msg| handle_query(&pool, &metrics, &session, &msg)
    });

    dispatcher.register_handler("db.insert", {
        let pool = pool.clone();
        let metrics = metrics.clone();
        move |session, msg| handle_insert(&pool, &metrics, &session, &msg)
    });

    dispatcher.register_handler("db.select", {
        move |session, msg| handle_select(&pool, &metrics, &session, &msg)
    });

    if enable_legacy_insert {
        dispatcher.register_handler("insert", |session, msg| {
            handle_legacy_insert(&session, &msg)
        });
    }
}

/// `login` — binds a nickname and authenticates the session.
///
/// Nickname collisions are rejected: the reply carries `ok:false` and the
/// session stays in `LoginWait`.
fn handle_login(registry: &SessionRegistry, session: &Arc<Session>, msg: &Value) {
    let verb = "login";

    let nickname = match msg.get("nickname").and_then(Value::as_str) {
        Some(n) if !n.trim().is_empty() => n.trim(),
        _ => {
            session.post_write(message::ack_err(verb, "missing nickname"));
            return;
        }
    };

    // Checked before touching the nickname index: an already-authenticated
    // session must not plant a second claim it can never own.
    let state = session.state();
    if state != SessionState::LoginWait {
        session.post_write(message::ack_err(verb, format!("not awaiting login (state: {state:?})")));
        return;
    }

    if let Err(e) = registry.bind_nickname(nickname, session.id()) {
        warn!(session_id = session.id(), nickname, "nickname collision");
        session.post_write(message::ack_err(verb, e));
        return;
    }

    match session.authenticate(nickname) {
        Ok(()) => {
            info!(session_id = session.id(), nickname, "session authenticated");
            session.post_write(message::ack_ok(verb));
        }
        Err(e) => {
            // The claim left behind points at a session that is not
            // authenticated; the registry prunes it at next lookup.
            session.post_write(message::ack_err(verb, e));
        }
    }
}

/// `db.query` — executes a caller-supplied parameterized statement.
fn handle_query<D: DbDriver>(
    pool: &ConnectionPool<D>,
    metrics: &HealthMetrics,
    session: &Arc<Session>,
    msg: &Value,
) {
    let verb = "db.query";

    let sql = match msg.get("sql").and_then(Value::as_str) {
        Some(sql) => sql,
        None => {
            session.post_write(message::ack_err(verb, "missing sql"));
            return;
        }
    };

    let params = match collect_params(msg.get("params")) {
        Ok(params) => params,
        Err(e) => {
            session.post_write(message::ack_err(verb, e));
            return;
        }
    };

    let mut conn = match pool.acquire_timeout(ACQUIRE_TIMEOUT) {
        Some(conn) => conn,
        None => {
            session.post_write(message::ack_err(verb, DbError::PoolExhausted));
            return;
        }
    };

    let reply = if is_read_statement(sql) {
        match conn.query(sql, &params) {
            Ok(rows) => {
                metrics.queries_executed.inc();
                message::ack_rows(verb, rows)
            }
            Err(e) => message::ack_err(verb, e),
        }
    } else {
        match conn.execute(sql, &params) {
            Ok(affected) => {
                metrics.queries_executed.inc();
                message::ack_affected(verb, affected)
            }
            Err(e) => message::ack_err(verb, e),
        }
    };
    drop(conn);

    session.post_write(reply);
}

/// `db.insert` — builds a parameterized `INSERT` from a column/value map.
fn handle_insert<D: DbDriver>(
    pool: &ConnectionPool<D>,
    metrics: &HealthMetrics,
    session: &Arc<Session>,
    msg: &Value,
) {
    let verb = "db.insert";

    let table = match msg.get("table").and_then(Value::as_str) {
        Some(t) if valid_identifier(t) => t,
        _ => {
            session.post_write(message::ack_err(verb, "invalid table name"));
            return;
        }
    };

    let values = match msg.get("values").and_then(Value::as_object) {
        Some(v) if !v.is_empty() => v,
        _ => {
            session.post_write(message::ack_err(verb, "missing values"));
            return;
        }
    };

    let mut columns = Vec::with_capacity(values.len());
    let mut params = Vec::with_capacity(values.len());
    for (column, value) in values {
        if !valid_identifier(column) {
            session.post_write(message::ack_err(verb, format!("invalid column name: {column}")));
            return;
        }
        match SqlValue::from_json(value) {
            Ok(p) => params.push(p),
            Err(e) => {
                session.post_write(message::ack_err(verb, e));
                return;
            }
        }
        columns.push(column.as_str());
    }

    let placeholders = vec!["?"; columns.len()].join(", ");
    let sql = format!(
        "INSERT INTO {} ({}) VALUES ({})",
        table,
        columns.join(", "),
        placeholders
    );

    let mut conn = match pool.acquire_timeout(ACQUIRE_TIMEOUT) {
        Some(conn) => conn,
        None => {
            session.post_write(message::ack_err(verb, DbError::PoolExhausted));
            return;
        }
    };

    let reply = match conn.execute(&sql, &params) {
        Ok(affected) => {
            metrics.queries_executed.inc();
            message::ack_affected(verb, affected)
        }
        Err(e) => message::ack_err(verb, e),
    };
    drop(conn);

    session.post_write(reply);
}

/// `db.select` — builds a parameterized `SELECT` with optional column list,
/// equality filters and row limit.
fn handle_select<D: DbDriver>(
    pool: &ConnectionPool<D>,
    metrics: &HealthMetrics,
    session: &Arc<Session>,
    msg: &Value,
) {
    let verb = "db.select";

    let table = match msg.get("table").and_then(Value::as_str) {
        Some(t) if valid_identifier(t) => t,
        _ => {
            session.post_write(message::ack_err(verb, "invalid table name"));
            return;
        }
    };

    let columns = match msg.get("columns").and_then(Value::as_array) {
        None => "*".to_string(),
        Some(list) if list.is_empty() => "*".to_string(),
        Some(list) => {
            let mut names = Vec::with_capacity(list.len());
            for item in list {
                match item.as_str() {
                    Some(name) if valid_identifier(name) => names.push(name),
                    _ => {
                        session.post_write(message::ack_err(verb, "invalid column list"));
                        return;
                    }
                }
            }
            names.join(", ")
        }
    };

    let mut sql = format!("SELECT {} FROM {}", columns, table);
    let mut params = Vec::new();

    if let Some(filters) = msg.get("where").and_then(Value::as_object) {
        let mut clauses = Vec::with_capacity(filters.len());
        for (column, value) in filters {
            if !valid_identifier(column) {
                session.post_write(message::ack_err(verb, format!("invalid column name: {column}")));
                return;
            }
            match SqlValue::from_json(value) {
                Ok(p) => params.push(p),
                Err(e) => {
                    session.post_write(message::ack_err(verb, e));
                    return;
                }
            }
            clauses.push(format!("{column} = ?"));
        }
        if !clauses.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&clauses.join(" AND "));
        }
    }

    if let Some(limit) = msg.get("limit").and_then(Value::as_u64) {
        sql.push_str(" LIMIT ?");
        params.push(SqlValue::Integer(limit as i64));
    }

    let mut conn = match pool.acquire_timeout(ACQUIRE_TIMEOUT) {
        Some(conn) => conn,
        None => {
            session.post_write(message::ack_err(verb, DbError::PoolExhausted));
            return;
        }
    };

    let reply = match conn.query(&sql, &params) {
        Ok(rows) => {
            metrics.queries_executed.inc();
            message::ack_rows(verb, rows)
        }
        Err(e) => message::ack_err(verb, e),
    };
    drop(conn);

    session.post_write(reply);
}

/// Legacy `insert` — reproduces the old concatenating verb.
///
/// Builds the statement by string concatenation, logs it and acknowledges
/// without executing anything, exactly like the client base it exists for.
/// Superseded by `db.insert`; only registered when explicitly enabled.
fn handle_legacy_insert(session: &Arc<Session>, msg: &Value) {
    let table = msg.get("table").and_then(Value::as_str).unwrap_or("");
    let empty = serde_json::Map::new();
    let values = msg.get("values").and_then(Value::as_object).unwrap_or(&empty);

    let columns: Vec<&str> = values.keys().map(String::as_str).collect();
    let rendered: Vec<String> = values
        .values()
        .map(|v| match v {
            Value::String(s) => format!("'{s}'"),
            other => format!("'{other}'"),
        })
        .collect();

    let sql = format!(
        "INSERT INTO {} ({}) VALUES ({});",
        table,
        columns.join(", "),
        rendered.join(", ")
    );
    info!(session_id = session.id(), sql, "legacy insert");

    session.post_write(LEGACY_INSERT_ACK);
}

/// Collects the `params` array of a `db.query` message.
fn collect_params(params: Option<&Value>) -> Result<Vec<SqlValue>, DbError> {
    match params {
        None => Ok(Vec::new()),
        Some(Value::Array(items)) => items.iter().map(SqlValue::from_json).collect(),
        Some(other) => Err(DbError::BadParameter(format!(
            "params must be an array, got {other}"
        ))),
    }
}

/// Accepts plain `[A-Za-z0-9_]+` identifiers; everything else is rejected
/// before it can reach a statement string.
fn valid_identifier(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_')
}
