//! Shared helpers for the integration tests: a fake database driver and a
//! harness that stands up an in-process gateway on an ephemeral port.
#![allow(dead_code)]

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};

use db_gateway::config::GatewayConfig;
use db_gateway::db::driver::{DbConnection, DbDriver, DbError, Row, SqlValue};
use db_gateway::db::pool::ConnectionPool;
use db_gateway::server::{
    handlers, listener, AllowedIps, ConnectionCoordinator, ConnectionRateLimiter, HealthMetrics,
    MessageDispatcher, ServerState, Session, SessionRegistry,
};

pub const TEST_SECRET: &str = "s3cr3t";

/// A driver whose connections answer canned results and record usage.
#[derive(Clone)]
pub struct FakeDriver {
    state: Arc<FakeDriverState>,
}

pub struct FakeDriverState {
    connects: AtomicUsize,
    fail_remaining: AtomicUsize,
    statements: AtomicUsize,
    shared_use: AtomicBool,
}

impl FakeDriver {
    pub fn new() -> Self {
        Self::failing_first(0)
    }

    /// A driver whose first `n` connection attempts fail.
    pub fn failing_first(n: usize) -> Self {
        Self {
            state: Arc::new(FakeDriverState {
                connects: AtomicUsize::new(0),
                fail_remaining: AtomicUsize::new(n),
                statements: AtomicUsize::new(0),
                shared_use: AtomicBool::new(false),
            }),
        }
    }

    /// Total connection attempts, successful or not.
    pub fn connects(&self) -> usize {
        self.state.connects.load(Ordering::SeqCst)
    }

    /// Statements executed across all connections.
    pub fn statements(&self) -> usize {
        self.state.statements.load(Ordering::SeqCst)
    }

    /// Whether any connection was ever used by two callers at once.
    pub fn saw_shared_use(&self) -> bool {
        self.state.shared_use.load(Ordering::SeqCst)
    }
}

impl DbDriver for FakeDriver {
    type Conn = FakeConnection;

    fn connect(&self) -> Result<Self::Conn, DbError> {
        self.state.connects.fetch_add(1, Ordering::SeqCst);
        let remaining = self.state.fail_remaining.load(Ordering::SeqCst);
        if remaining > 0 {
            self.state.fail_remaining.store(remaining - 1, Ordering::SeqCst);
            return Err(DbError::Connect("fake connect failure".into()));
        }
        Ok(FakeConnection {
            state: self.state.clone(),
            busy: AtomicBool::new(false),
        })
    }
}

pub struct FakeConnection {
    state: Arc<FakeDriverState>,
    busy: AtomicBool,
}

impl FakeConnection {
    fn enter(&self) {
        if self.busy.swap(true, Ordering::SeqCst) {
            self.state.shared_use.store(true, Ordering::SeqCst);
        }
        // Give a racing caller a chance to trip the flag.
        std::thread::sleep(Duration::from_millis(2));
    }

    fn exit(&self) {
        self.busy.store(false, Ordering::SeqCst);
        self.state.statements.fetch_add(1, Ordering::SeqCst);
    }
}

impl DbConnection for FakeConnection {
    fn execute(&mut self, _sql: &str, _params: &[SqlValue]) -> Result<u64, DbError> {
        self.enter();
        self.exit();
        Ok(1)
    }

    fn query(&mut self, _sql: &str, _params: &[SqlValue]) -> Result<Vec<Row>, DbError> {
        self.enter();
        self.exit();
        let mut row = Row::new();
        row.insert("value".to_string(), json!(1));
        Ok(vec![row])
    }
}

/// A config with test-friendly sizing; the sweeps are driven manually.
pub fn test_config(secret: &str) -> GatewayConfig {
    GatewayConfig {
        port: 0,
        secret: secret.to_string(),
        database_path: PathBuf::from(":memory:"),
        db_pool_size: 4,
        allow_list_path: PathBuf::from("allowed_ips.txt"),
        metrics_port: 0,
        max_frame_bytes: 65536,
        connection_rate_limit: 1000,
        max_unauth_sessions: 100,
        enable_cleanup: false,
        cleanup_interval_secs: 60,
        idle_timeout_secs: 300,
        monitor_interval_secs: 10,
        enable_legacy_insert: true,
    }
}

/// Stands up a full gateway on an ephemeral local port.
///
/// Returns the bound address and the server state (for poking at the
/// coordinator from tests).
pub async fn start_server<D: DbDriver>(
    driver: D,
    allow_list: AllowedIps,
    config: GatewayConfig,
) -> (SocketAddr, Arc<ServerState>) {
    let config = Arc::new(config);
    let pool = Arc::new(ConnectionPool::initialize(driver, config.db_pool_size));

    let metrics = HealthMetrics::new();
    let registry = Arc::new(SessionRegistry::new());

    let mut dispatcher = MessageDispatcher::new(&config.secret);
    handlers::register_default_handlers(
        &mut dispatcher,
        registry.clone(),
        pool,
        metrics.clone(),
        config.enable_legacy_insert,
    );

    let coordinator = Arc::new(ConnectionCoordinator::new(
        dispatcher,
        registry,
        metrics.clone(),
        &config,
    ));

    let state = Arc::new(ServerState {
        config: config.clone(),
        coordinator,
        metrics,
        rate_limiter: ConnectionRateLimiter::new(config.connection_rate_limit),
        allow_list,
    });

    let tcp = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = tcp.local_addr().unwrap();
    tokio::spawn(listener::run(tcp, state.clone()));

    (addr, state)
}

/// An allow-list that admits local test clients.
pub fn allow_localhost() -> AllowedIps {
    AllowedIps::from_ips(["127.0.0.1".parse().unwrap()])
}

/// A raw TCP client speaking the gateway's framed protocol.
pub struct TestClient {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

impl TestClient {
    pub async fn connect(addr: SocketAddr) -> Self {
        let stream = TcpStream::connect(addr).await.unwrap();
        let (read_half, write_half) = stream.into_split();
        Self {
            reader: BufReader::new(read_half),
            writer: write_half,
        }
    }

    /// Sends raw bytes as-is.
    pub async fn send_raw(&mut self, bytes: &[u8]) {
        self.writer.write_all(bytes).await.unwrap();
    }

    /// Sends one well-formed frame: `secret || json || '\n'`.
    pub async fn send(&mut self, secret: &str, body: &Value) {
        let mut frame = secret.as_bytes().to_vec();
        frame.extend_from_slice(body.to_string().as_bytes());
        frame.push(b'\n');
        self.send_raw(&frame).await;
    }

    /// Reads one reply line; `None` on EOF.
    pub async fn recv_line(&mut self) -> Option<String> {
        let mut line = String::new();
        let n = tokio::time::timeout(Duration::from_secs(5), self.reader.read_line(&mut line))
            .await
            .expect("timed out waiting for reply")
            .unwrap();
        if n == 0 {
            None
        } else {
            Some(line)
        }
    }

    /// Reads one reply line and parses it as JSON.
    pub async fn recv_json(&mut self) -> Value {
        let line = self.recv_line().await.expect("connection closed");
        serde_json::from_str(line.trim()).expect("reply is not valid JSON")
    }
}

/// A session wired to an in-memory stream instead of a socket.
///
/// Returns the session and the far end of its write path, for reading the
/// replies it posts.
pub fn duplex_session(id: u64) -> (Arc<Session>, BufReader<DuplexStream>) {
    let (near, far) = tokio::io::duplex(64 * 1024);
    let session = Arc::new(Session::new(id, "127.0.0.1:0".parse().unwrap(), near));
    (session, BufReader::new(far))
}

/// Reads one reply line from a duplex session's far end.
pub async fn read_reply(reader: &mut BufReader<DuplexStream>) -> String {
    let mut line = String::new();
    tokio::time::timeout(Duration::from_secs(5), reader.read_line(&mut line))
        .await
        .expect("timed out waiting for reply")
        .unwrap();
    line
}

/// Builds one wire frame for dispatch-level tests.
pub fn frame(secret: &str, body: &Value) -> Vec<u8> {
    let mut out = secret.as_bytes().to_vec();
    out.extend_from_slice(body.to_string().as_bytes());
    out
}
