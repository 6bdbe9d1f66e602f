use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::net::tcp::OwnedReadHalf;
use tokio::net::TcpListener;
use tracing::{debug, error, info, instrument, warn};

use crate::server::session::Session;
use crate::server::ServerState;

/// Accepts and handles incoming TCP connections.
///
/// This function continuously listens for new connections and spawns a new
/// task to process each one. Peers failing the allow-list or the per-address
/// rate limit are dropped before a session is created, with zero bytes
/// exchanged. The accept loop never waits on any session's lifecycle.
pub async fn run(listener: TcpListener, state: Arc<ServerState>) {
    let next_session_id = AtomicU64::new(0);
    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                if !state.allow_list.is_allowed(&addr.ip()) {
                    warn!(peer = %addr, "rejected connection from disallowed address");
                    continue;
                }
                if !state.rate_limiter.check(addr.ip()) {
                    warn!(peer = %addr, "rejected connection: rate limit exceeded");
                    continue;
                }

                let session_id = next_session_id.fetch_add(1, Ordering::SeqCst);
                let (read_half, write_half) = stream.into_split();
                let session = Arc::new(Session::new(session_id, addr, write_half));

                state.coordinator.add_session(session.clone());
                state.coordinator.enforce_unauth_limit();
                state.metrics.sessions.inc();
                info!(session_id, peer = %addr, "new client connected");

                tokio::spawn(handle_connection(read_half, session, state.clone()));
            }
            Err(e) => error!("Accept error: {}", e),
        }
    }
}

/// Drives one session's read loop.
///
/// Frames are newline-delimited; one frame is `secret || JSON || '\n'`.
/// EOF, an I/O error, an oversized frame or a transport-trust violation all
/// end the loop; the epilogue then closes the session and removes it from
/// the registry, tolerating a concurrent removal by a background sweep.
#[instrument(skip(read_half, session, state), fields(session_id = session.id()))]
async fn handle_connection(
    read_half: OwnedReadHalf,
    session: Arc<Session>,
    state: Arc<ServerState>,
) {
    session.begin_login_wait();

    let cancel = session.cancel_token();
    let mut reader = BufReader::new(read_half);
    let max_frame = state.config.max_frame_bytes as u64;
    let mut buf = Vec::new();

    loop {
        buf.clear();
        let mut limited = (&mut reader).take(max_frame);
        tokio::select! {
            _ = cancel.cancelled() => break,
            result = limited.read_until(b'\n', &mut buf) => match result {
                Ok(0) => break,
                Ok(_) => {
                    if !buf.ends_with(b"\n") {
                        warn!(
                            session_id = session.id(),
                            "closing session: oversized or unterminated frame"
                        );
                        break;
                    }
                    while matches!(buf.last(), Some(&(b'\n' | b'\r'))) {
                        buf.pop();
                    }
                    state.metrics.messages_received.inc();
                    state.coordinator.dispatch(session.clone(), &buf).await;
                    if session.is_closed() {
                        break;
                    }
                }
                Err(e) => {
                    debug!(session_id = session.id(), error = %e, "read error");
                    break;
                }
            }
        }
    }

    session.close_session();
    state.coordinator.remove_session(session.id());
    state.metrics.sessions.dec();
    info!(session_id = session.id(), "connection closed");
}
