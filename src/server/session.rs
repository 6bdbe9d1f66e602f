use std::net::SocketAddr;
use std::sync::Mutex;
use std::time::Instant;

use thiserror::Error;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, instrument};

/// Authentication state of a session.
///
/// States only move forward: `Handshaking → LoginWait → Authenticated`,
/// with `Closed` reachable from anywhere and terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Immediately after accept, before the read loop is armed.
    Handshaking,
    /// Waiting for a login message that binds a nickname.
    LoginWait,
    /// A nickname has been bound.
    Authenticated,
    /// Terminal; the session must never be dispatched to again.
    Closed,
}

/// Represents errors that may occur in session operations.
#[derive(Error, Debug)]
pub enum SessionError {
    /// The session has already been closed.
    #[error("Session is closed")]
    Closed,

    /// A login was attempted outside of the `LoginWait` state.
    #[error("Not awaiting login (state: {0:?})")]
    NotAwaitingLogin(SessionState),
}

/// Represents one accepted client connection and its protocol state.
///
/// The socket's write half is owned by a dedicated writer task fed through
/// an unbounded channel, so replies can be enqueued from any context —
/// including background sweeps closing other sessions — and are delivered
/// FIFO per session.
pub struct Session {
    /// Process-unique identifier, assigned monotonically by the listener.
    id: u64,
    /// Socket address of the client.
    addr: SocketAddr,
    /// Current authentication state.
    state: Mutex<SessionState>,
    /// Nickname bound on login; set at most once.
    nickname: Mutex<Option<String>>,
    /// Timestamp of the last successfully processed inbound message.
    last_alive: Mutex<Instant>,
    /// Channel sender feeding the writer task.
    sender: mpsc::UnboundedSender<String>,
    /// Cancelled exactly once, when the session closes.
    cancel: CancellationToken,
}

impl Session {
    /// Creates a new session and spawns its writer task.
    ///
    /// # Arguments
    ///
    /// * `id` - The session id assigned by the listener.
    /// * `addr` - The socket address of the client.
    /// * `writer` - The write half of the client socket.
    #[instrument(skip(writer))]
    pub fn new<W>(id: u64, addr: SocketAddr, writer: W) -> Self
    where
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (sender, mut receiver) = mpsc::unbounded_channel::<String>();
        let cancel = CancellationToken::new();

        tokio::spawn({
            let cancel = cancel.clone();
            async move {
                let mut writer = writer;
                loop {
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        line = receiver.recv() => match line {
                            Some(line) => {
                                if let Err(e) = writer.write_all(line.as_bytes()).await {
                                    error!(session_id = id, error = %e, "failed to write reply");
                                    break;
                                }
                            }
                            None => break,
                        },
                    }
                }
                let _ = writer.shutdown().await;
            }
        });

        Session {
            id,
            addr,
            state: Mutex::new(SessionState::Handshaking),
            nickname: Mutex::new(None),
            last_alive: Mutex::new(Instant::now()),
            sender,
            cancel,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.addr
    }

    /// Current state of the session.
    pub fn state(&self) -> SessionState {
        *self.state.lock().unwrap()
    }

    pub fn is_closed(&self) -> bool {
        self.state() == SessionState::Closed
    }

    /// Whether a nickname has been bound to this session.
    pub fn is_nickname_registered(&self) -> bool {
        self.nickname.lock().unwrap().is_some()
    }

    /// The nickname bound on login, if any.
    pub fn nickname(&self) -> Option<String> {
        self.nickname.lock().unwrap().clone()
    }

    /// Timestamp of the last successfully processed inbound message.
    pub fn last_alive(&self) -> Instant {
        *self.last_alive.lock().unwrap()
    }

    /// Refreshes the activity timestamp.
    ///
    /// Called once per inbound message that passes secret and JSON
    /// validation.
    pub fn touch(&self) {
        *self.last_alive.lock().unwrap() = Instant::now();
    }

    /// Enqueues one reply line for asynchronous FIFO delivery.
    ///
    /// Safe to call from any context; a closed session silently drops the
    /// write.
    pub fn post_write(&self, line: impl Into<String>) {
        if self.is_closed() {
            return;
        }
        // The writer task only stops after close, so a send failure here
        // means the socket already died; nothing left to do with the reply.
        let _ = self.sender.send(line.into());
    }

    /// Closes the session.
    ///
    /// Idempotent. Transitions the state to `Closed` and cancels the
    /// session token, aborting the pending read and write. Safe to call
    /// concurrently with an in-flight dispatch for this session.
    pub fn close_session(&self) {
        {
            let mut state = self.state.lock().unwrap();
            if *state == SessionState::Closed {
                return;
            }
            *state = SessionState::Closed;
        }
        self.cancel.cancel();
        debug!(session_id = self.id, "session closed");
    }

    /// Marks the session as awaiting login.
    ///
    /// Called by the read loop when it arms its first read; a session that
    /// closed in the meantime stays closed.
    pub fn begin_login_wait(&self) {
        let mut state = self.state.lock().unwrap();
        if *state == SessionState::Handshaking {
            *state = SessionState::LoginWait;
        }
    }

    /// Binds a nickname and moves the session to `Authenticated`.
    ///
    /// # Errors
    /// Returns `SessionError::Closed` on a closed session and
    /// `SessionError::NotAwaitingLogin` when called outside `LoginWait`
    /// (including a second login attempt).
    pub fn authenticate(&self, nickname: &str) -> Result<(), SessionError> {
        let mut state = self.state.lock().unwrap();
        match *state {
            SessionState::Closed => Err(SessionError::Closed),
            SessionState::LoginWait => {
                *state = SessionState::Authenticated;
                *self.nickname.lock().unwrap() = Some(nickname.to_string());
                Ok(())
            }
            other => Err(SessionError::NotAwaitingLogin(other)),
        }
    }

    /// A token that fires when the session closes; used by the read loop
    /// to abandon a pending read.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }
}
