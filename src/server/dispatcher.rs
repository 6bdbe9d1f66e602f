use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use tracing::{error, warn};

use crate::server::message::{self, UNKNOWN_TYPE_REPLY};
use crate::server::session::Session;

/// A registered message handler.
///
/// Handlers run on the blocking thread pool, so they may perform a blocking
/// pool acquire and synchronous database work. Each handler contains its own
/// errors and sends exactly one reply through the session.
pub type HandlerFn = Arc<dyn Fn(Arc<Session>, Value) + Send + Sync>;

/// What a dispatch did with a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// The frame was routed to a registered handler.
    Handled,
    /// No handler for the `type`; the fixed error reply was sent.
    UnknownType,
    /// The frame violated transport trust and the session was closed.
    SessionClosed,
}

/// Validates, parses and routes inbound frames by their `type` field.
///
/// Per-message pipeline: byte-exact secret prefix check, JSON parse of the
/// remainder, handler lookup by `type`. A secret or parse failure closes
/// the session; an unknown `type` only earns an error reply.
pub struct MessageDispatcher {
    handlers: HashMap<String, HandlerFn>,
    secret: Vec<u8>,
}

impl MessageDispatcher {
    pub fn new(secret: &str) -> Self {
        Self {
            handlers: HashMap::new(),
            secret: secret.as_bytes().to_vec(),
        }
    }

    /// Registers a handler for a message `type`.
    ///
    /// One-time setup; later registrations for the same verb replace the
    /// earlier one.
    pub fn register_handler(
        &mut self,
        verb: &str,
        handler: impl Fn(Arc<Session>, Value) + Send + Sync + 'static,
    ) {
        self.handlers.insert(verb.to_string(), Arc::new(handler));
    }

    /// Whether a handler is registered for `verb`.
    pub fn has_handler(&self, verb: &str) -> bool {
        self.handlers.contains_key(verb)
    }

    /// Dispatches one decoded frame for a session.
    ///
    /// The handler itself runs via `spawn_blocking` and is awaited here, so
    /// messages from a single session dispatch strictly in arrival order
    /// while the I/O threads stay unblocked.
    pub async fn dispatch(&self, session: Arc<Session>, frame: &[u8]) -> DispatchOutcome {
        // A session closed by a background sweep must not be dispatched to.
        if session.is_closed() {
            return DispatchOutcome::SessionClosed;
        }

        let payload = match message::split_frame(frame, &self.secret) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(session_id = session.id(), error = %e, "closing session: bad secret");
                session.close_session();
                return DispatchOutcome::SessionClosed;
            }
        };

        let msg = match message::parse_payload(payload) {
            Ok(msg) => msg,
            Err(e) => {
                warn!(session_id = session.id(), error = %e, "closing session: unparsable payload");
                session.close_session();
                return DispatchOutcome::SessionClosed;
            }
        };

        session.touch();

        let verb = msg.get("type").and_then(Value::as_str).unwrap_or("");
        let handler = match self.handlers.get(verb) {
            Some(handler) => handler.clone(),
            None => {
                session.post_write(UNKNOWN_TYPE_REPLY);
                return DispatchOutcome::UnknownType;
            }
        };

        let session_id = session.id();
        let result = tokio::task::spawn_blocking(move || handler(session, msg)).await;
        if let Err(e) = result {
            // A panicking handler is contained here; the session read loop
            // keeps running.
            error!(session_id, error = %e, "handler task failed");
        }
        DispatchOutcome::Handled
    }
}
