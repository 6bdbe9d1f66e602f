use serde_json::{json, Value};
use thiserror::Error;

/// Represents different types of errors that can occur when processing frames.
#[derive(Error, Debug)]
pub enum MessageError {
    /// Error when a frame does not begin with the configured shared secret.
    ///
    /// This covers frames shorter than the secret as well; both signal a
    /// misconfigured or malicious peer.
    #[error("Bad secret prefix")]
    BadSecret,

    /// Error when the payload after the secret is not a JSON object.
    #[error("Invalid JSON payload: {0}")]
    InvalidJson(String),
}

/// The fixed reply for a `type` with no registered handler.
///
/// An unrecognized verb is a client usage error, not a transport-trust
/// violation, so the session stays open after this is sent.
pub const UNKNOWN_TYPE_REPLY: &str = "{\"type\":\"error\",\"msg\":\"Unknown message type.\"}\n";

/// Splits one wire frame into its JSON payload.
///
/// A frame is `secret_bytes || json_body`; the secret check is a byte-exact
/// prefix comparison.
///
/// # Errors
/// Returns `MessageError::BadSecret` on any mismatch, including frames
/// shorter than the secret.
pub fn split_frame<'a>(frame: &'a [u8], secret: &[u8]) -> Result<&'a [u8], MessageError> {
    if frame.len() < secret.len() || &frame[..secret.len()] != secret {
        return Err(MessageError::BadSecret);
    }
    Ok(&frame[secret.len()..])
}

/// Parses the JSON payload of a frame.
///
/// # Errors
/// Returns `MessageError::InvalidJson` when the payload is not valid JSON.
pub fn parse_payload(payload: &[u8]) -> Result<Value, MessageError> {
    serde_json::from_slice(payload).map_err(|e| MessageError::InvalidJson(e.to_string()))
}

/// Builds a `{"type":"<verb>_ack","ok":true}` reply line.
pub fn ack_ok(verb: &str) -> String {
    reply_line(json!({ "type": format!("{verb}_ack"), "ok": true }))
}

/// Builds a `{"type":"<verb>_ack","ok":false,"error":...}` reply line.
pub fn ack_err(verb: &str, error: impl std::fmt::Display) -> String {
    reply_line(json!({
        "type": format!("{verb}_ack"),
        "ok": false,
        "error": error.to_string(),
    }))
}

/// Builds a successful reply carrying result rows.
pub fn ack_rows(verb: &str, rows: Vec<crate::db::Row>) -> String {
    reply_line(json!({ "type": format!("{verb}_ack"), "ok": true, "rows": rows }))
}

/// Builds a successful reply carrying an affected-row count.
pub fn ack_affected(verb: &str, affected: u64) -> String {
    reply_line(json!({ "type": format!("{verb}_ack"), "ok": true, "affected": affected }))
}

/// Serializes a reply as a single newline-terminated line.
fn reply_line(value: Value) -> String {
    let mut line = value.to_string();
    line.push('\n');
    line
}
