use thiserror::Error;

/// Represents various errors that can occur in the gateway.
#[derive(Error, Debug)]
pub enum GatewayError {
    /// Represents an error in the server configuration.
    ///
    /// This occurs when an invalid or inconsistent configuration is detected.
    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    /// Represents an error related to wire message handling.
    ///
    /// This error occurs when frames are malformed or fail to be processed.
    #[error("Message error: {0}")]
    MessageError(#[from] crate::server::message::MessageError),

    /// Represents a failure in the database driver or connection pool.
    #[error("Database error: {0}")]
    DatabaseError(#[from] crate::db::driver::DbError),

    /// Represents an error related to session operations.
    ///
    /// This includes invalid state transitions and use-after-close.
    #[error("Session error: {0}")]
    SessionError(#[from] crate::server::session::SessionError),

    /// Represents an error related to the session registry.
    ///
    /// This includes nickname collisions and lookups of removed sessions.
    #[error("Registry error: {0}")]
    RegistryError(#[from] crate::server::registry::RegistryError),

    /// Indicates a failure in serializing or deserializing data.
    ///
    /// This can happen when converting messages to or from JSON.
    #[error("Serialization error: {0}")]
    SerializationError(String),
}

/// Implements conversion from `serde_json::Error` to `GatewayError`.
///
/// This allows serialization errors to be automatically converted into
/// `GatewayError::SerializationError`.
impl From<serde_json::Error> for GatewayError {
    fn from(err: serde_json::Error) -> Self {
        GatewayError::SerializationError(err.to_string())
    }
}
