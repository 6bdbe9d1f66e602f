use std::path::PathBuf;
use serde::Deserialize;
use config::Config;
use crate::utils::error::GatewayError;

/// Configuration settings for the gateway.
#[derive(Debug, Deserialize, Clone)]
pub struct GatewayConfig {
    /// The port on which the gateway will listen.
    pub port: u16,
    /// The shared secret every inbound frame must begin with.
    pub secret: String,
    /// Path of the SQLite database file.
    pub database_path: PathBuf,
    /// The number of database connections the pool keeps.
    pub db_pool_size: usize,
    /// Path of the source-address allow-list file.
    pub allow_list_path: PathBuf,
    /// The port serving the Prometheus `/metrics` endpoint.
    pub metrics_port: u16,
    /// The maximum size of one inbound frame, in bytes.
    pub max_frame_bytes: usize,
    /// The maximum number of connection attempts per second per address.
    pub connection_rate_limit: u32,
    /// The maximum number of sessions allowed to sit unauthenticated.
    pub max_unauth_sessions: usize,
    /// Whether the idle-session cleanup loop runs.
    pub enable_cleanup: bool,
    /// Seconds between cleanup sweeps.
    pub cleanup_interval_secs: u64,
    /// Seconds of inactivity after which a session is evicted.
    pub idle_timeout_secs: u64,
    /// Seconds between monitor reports.
    pub monitor_interval_secs: u64,
    /// Whether the unsafe legacy `insert` verb is registered.
    pub enable_legacy_insert: bool,
}

impl GatewayConfig {
    /// Loads the gateway configuration from environment variables.
    ///
    /// Environment variables should be prefixed with `GW_`; everything but
    /// the secret has a default.
    ///
    /// # Errors
    /// Returns a `GatewayError::ConfigurationError` if the configuration
    /// cannot be loaded.
    pub fn from_env() -> Result<Self, GatewayError> {
        Config::builder()
            .set_default("port", 9000_i64)
            .and_then(|b| b.set_default("secret", ""))
            .and_then(|b| b.set_default("database_path", "gateway.db"))
            .and_then(|b| b.set_default("db_pool_size", 4_i64))
            .and_then(|b| b.set_default("allow_list_path", "allowed_ips.txt"))
            .and_then(|b| b.set_default("metrics_port", 9080_i64))
            .and_then(|b| b.set_default("max_frame_bytes", 65536_i64))
            .and_then(|b| b.set_default("connection_rate_limit", 10_i64))
            .and_then(|b| b.set_default("max_unauth_sessions", 100_i64))
            .and_then(|b| b.set_default("enable_cleanup", true))
            .and_then(|b| b.set_default("cleanup_interval_secs", 60_i64))
            .and_then(|b| b.set_default("idle_timeout_secs", 300_i64))
            .and_then(|b| b.set_default("monitor_interval_secs", 10_i64))
            .and_then(|b| b.set_default("enable_legacy_insert", false))
            .map_err(|e| GatewayError::ConfigurationError(e.to_string()))?
            .add_source(config::Environment::with_prefix("GW"))
            .build()
            .map_err(|e| GatewayError::ConfigurationError(e.to_string()))?
            .try_deserialize()
            .map_err(|e| GatewayError::ConfigurationError(e.to_string()))
    }

    /// Validates the configuration settings.
    ///
    /// Ensures the shared secret is set and that the sizing knobs are
    /// non-zero.
    ///
    /// # Errors
    /// Returns a `GatewayError::ConfigurationError` if validation fails.
    pub fn validate(&self) -> Result<(), GatewayError> {
        if self.secret.is_empty() {
            return Err(GatewayError::ConfigurationError(
                "GW_SECRET must be set".into(),
            ));
        }

        if self.port == 0 {
            return Err(GatewayError::ConfigurationError(
                "port must be greater than 0".into(),
            ));
        }

        if self.metrics_port == self.port {
            return Err(GatewayError::ConfigurationError(
                "metrics_port must differ from port".into(),
            ));
        }

        if self.db_pool_size == 0 {
            return Err(GatewayError::ConfigurationError(
                "db_pool_size must be greater than 0".into(),
            ));
        }

        if self.connection_rate_limit == 0 {
            return Err(GatewayError::ConfigurationError(
                "connection_rate_limit must be greater than 0".into(),
            ));
        }

        if self.max_frame_bytes <= self.secret.len() + 2 {
            return Err(GatewayError::ConfigurationError(
                "max_frame_bytes too small to carry a frame".into(),
            ));
        }

        Ok(())
    }
}
