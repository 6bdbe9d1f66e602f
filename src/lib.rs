//! DB Gateway - a TCP gateway in front of a relational database
//!
//! This library provides the core functionality for authenticating client
//! connections with a shared-secret framed protocol, routing JSON messages
//! to registered handlers and executing the resulting statements against a
//! bounded pool of database connections.

pub mod config;
pub mod db;
pub mod server;
pub mod utils;

// Re-export main components
pub use crate::config::GatewayConfig;
pub use crate::utils::error::GatewayError;
