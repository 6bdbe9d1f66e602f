// src/server/mod.rs
pub mod coordinator;
pub mod dispatcher;
pub mod handlers;
pub mod health;
pub mod listener;
pub mod message;
pub mod middleware;
pub mod registry;
pub mod session;

// Re-export public components
pub use coordinator::ConnectionCoordinator;
pub use dispatcher::{DispatchOutcome, HandlerFn, MessageDispatcher};
pub use handlers::register_default_handlers;
pub use health::HealthMetrics;
pub use middleware::{AllowedIps, ConnectionRateLimiter};
pub use registry::SessionRegistry;
pub use session::{Session, SessionState};

// Import internal dependencies
use std::sync::Arc;
use crate::config::GatewayConfig;

/// Dependency bundle constructed once at startup and passed by reference
/// into the accept loop and the metrics endpoint.
pub struct ServerState {
    pub config: Arc<GatewayConfig>,
    pub coordinator: Arc<ConnectionCoordinator>,
    pub metrics: HealthMetrics,
    pub rate_limiter: ConnectionRateLimiter,
    pub allow_list: AllowedIps,
}
