use prometheus::{Encoder, IntCounter, IntGauge, Registry, TextEncoder};
use axum::{Router, routing::get, extract::State, response::IntoResponse};
use std::sync::Arc;

use crate::server::ServerState;

/// Struct for managing gateway health metrics, including live sessions and
/// message counts.
#[derive(Clone)]
pub struct HealthMetrics {
    /// Tracks the number of live sessions.
    pub sessions: IntGauge,
    /// Counts the total number of frames received by the gateway.
    pub messages_received: IntCounter,
    /// Counts the total number of replies sent by the gateway.
    pub messages_sent: IntCounter,
    /// Counts the database statements executed successfully.
    pub queries_executed: IntCounter,
    /// Counts the sessions closed by the cleanup and pressure-relief sweeps.
    pub sessions_evicted: IntCounter,
    /// Prometheus registry used to store and manage the metrics.
    registry: Registry,
}

impl HealthMetrics {
    /// Creates a new instance of `HealthMetrics` and registers the metrics
    /// with Prometheus.
    pub fn new() -> Self {
        let registry = Registry::new();
        let sessions = IntGauge::new("sessions", "Live sessions").unwrap();
        let messages_received =
            IntCounter::new("messages_received", "Total frames received").unwrap();
        let messages_sent = IntCounter::new("messages_sent", "Total replies sent").unwrap();
        let queries_executed =
            IntCounter::new("queries_executed", "Database statements executed").unwrap();
        let sessions_evicted =
            IntCounter::new("sessions_evicted", "Sessions evicted by sweeps").unwrap();

        registry.register(Box::new(sessions.clone())).unwrap();
        registry.register(Box::new(messages_received.clone())).unwrap();
        registry.register(Box::new(messages_sent.clone())).unwrap();
        registry.register(Box::new(queries_executed.clone())).unwrap();
        registry.register(Box::new(sessions_evicted.clone())).unwrap();

        Self {
            sessions,
            messages_received,
            messages_sent,
            queries_executed,
            sessions_evicted,
            registry,
        }
    }

    /// Exposes the current state of all registered metrics in
    /// Prometheus-compatible format.
    pub fn expose_metrics(&self) -> String {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = vec![];
        encoder.encode(&metric_families, &mut buffer).unwrap();
        String::from_utf8(buffer).unwrap()
    }
}

impl Default for HealthMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Starts an HTTP server exposing the metrics on the configured port.
///
/// This function creates an Axum router that serves the `/metrics`
/// endpoint, which provides Prometheus-compatible metrics data.
pub async fn serve_metrics_http(state: Arc<ServerState>) {
    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], state.config.metrics_port));
    let app = Router::new()
        .route("/metrics", get(metrics_handler))
        .with_state(state);

    if let Err(e) = axum::Server::bind(&addr).serve(app.into_make_service()).await {
        tracing::error!(error = %e, "metrics endpoint failed");
    }
}

/// Handles the `/metrics` HTTP request and returns the current metrics data.
async fn metrics_handler(State(state): State<Arc<ServerState>>) -> impl IntoResponse {
    state.metrics.expose_metrics()
}
