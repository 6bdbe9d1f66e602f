//! # DB Gateway
//!
//! This binary runs a TCP gateway that authenticates clients with a shared
//! secret, routes framed JSON messages to registered handlers and executes
//! database operations against a bounded connection pool.
//!
//! ## Features
//! - Source-address allow-list checked at accept time
//! - Per-address connection rate limiting
//! - Periodic session monitoring and idle-session cleanup
//! - Graceful shutdown handling
//! - Environment-based configuration loading
//! - Health monitoring via HTTP metrics endpoint

use std::sync::Arc;

use tokio::{net::TcpListener, signal};
use tracing::info;

use db_gateway::config::GatewayConfig;
use db_gateway::db::{pool::ConnectionPool, sqlite::SqliteDriver};
use db_gateway::server::{
    self, handlers, listener, AllowedIps, ConnectionCoordinator, ConnectionRateLimiter,
    HealthMetrics, MessageDispatcher, ServerState, SessionRegistry,
};

/// Entry point for the gateway.
///
/// Initializes logging, loads configuration from the environment, opens the
/// connection pool and starts the TCP listener.
///
/// # Errors
/// Returns an error if configuration validation fails, the allow-list is
/// unreadable or the server fails to bind to a port.
#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    let _ = dotenv::dotenv();
    tracing_subscriber::fmt::init();

    let config = GatewayConfig::from_env()?;
    config.validate()?;
    let config = Arc::new(config);

    let allow_list = AllowedIps::load(&config.allow_list_path)?;

    // Opening connections is blocking driver work; keep it off the runtime
    // I/O threads.
    let pool = {
        let driver = SqliteDriver::new(&config.database_path);
        let capacity = config.db_pool_size;
        Arc::new(
            tokio::task::spawn_blocking(move || ConnectionPool::initialize(driver, capacity))
                .await?,
        )
    };

    let metrics = HealthMetrics::new();
    let registry = Arc::new(SessionRegistry::new());

    let mut dispatcher = MessageDispatcher::new(&config.secret);
    handlers::register_default_handlers(
        &mut dispatcher,
        registry.clone(),
        pool.clone(),
        metrics.clone(),
        config.enable_legacy_insert,
    );

    let coordinator = Arc::new(ConnectionCoordinator::new(
        dispatcher,
        registry,
        metrics.clone(),
        &config,
    ));
    coordinator.spawn_monitor_loop();
    if config.enable_cleanup {
        coordinator.spawn_cleanup_loop();
    }

    let state = Arc::new(ServerState {
        config: config.clone(),
        coordinator: coordinator.clone(),
        metrics,
        rate_limiter: ConnectionRateLimiter::new(config.connection_rate_limit),
        allow_list,
    });

    // Start listening on the configured port
    let tcp = TcpListener::bind(format!("0.0.0.0:{}", config.port)).await?;
    info!("Gateway listening on port {}", config.port);

    tokio::spawn(server::health::serve_metrics_http(state.clone()));

    // Handle incoming connections or shutdown signals
    tokio::select! {
        _ = listener::run(tcp, state.clone()) => {},
        _ = shutdown_signal() => {
            info!("Shutting down gracefully");
            coordinator.shutdown();
            state.coordinator.for_each_session(|session| session.close_session());
        }
    }

    Ok(())
}

/// Listens for a shutdown signal (Ctrl+C) and initiates a graceful shutdown.
///
/// This function blocks until the signal is received, allowing the server
/// to perform cleanup before exiting.
async fn shutdown_signal() {
    signal::ctrl_c().await.expect("Failed to listen for shutdown signal");
}
