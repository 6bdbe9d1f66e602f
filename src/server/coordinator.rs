use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::time::interval;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::GatewayConfig;
use crate::server::dispatcher::{DispatchOutcome, MessageDispatcher};
use crate::server::health::HealthMetrics;
use crate::server::registry::SessionRegistry;
use crate::server::session::{Session, SessionState};
use crate::utils::memory;

/// Owns the dispatcher and the session registry and runs the background
/// sweeps: periodic monitoring, idle-session cleanup and the
/// unauthenticated-session pressure relief.
pub struct ConnectionCoordinator {
    dispatcher: MessageDispatcher,
    registry: Arc<SessionRegistry>,
    metrics: HealthMetrics,
    monitor_interval: Duration,
    cleanup_interval: Duration,
    idle_timeout: Duration,
    max_unauth_sessions: usize,
    shutdown: CancellationToken,
}

impl ConnectionCoordinator {
    pub fn new(
        dispatcher: MessageDispatcher,
        registry: Arc<SessionRegistry>,
        metrics: HealthMetrics,
        config: &GatewayConfig,
    ) -> Self {
        Self {
            dispatcher,
            registry,
            metrics,
            monitor_interval: Duration::from_secs(config.monitor_interval_secs),
            cleanup_interval: Duration::from_secs(config.cleanup_interval_secs),
            idle_timeout: Duration::from_secs(config.idle_timeout_secs),
            max_unauth_sessions: config.max_unauth_sessions,
            shutdown: CancellationToken::new(),
        }
    }

    /// Forwards one decoded frame to the dispatcher.
    pub async fn dispatch(&self, session: Arc<Session>, frame: &[u8]) -> DispatchOutcome {
        let outcome = self.dispatcher.dispatch(session, frame).await;
        // Handlers send exactly one reply, as does the unknown-type path;
        // a transport-trust close sends nothing.
        if outcome != DispatchOutcome::SessionClosed {
            self.metrics.messages_sent.inc();
        }
        outcome
    }

    pub fn add_session(&self, session: Arc<Session>) {
        self.registry.add(session);
    }

    /// Removes a session from the registry.
    ///
    /// Benign when the session was already removed by a concurrent sweep.
    pub fn remove_session(&self, id: u64) -> Option<Arc<Session>> {
        let removed = self.registry.remove(id);
        if removed.is_none() {
            debug!(session_id = id, "remove_session: already removed");
        }
        removed
    }

    pub fn find_session_by_nickname(&self, nickname: &str) -> Option<Arc<Session>> {
        self.registry.find_by_nickname(nickname)
    }

    pub fn for_each_session(&self, f: impl FnMut(&Arc<Session>)) {
        self.registry.for_each(f);
    }

    pub fn session_count(&self) -> usize {
        self.registry.count()
    }

    /// Starts the periodic status report.
    ///
    /// Every interval it logs the live session count and a resident-memory
    /// snapshot and refreshes the session gauge, until shutdown.
    pub fn spawn_monitor_loop(self: &Arc<Self>) {
        let coordinator = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = interval(coordinator.monitor_interval);
            loop {
                tokio::select! {
                    _ = coordinator.shutdown.cancelled() => {
                        info!("monitor loop stopped");
                        break;
                    }
                    _ = ticker.tick() => {
                        let count = coordinator.registry.count();
                        coordinator.metrics.sessions.set(count as i64);
                        match memory::resident_bytes() {
                            Some(rss) => info!(sessions = count, rss_bytes = rss, "gateway status"),
                            None => info!(sessions = count, "gateway status"),
                        }
                    }
                }
            }
        });
    }

    /// Starts the periodic eviction of idle sessions.
    pub fn spawn_cleanup_loop(self: &Arc<Self>) {
        let coordinator = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = interval(coordinator.cleanup_interval);
            loop {
                tokio::select! {
                    _ = coordinator.shutdown.cancelled() => {
                        info!("cleanup loop stopped");
                        break;
                    }
                    _ = ticker.tick() => {
                        let evicted = coordinator.evict_idle_sessions(coordinator.idle_timeout);
                        if evicted > 0 {
                            info!(evicted, "idle session sweep done");
                        }
                    }
                }
            }
        });
    }

    /// Closes and removes sessions whose last activity is older than
    /// `idle_for`. Returns the number of evicted sessions.
    pub fn evict_idle_sessions(&self, idle_for: Duration) -> usize {
        let now = Instant::now();
        let mut stale = Vec::new();
        self.registry.for_each(|session| {
            if !session.is_closed() && now.duration_since(session.last_alive()) > idle_for {
                stale.push(session.clone());
            }
        });

        let evicted = stale.len();
        for session in stale {
            info!(session_id = session.id(), "evicting idle session");
            session.close_session();
            // The session task also removes on close; this tolerates either
            // side winning the race.
            self.registry.remove(session.id());
            self.metrics.sessions_evicted.inc();
        }
        evicted
    }

    /// Closes the oldest unauthenticated sessions over the configured limit.
    ///
    /// Sessions still in `Handshaking` or `LoginWait` are ranked by their
    /// activity timestamp; the most recently active `max_unauth_sessions`
    /// survive. Returns the number of sessions closed.
    pub fn enforce_unauth_limit(&self) -> usize {
        let mut unauth = Vec::new();
        self.registry.for_each(|session| {
            if matches!(
                session.state(),
                SessionState::Handshaking | SessionState::LoginWait
            ) {
                unauth.push(session.clone());
            }
        });

        if unauth.len() <= self.max_unauth_sessions {
            return 0;
        }

        unauth.sort_by_key(|session| session.last_alive());
        let excess = unauth.len() - self.max_unauth_sessions;
        for session in unauth.iter().take(excess) {
            warn!(
                session_id = session.id(),
                "closing unauthenticated session over limit"
            );
            session.close_session();
            self.metrics.sessions_evicted.inc();
        }
        excess
    }

    /// Stops the background loops.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }
}
