//! Bounded blocking connection pool.
//!
//! The pool owns up to `capacity` live connections. `acquire` hands one out
//! under scoped ownership and blocks the calling thread when none is idle;
//! dropping the returned guard releases the connection and wakes one waiter.
//! Callers are expected to run on the blocking thread pool, never on the
//! I/O-driving runtime threads.

use std::collections::VecDeque;
use std::ops::{Deref, DerefMut};
use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};

use tracing::{info, warn};

use crate::db::driver::DbDriver;

/// Pause between reconnect attempts while the pool is degraded.
const RETRY_INTERVAL: Duration = Duration::from_millis(200);

struct PoolState<C> {
    idle: VecDeque<C>,
    /// Connections currently alive, idle or checked out. Never exceeds
    /// `capacity`.
    live: usize,
}

/// A fixed-size pool of database connections.
///
/// A connection that fails to open during initialization reduces the
/// effective pool size instead of aborting startup; `acquire` later retries
/// those slots, so the pool heals up to `capacity` once the database
/// recovers.
pub struct ConnectionPool<D: DbDriver> {
    driver: D,
    capacity: usize,
    state: Mutex<PoolState<D::Conn>>,
    available: Condvar,
}

impl<D: DbDriver> ConnectionPool<D> {
    /// Eagerly opens up to `capacity` connections.
    ///
    /// # Arguments
    /// * `driver` - The connection factory.
    /// * `capacity` - The hard upper bound on live connections.
    pub fn initialize(driver: D, capacity: usize) -> Self {
        info!(capacity, "initializing database connection pool");

        let mut idle = VecDeque::with_capacity(capacity);
        let mut failed = 0usize;
        for slot in 0..capacity {
            match driver.connect() {
                Ok(conn) => idle.push_back(conn),
                Err(e) => {
                    warn!(slot, error = %e, "pool slot failed to initialize");
                    failed += 1;
                }
            }
        }
        let live = idle.len();
        info!(capacity, created = live, failed, "pool initialization done");

        Self {
            driver,
            capacity,
            state: Mutex::new(PoolState { idle, live }),
            available: Condvar::new(),
        }
    }

    /// Takes a connection out of the pool, blocking until one is available.
    ///
    /// Returns a guard that releases the connection when dropped.
    pub fn acquire(&self) -> PooledConnection<'_, D> {
        self.acquire_inner(None)
            .expect("acquire without deadline cannot time out")
    }

    /// Like [`acquire`](Self::acquire), but gives up after `timeout`.
    ///
    /// # Returns
    /// `None` when no connection became available within the timeout.
    pub fn acquire_timeout(&self, timeout: Duration) -> Option<PooledConnection<'_, D>> {
        self.acquire_inner(Some(Instant::now() + timeout))
    }

    fn acquire_inner(&self, deadline: Option<Instant>) -> Option<PooledConnection<'_, D>> {
        let mut state = self.state.lock().expect("pool mutex poisoned");
        loop {
            if let Some(conn) = state.idle.pop_front() {
                return Some(PooledConnection {
                    pool: self,
                    conn: Some(conn),
                });
            }

            // A slot that failed to open earlier leaves live below capacity;
            // try to repair it before waiting on a release.
            if state.live < self.capacity {
                state.live += 1;
                drop(state);
                match self.driver.connect() {
                    Ok(conn) => {
                        info!("opened replacement database connection");
                        return Some(PooledConnection {
                            pool: self,
                            conn: Some(conn),
                        });
                    }
                    Err(e) => {
                        warn!(error = %e, "failed to open replacement database connection");
                    }
                }
                state = self.state.lock().expect("pool mutex poisoned");
                state.live -= 1;
            }

            let wait_for = match deadline {
                Some(d) => {
                    let now = Instant::now();
                    if now >= d {
                        return None;
                    }
                    RETRY_INTERVAL.min(d - now)
                }
                None => RETRY_INTERVAL,
            };
            let (guard, _) = self
                .available
                .wait_timeout(state, wait_for)
                .expect("pool mutex poisoned");
            state = guard;
        }
    }

    fn put_back(&self, conn: D::Conn) {
        let mut state = self.state.lock().expect("pool mutex poisoned");
        state.idle.push_back(conn);
        drop(state);
        self.available.notify_one();
    }

    /// The configured upper bound on live connections.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Connections currently sitting idle in the pool.
    pub fn idle_count(&self) -> usize {
        self.state.lock().expect("pool mutex poisoned").idle.len()
    }

    /// Connections currently checked out to callers.
    pub fn checked_out_count(&self) -> usize {
        let state = self.state.lock().expect("pool mutex poisoned");
        state.live - state.idle.len()
    }

    /// Connections alive in total, idle plus checked out.
    pub fn live_count(&self) -> usize {
        self.state.lock().expect("pool mutex poisoned").live
    }
}

/// Scoped ownership of one pooled connection.
///
/// Dereferences to the driver connection; dropping it returns the connection
/// to the idle set and wakes one blocked waiter.
pub struct PooledConnection<'a, D: DbDriver> {
    pool: &'a ConnectionPool<D>,
    conn: Option<D::Conn>,
}

impl<D: DbDriver> Deref for PooledConnection<'_, D> {
    type Target = D::Conn;

    fn deref(&self) -> &Self::Target {
        self.conn.as_ref().expect("connection taken")
    }
}

impl<D: DbDriver> DerefMut for PooledConnection<'_, D> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.conn.as_mut().expect("connection taken")
    }
}

impl<D: DbDriver> Drop for PooledConnection<'_, D> {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            self.pool.put_back(conn);
        }
    }
}
