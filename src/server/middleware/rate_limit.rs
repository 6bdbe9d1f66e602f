use governor::{
    clock::QuantaClock,
    middleware::NoOpMiddleware,
    state::keyed::DashMapStateStore,
    Quota, RateLimiter
};
use std::{
    net::IpAddr,
    num::NonZeroU32,
    sync::Arc,
    time::Duration,
};

/// A rate limiter for managing connection attempts per client IP.
#[derive(Clone)]
pub struct ConnectionRateLimiter {
    /// The underlying rate limiter instance, shared across instances.
    limiter: Arc<RateLimiter<IpAddr, DashMapStateStore<IpAddr>, QuantaClock, NoOpMiddleware>>,
}

impl ConnectionRateLimiter {
    /// Creates a new `ConnectionRateLimiter` with a specified rate limit.
    ///
    /// # Arguments
    ///
    /// * `per_second` - The maximum number of connection attempts allowed
    ///   per second from one address.
    ///
    /// # Panics
    ///
    /// This function will panic if `per_second` is zero.
    pub fn new(per_second: u32) -> Self {
        let burst_size = NonZeroU32::new(per_second)
            .expect("Rate limit must be greater than 0");

        let quota = Quota::with_period(Duration::from_secs(1))
            .unwrap()
            .allow_burst(burst_size);

        Self {
            limiter: Arc::new(RateLimiter::keyed(quota)),
        }
    }

    /// Checks whether a connection from the given address is allowed.
    ///
    /// Non-blocking: a client over its budget is rejected immediately so
    /// the accept loop never stalls on a flooding peer.
    ///
    /// # Returns
    ///
    /// Returns `true` when the attempt is within the limit.
    pub fn check(&self, addr: IpAddr) -> bool {
        self.limiter.check_key(&addr).is_ok()
    }
}
