//! Request pacing shared by everything that makes the browser hit a server.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::{Instant, sleep_until};
use tracing::debug;

/// Pacing collaborator consulted before navigations and clicks
#[async_trait]
pub trait RateLimit: Send + Sync {
    /// Push the next allowed request time forward by `count` intervals
    async fn register_request(&self, count: u32);
    /// Wait until a request is allowed, optionally registering `count` requests
    async fn delay_access(&self, register: bool, count: u32);
}

/// Interval-based limiter; an interval of zero disables limiting
#[derive(Clone)]
pub struct RequestLimiter {
    interval: Duration,
    next_request: Arc<Mutex<Instant>>,
}

impl RequestLimiter {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            next_request: Arc::new(Mutex::new(Instant::now())),
        }
    }

    pub fn unlimited() -> Self {
        Self::new(Duration::ZERO)
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    fn advance(&self, next: &mut Instant, count: u32) {
        *next = (*next).max(Instant::now()) + self.interval * count;
    }
}

impl Default for RequestLimiter {
    fn default() -> Self {
        Self::unlimited()
    }
}

#[async_trait]
impl RateLimit for RequestLimiter {
    async fn register_request(&self, count: u32) {
        if self.interval.is_zero() {
            return;
        }
        let mut next = self.next_request.lock().await;
        self.advance(&mut next, count);
        debug!(
            "Registered {} request(s), next allowed in {:?}",
            count,
            next.saturating_duration_since(Instant::now())
        );
    }

    async fn delay_access(&self, register: bool, count: u32) {
        if self.interval.is_zero() {
            return;
        }
        // the lock is held while sleeping so callers queue up in order
        let mut next = self.next_request.lock().await;
        if *next > Instant::now() {
            debug!(
                "Rate limiter delaying access by {:?}",
                next.saturating_duration_since(Instant::now())
            );
            sleep_until(*next).await;
        }
        if register {
            self.advance(&mut next, count);
        }
    }
}

#[cfg(test)]
#[path = "rate_limiter_test.rs"]
mod rate_limiter_test;
