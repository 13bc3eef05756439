use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use governor::{
    clock::{Clock, DefaultClock},
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter as GovernorRateLimiter,
};
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::error::ExchangeError;

/// Longest server-requested pause we honour. Larger `Retry-After` values
/// are clamped to it.
pub const MAX_RETRY_AFTER: Duration = Duration::from_secs(3600);

type Limiter = GovernorRateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Per-minute request weight budget shared by every clone.
///
/// Requests are charged by weight. When the budget is spent, `acquire` waits
/// for capacity if that takes no longer than `max_wait`, otherwise it fails
/// with `RateLimited` without anything being sent.
#[derive(Clone)]
pub struct RateLimiter {
    limiter: Arc<Limiter>,
    clock: DefaultClock,
    limit: NonZeroU32,
    blocked_until: Arc<Mutex<Option<Instant>>>,
    max_wait: Duration,
}

impl RateLimiter {
    pub fn new(limit_per_minute: u32, max_wait: Duration) -> Self {
        let limit = NonZeroU32::new(limit_per_minute).unwrap_or(NonZeroU32::MIN);
        Self {
            limiter: Arc::new(GovernorRateLimiter::direct(Quota::per_minute(limit))),
            clock: DefaultClock::default(),
            limit,
            blocked_until: Arc::new(Mutex::new(None)),
            max_wait,
        }
    }

    pub async fn acquire(&self, cost: u32, endpoint: &str) -> Result<(), ExchangeError> {
        // Weights above the burst size could never fit; charge the whole budget.
        let cost = NonZeroU32::new(cost.min(self.limit.get())).unwrap_or(NonZeroU32::MIN);

        loop {
            let wait = match self.blocked_for().await {
                Some(wait) => wait,
                None => match self.limiter.check_n(cost) {
                    Ok(Ok(())) => return Ok(()),
                    Ok(Err(not_until)) => not_until.wait_time_from(self.clock.now()),
                    // Unreachable with the cost capped at the burst size.
                    Err(_) => MAX_RETRY_AFTER,
                },
            };

            if wait > self.max_wait {
                warn!(endpoint, retry_after_ms = wait.as_millis() as u64, "request budget exhausted");
                crate::metrics::record_rate_limited(endpoint);
                return Err(ExchangeError::RateLimited { retry_after: wait });
            }

            debug!(endpoint, wait_ms = wait.as_millis() as u64, "waiting for request budget");
            tokio::time::sleep(wait).await;
        }
    }

    /// The exchange answered 429/418: send nothing until `retry_after` has passed.
    pub async fn block_for(&self, retry_after: Duration) {
        let Some(until) = Instant::now().checked_add(retry_after.min(MAX_RETRY_AFTER)) else {
            return;
        };
        let mut blocked = self.blocked_until.lock().await;
        if (*blocked).is_none_or(|current| current < until) {
            *blocked = Some(until);
        }
    }

    /// Remaining server-imposed pause, if any.
    async fn blocked_for(&self) -> Option<Duration> {
        let mut blocked = self.blocked_until.lock().await;
        let now = Instant::now();
        match *blocked {
            Some(until) if until > now => Some(until - now),
            _ => {
                *blocked = None;
                None
            }
        }
    }
}
