use std::num::NonZeroU32;
use std::time::Duration;

use governor::clock::{Clock, DefaultClock};
use governor::state::keyed::DefaultKeyedStateStore;
use governor::{Quota, RateLimiter as Governor};

#[derive(Debug, thiserror::Error)]
#[error("rate limited, retry after {retry_after:?}")]
pub struct RateLimited {
    pub retry_after: Duration,
}

/// Per-client-IP request limiter. A thin wrapper over `governor`'s keyed
/// limiter: `check_key` is a lock-free, non-suspending call, so admission
/// never holds anything across the stream itself.
pub struct RateLimiter {
    inner: Governor<String, DefaultKeyedStateStore<String>, DefaultClock>,
    clock: DefaultClock,
}

impl RateLimiter {
    pub fn new(requests_per_minute: u32) -> Self {
        let quota = Quota::per_minute(NonZeroU32::new(requests_per_minute.max(1)).unwrap());
        RateLimiter {
            inner: Governor::keyed(quota),
            clock: DefaultClock::default(),
        }
    }

    pub fn check(&self, client_ip: &str) -> Result<(), RateLimited> {
        self.inner.check_key(&client_ip.to_string()).map_err(|not_until| RateLimited {
            retry_after: not_until.wait_time_from(self.clock.now()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn admits_within_quota() {
        let limiter = RateLimiter::new(60);
        assert!(limiter.check("1.2.3.4").is_ok());
    }

    #[test]
    fn rejects_over_quota_with_retry_after() {
        let limiter = RateLimiter::new(1);
        assert!(limiter.check("1.2.3.4").is_ok());
        let err = limiter.check("1.2.3.4").unwrap_err();
        assert!(err.retry_after > Duration::from_secs(0));
    }

    #[test]
    fn identifiers_are_independent() {
        let limiter = RateLimiter::new(1);
        assert!(limiter.check("1.2.3.4").is_ok());
        assert!(limiter.check("5.6.7.8").is_ok());
    }
}
