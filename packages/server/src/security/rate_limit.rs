//! Per-IP token-bucket rate limiting
//!
//! Each client IP owns a bucket of `burst` tokens refilled lazily at `rps`
//! tokens per second. Acquisition is serialized per bucket; distinct IPs
//! proceed in parallel. A background sweeper reaps buckets idle for longer
//! than the eviction window so the map stays bounded by active clients.

use std::net::IpAddr;
use std::sync::Arc;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use dashmap::DashMap;

use crate::config::RateLimitConfig;

/// Outcome of one admission check, carrying everything the response
/// headers need.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateDecision {
    pub allowed: bool,
    /// Configured burst capacity, exposed as `X-RateLimit-Limit`.
    pub limit: u64,
    /// Tokens left after this decision, exposed as `X-RateLimit-Remaining`.
    pub remaining: u64,
    /// Seconds until the bucket holds at least one token again.
    pub retry_after_secs: u64,
}

#[derive(Debug)]
struct Bucket {
    tokens: u64,
    last_refill: Instant,
    last_access: Instant,
}

/// Token-bucket limiter keyed by client IP.
#[derive(Debug)]
pub struct RateLimiter {
    buckets: DashMap<IpAddr, Arc<Mutex<Bucket>>>,
    config: RateLimitConfig,
}

impl RateLimiter {
    #[must_use]
    pub fn new(config: RateLimitConfig) -> Self {
        Self { buckets: DashMap::new(), config }
    }

    /// Takes one token for `ip`, refilling lazily first. Whitelisted IPs
    /// bypass the bucket and always report a full allowance.
    pub fn try_acquire(&self, ip: IpAddr) -> RateDecision {
        if self.config.whitelist.contains(&ip) {
            return RateDecision {
                allowed: true,
                limit: self.config.burst,
                remaining: self.config.burst,
                retry_after_secs: 0,
            };
        }

        let bucket = self
            .buckets
            .entry(ip)
            .or_insert_with(|| {
                Arc::new(Mutex::new(Bucket {
                    tokens: self.config.burst,
                    last_refill: Instant::now(),
                    last_access: Instant::now(),
                }))
            })
            .clone();

        let mut bucket = match bucket.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let now = Instant::now();
        bucket.last_access = now;

        let elapsed_ms = now.duration_since(bucket.last_refill).as_millis() as u64;
        let added = elapsed_ms * self.config.rps / 1000;
        if added > 0 {
            bucket.tokens = (bucket.tokens + added).min(self.config.burst);
            bucket.last_refill = now;
        }

        if bucket.tokens > 0 {
            bucket.tokens -= 1;
            RateDecision {
                allowed: true,
                limit: self.config.burst,
                remaining: bucket.tokens,
                retry_after_secs: 0,
            }
        } else {
            RateDecision {
                allowed: false,
                limit: self.config.burst,
                remaining: 0,
                retry_after_secs: self.retry_after(),
            }
        }
    }

    /// ceil(1 / rps) seconds, the worst-case wait for a single token.
    fn retry_after(&self) -> u64 {
        1u64.div_ceil(self.config.rps.max(1))
    }

    /// Drops buckets idle past the eviction window. Runs off the request
    /// path on a timer.
    pub fn sweep(&self) {
        let cutoff = self.config.idle_eviction;
        let now = Instant::now();
        self.buckets.retain(|_, bucket| match bucket.lock() {
            Ok(guard) => now.duration_since(guard.last_access) <= cutoff,
            Err(_) => false,
        });
    }

    /// Spawns the periodic sweeper. The handle stops with the runtime.
    pub fn start_sweeper(self: &Arc<Self>, interval: Duration) -> tokio::task::JoinHandle<()> {
        let limiter = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                limiter.sweep();
            }
        })
    }

    #[must_use]
    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn limiter(rps: u64, burst: u64) -> RateLimiter {
        RateLimiter::new(RateLimitConfig {
            rps,
            burst,
            whitelist: HashSet::new(),
            idle_eviction: Duration::from_secs(300),
        })
    }

    #[test]
    fn burst_then_denial() {
        let limiter = limiter(2, 3);
        let ip: IpAddr = "192.0.2.1".parse().unwrap();

        for i in 0..3 {
            let decision = limiter.try_acquire(ip);
            assert!(decision.allowed, "request {i} should pass");
            assert_eq!(decision.remaining, 2 - i);
        }
        let denied = limiter.try_acquire(ip);
        assert!(!denied.allowed);
        assert_eq!(denied.remaining, 0);
        assert_eq!(denied.retry_after_secs, 1);
    }

    #[test]
    fn refill_restores_tokens() {
        let limiter = limiter(1000, 2);
        let ip: IpAddr = "192.0.2.2".parse().unwrap();

        assert!(limiter.try_acquire(ip).allowed);
        assert!(limiter.try_acquire(ip).allowed);
        assert!(!limiter.try_acquire(ip).allowed);

        // 1000 rps refills within a few milliseconds.
        std::thread::sleep(Duration::from_millis(10));
        assert!(limiter.try_acquire(ip).allowed);
    }

    #[test]
    fn tokens_never_exceed_capacity() {
        let limiter = limiter(1000, 3);
        let ip: IpAddr = "192.0.2.3".parse().unwrap();
        std::thread::sleep(Duration::from_millis(50));

        let mut allowed = 0;
        for _ in 0..10 {
            if limiter.try_acquire(ip).allowed {
                allowed += 1;
            }
        }
        assert!(allowed <= 3 + 1, "at most burst plus one refilled token, got {allowed}");
    }

    #[test]
    fn whitelist_bypasses_and_reports_full_capacity() {
        let mut config = RateLimitConfig {
            rps: 1,
            burst: 1,
            whitelist: HashSet::new(),
            idle_eviction: Duration::from_secs(300),
        };
        let ip: IpAddr = "192.0.2.4".parse().unwrap();
        config.whitelist.insert(ip);
        let limiter = RateLimiter::new(config);

        for _ in 0..10 {
            let decision = limiter.try_acquire(ip);
            assert!(decision.allowed);
            assert_eq!(decision.remaining, 1);
        }
        assert_eq!(limiter.bucket_count(), 0);
    }

    #[test]
    fn distinct_ips_have_independent_buckets() {
        let limiter = limiter(1, 1);
        let a: IpAddr = "192.0.2.5".parse().unwrap();
        let b: IpAddr = "192.0.2.6".parse().unwrap();
        assert!(limiter.try_acquire(a).allowed);
        assert!(limiter.try_acquire(b).allowed);
        assert!(!limiter.try_acquire(a).allowed);
        assert!(!limiter.try_acquire(b).allowed);
    }
}
