//! Core token-bucket admission controller.

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace};

use super::bucket::{Consume, TokenBucket};
use super::clock::{Clock, SystemClock};
use super::key::BucketKey;
use super::stats::{LimiterStats, StatsSnapshot};
use super::store::BucketStore;
use crate::error::{FloodgateError, Result};

/// Default idle time before a bucket is evicted.
const DEFAULT_KEY_TTL: Duration = Duration::from_secs(300);
/// Default tokens consumed per request.
const DEFAULT_COST: f64 = 1.0;

/// Settings for a [`RateLimiter`]. Fixed for the limiter's lifetime.
#[derive(Debug, Clone, PartialEq)]
pub struct LimiterConfig {
    /// Burst ceiling per key
    pub capacity: f64,
    /// Tokens restored per second
    pub refill_rate_per_second: f64,
    /// Idle time after which a key's bucket is evicted
    pub key_ttl: Duration,
    /// Tokens consumed by [`RateLimiter::check`]
    pub cost_per_request: f64,
}

impl LimiterConfig {
    /// Create a configuration with the default key TTL and a cost of one.
    pub fn new(capacity: f64, refill_rate_per_second: f64) -> Self {
        Self {
            capacity,
            refill_rate_per_second,
            key_ttl: DEFAULT_KEY_TTL,
            cost_per_request: DEFAULT_COST,
        }
    }

    /// Set the idle time after which a bucket is evicted.
    pub fn with_key_ttl(mut self, key_ttl: Duration) -> Self {
        self.key_ttl = key_ttl;
        self
    }

    /// Set the tokens consumed by [`RateLimiter::check`].
    pub fn with_cost_per_request(mut self, cost: f64) -> Self {
        self.cost_per_request = cost;
        self
    }

    /// Reject non-positive or non-finite settings.
    pub fn validate(&self) -> Result<()> {
        ensure_positive("capacity", self.capacity)?;
        ensure_positive("refill_rate_per_second", self.refill_rate_per_second)?;
        ensure_positive("cost_per_request", self.cost_per_request)?;
        if self.key_ttl.is_zero() {
            return Err(FloodgateError::Config(
                "key_ttl must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

fn ensure_positive(field: &str, value: f64) -> Result<()> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(FloodgateError::Config(format!(
            "{} must be a positive finite number, got {}",
            field, value
        )))
    }
}

/// Result of a single admission check.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Decision {
    /// Whether the request was admitted
    pub allowed: bool,
    /// Tokens left in the bucket after this check
    pub remaining: f64,
    /// How long until the request could succeed; zero when admitted
    pub retry_after: Duration,
    /// Bucket capacity
    pub limit: f64,
}

impl Decision {
    /// `retry_after` in whole seconds, rounded up.
    pub fn retry_after_secs(&self) -> u64 {
        let secs = self.retry_after.as_secs();
        if self.retry_after.subsec_nanos() > 0 {
            secs.saturating_add(1)
        } else {
            secs
        }
    }
}

/// Per-key token-bucket rate limiter.
///
/// Checks on the same key are serialized by the bucket's lock; checks on
/// different keys proceed independently. The limiter is cheap to share
/// behind an `Arc`.
#[derive(Debug)]
pub struct RateLimiter<C: Clock = SystemClock> {
    store: Arc<BucketStore>,
    config: LimiterConfig,
    clock: C,
    stats: LimiterStats,
}

impl RateLimiter<SystemClock> {
    /// Create a limiter on the system monotonic clock.
    pub fn new(config: LimiterConfig) -> Result<Self> {
        Self::with_clock(config, SystemClock::new())
    }
}

impl<C: Clock> RateLimiter<C> {
    /// Create a limiter with a custom time source.
    pub fn with_clock(config: LimiterConfig, clock: C) -> Result<Self> {
        Self::with_store(config, Arc::new(BucketStore::new()), clock)
    }

    /// Create a limiter over an existing bucket store.
    pub fn with_store(config: LimiterConfig, store: Arc<BucketStore>, clock: C) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            store,
            config,
            clock,
            stats: LimiterStats::new(),
        })
    }

    /// Check `key` at the configured per-request cost.
    pub fn check(&self, key: &BucketKey) -> Decision {
        self.check_with_cost(key, self.config.cost_per_request)
    }

    /// Check `key`, consuming `cost` tokens if admitted.
    ///
    /// Negative and NaN costs are treated as zero. A cost above capacity is
    /// always denied.
    pub fn check_with_cost(&self, key: &BucketKey, cost: f64) -> Decision {
        let cost = if cost.is_nan() { 0.0 } else { cost.max(0.0) };

        trace!(key = %key, cost = cost, "Checking rate limit");

        let outcome = loop {
            let (shared, created) = self.store.get_or_insert_with(key, || {
                TokenBucket::new(
                    self.config.capacity,
                    self.config.refill_rate_per_second,
                    self.clock.now(),
                )
            });
            if created {
                self.stats.record_created();
                debug!(
                    key = %key,
                    capacity = self.config.capacity,
                    refill_rate = self.config.refill_rate_per_second,
                    "Creating new bucket"
                );
            }

            let mut bucket = shared.lock();
            if bucket.is_retired() {
                // Evicted between lookup and lock; go again for the live one.
                continue;
            }
            break bucket.try_consume(cost, self.clock.now());
        };

        let decision = match outcome {
            Consume::Taken { remaining } => Decision {
                allowed: true,
                remaining,
                retry_after: Duration::ZERO,
                limit: self.config.capacity,
            },
            Consume::Short {
                remaining,
                retry_after,
            } => {
                debug!(
                    key = %key,
                    remaining = remaining,
                    retry_after_ms = retry_after.as_millis() as u64,
                    "Rate limit exceeded"
                );
                Decision {
                    allowed: false,
                    remaining,
                    retry_after,
                    limit: self.config.capacity,
                }
            }
        };

        self.stats.record_decision(decision.allowed);
        decision
    }

    /// Tokens `key` would have right now, without consuming or creating.
    pub fn peek(&self, key: &BucketKey) -> Option<f64> {
        let shared = self.store.get(key)?;
        let bucket = shared.lock();
        Some(bucket.projected_tokens(self.clock.now()))
    }

    /// Evict buckets idle for longer than the key TTL.
    ///
    /// Returns the number of buckets removed.
    pub fn sweep_idle(&self) -> usize {
        let evicted = self.store.evict_idle(self.clock.now(), self.config.key_ttl);
        if evicted > 0 {
            self.stats.record_evicted(evicted);
            debug!(
                evicted = evicted,
                remaining_buckets = self.store.len(),
                "Evicted idle buckets"
            );
        }
        evicted
    }

    /// Number of buckets currently held.
    pub fn bucket_count(&self) -> usize {
        self.store.len()
    }

    /// Drop all buckets.
    ///
    /// This is primarily useful for testing.
    pub fn clear(&self) {
        self.store.clear();
    }

    /// Point-in-time copy of the admission counters.
    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Settings this limiter was built with.
    pub fn config(&self) -> &LimiterConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ratelimit::clock::ManualClock;
    use rand::{Rng, SeedableRng};
    use std::sync::Barrier;

    fn limiter(capacity: f64, rate: f64) -> (RateLimiter<ManualClock>, ManualClock) {
        let clock = ManualClock::default();
        let config = LimiterConfig::new(capacity, rate).with_key_ttl(Duration::from_secs(60));
        let limiter = RateLimiter::with_clock(config, clock.clone()).unwrap();
        (limiter, clock)
    }

    #[test]
    fn test_limiter_creation() {
        let (limiter, _) = limiter(5.0, 1.0);
        assert_eq!(limiter.bucket_count(), 0);
        assert_eq!(limiter.config().capacity, 5.0);
    }

    #[test]
    fn test_burst_then_deny() {
        let (limiter, _) = limiter(5.0, 1.0);
        let key = BucketKey::new("client");

        for i in 0..5 {
            let decision = limiter.check(&key);
            assert!(decision.allowed, "request {} should be admitted", i + 1);
            assert_eq!(decision.remaining, 4.0 - i as f64);
            assert_eq!(decision.retry_after, Duration::ZERO);
        }

        let denied = limiter.check(&key);
        assert!(!denied.allowed);
        assert_eq!(denied.remaining, 0.0);
        assert!((denied.retry_after.as_secs_f64() - 1.0).abs() < 1e-6);
        assert_eq!(denied.retry_after_secs(), 1);
    }

    #[test]
    fn test_refill_after_one_second() {
        let (limiter, clock) = limiter(5.0, 1.0);
        let key = BucketKey::new("client");

        for _ in 0..5 {
            limiter.check(&key);
        }
        assert!(!limiter.check(&key).allowed);

        clock.advance(Duration::from_secs(1));
        assert!(limiter.check(&key).allowed);
        assert!(!limiter.check(&key).allowed);
    }

    #[test]
    fn test_keys_are_independent() {
        let (limiter, _) = limiter(1.0, 1.0);

        assert!(limiter.check(&BucketKey::new("a")).allowed);
        assert!(!limiter.check(&BucketKey::new("a")).allowed);
        assert!(limiter.check(&BucketKey::new("b")).allowed);
        assert_eq!(limiter.bucket_count(), 2);
    }

    #[test]
    fn test_denial_metadata_stable_at_same_instant() {
        let (limiter, clock) = limiter(2.0, 0.5);
        let key = BucketKey::new("client");
        limiter.check_with_cost(&key, 2.0);

        let first = limiter.check(&key);
        let second = limiter.check(&key);
        assert!(!first.allowed && !second.allowed);
        assert!(first.retry_after > Duration::ZERO);
        assert_eq!(first.retry_after, second.retry_after);

        clock.advance(Duration::from_millis(500));
        let later = limiter.check(&key);
        assert!(!later.allowed);
        assert!(later.retry_after < first.retry_after);
        assert!(later.retry_after > Duration::ZERO);
    }

    #[test]
    fn test_weighted_cost() {
        let (limiter, _) = limiter(10.0, 1.0);
        let key = BucketKey::new("client");

        let decision = limiter.check_with_cost(&key, 7.5);
        assert!(decision.allowed);
        assert_eq!(decision.remaining, 2.5);

        let denied = limiter.check_with_cost(&key, 3.0);
        assert!(!denied.allowed);
        assert_eq!(denied.remaining, 2.5);
        assert!((denied.retry_after.as_secs_f64() - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_cost_above_capacity_always_denied() {
        let (limiter, clock) = limiter(5.0, 1.0);
        let key = BucketKey::new("client");

        let denied = limiter.check_with_cost(&key, 8.0);
        assert!(!denied.allowed);
        assert_eq!(denied.remaining, 5.0);
        assert!((denied.retry_after.as_secs_f64() - 3.0).abs() < 1e-6);

        clock.advance(Duration::from_secs(3600));
        assert!(!limiter.check_with_cost(&key, 8.0).allowed);
    }

    #[test]
    fn test_degenerate_costs() {
        let (limiter, _) = limiter(1.0, 1.0);
        let key = BucketKey::new("client");

        assert!(limiter.check_with_cost(&key, f64::NAN).allowed);
        assert!(limiter.check_with_cost(&key, -3.0).allowed);
        assert_eq!(limiter.peek(&key), Some(1.0));

        let denied = limiter.check_with_cost(&key, f64::INFINITY);
        assert!(!denied.allowed);
        assert_eq!(denied.retry_after, Duration::MAX);
    }

    #[test]
    fn test_backwards_clock_does_not_refill() {
        let (limiter, clock) = limiter(2.0, 1.0);
        let key = BucketKey::new("client");
        let start = clock.now();

        clock.advance(Duration::from_secs(10));
        limiter.check_with_cost(&key, 2.0);

        clock.set(start);
        let denied = limiter.check(&key);
        assert!(!denied.allowed);
        assert_eq!(denied.remaining, 0.0);
    }

    #[test]
    fn test_tokens_stay_within_bounds() {
        let (limiter, clock) = limiter(7.0, 3.0);
        let key = BucketKey::new("client");
        let mut rng = rand::rngs::StdRng::seed_from_u64(0x5eed);

        for _ in 0..2_000 {
            clock.advance(Duration::from_millis(rng.gen_range(0..800)));
            let cost = rng.gen_range(0.0..9.0);
            let decision = limiter.check_with_cost(&key, cost);

            assert!(decision.remaining >= 0.0);
            assert!(decision.remaining <= 7.0);
            if !decision.allowed {
                assert!(decision.retry_after > Duration::ZERO);
            }
        }
    }

    #[test]
    fn test_concurrent_checks_admit_exactly_capacity() {
        let (limiter, _) = limiter(10.0, 1.0);
        let key = BucketKey::new("hot");
        let threads = 64;
        let barrier = Barrier::new(threads);

        let admitted = std::thread::scope(|s| {
            let workers: Vec<_> = (0..threads)
                .map(|_| {
                    s.spawn(|| {
                        barrier.wait();
                        limiter.check(&key).allowed
                    })
                })
                .collect();
            workers
                .into_iter()
                .map(|w| w.join().unwrap())
                .filter(|allowed| *allowed)
                .count()
        });

        assert_eq!(admitted, 10);
        let stats = limiter.stats();
        assert_eq!(stats.admitted, 10);
        assert_eq!(stats.rejected, 54);
        assert_eq!(stats.buckets_created, 1);
    }

    #[test]
    fn test_idle_bucket_is_evicted_and_recreated_full() {
        let (limiter, clock) = limiter(3.0, 0.001);
        let idle = BucketKey::new("idle");
        let busy = BucketKey::new("busy");

        limiter.check_with_cost(&idle, 3.0);
        clock.advance(Duration::from_secs(45));
        limiter.check(&busy);
        clock.advance(Duration::from_secs(30));

        assert_eq!(limiter.sweep_idle(), 1);
        assert_eq!(limiter.bucket_count(), 1);
        assert_eq!(limiter.peek(&idle), None);
        assert!(limiter.peek(&busy).is_some());

        let fresh = limiter.check(&idle);
        assert!(fresh.allowed);
        assert_eq!(fresh.remaining, 2.0);
        assert_eq!(limiter.stats().buckets_evicted, 1);
        assert_eq!(limiter.stats().buckets_created, 3);
    }

    #[test]
    fn test_shared_store_is_injectable() {
        let store = Arc::new(BucketStore::new());
        let clock = ManualClock::default();
        let limiter = RateLimiter::with_store(
            LimiterConfig::new(1.0, 1.0),
            Arc::clone(&store),
            clock,
        )
        .unwrap();

        limiter.check(&BucketKey::new("a"));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_check_retries_when_bucket_evicted_under_it() {
        let store = Arc::new(BucketStore::new());
        let limiter = RateLimiter::with_store(
            LimiterConfig::new(5.0, 1.0),
            Arc::clone(&store),
            ManualClock::default(),
        )
        .unwrap();
        let key = BucketKey::new("client");
        limiter.check(&key);
        let stale = store.get(&key).unwrap();

        let decision = std::thread::scope(|s| {
            let mut guard = stale.lock();
            let checker = s.spawn(|| limiter.check(&key));
            // Let the checker look up the stale bucket and block on its lock.
            std::thread::sleep(Duration::from_millis(50));
            store.unlink(&key);
            guard.retire();
            drop(guard);
            checker.join().unwrap()
        });

        assert!(decision.allowed);
        assert_eq!(decision.remaining, 4.0);
        assert_eq!(stale.lock().tokens(), 4.0);
        let live = store.get(&key).unwrap();
        assert!(!Arc::ptr_eq(&live, &stale));
        assert_eq!(limiter.stats().buckets_created, 2);
    }

    #[test]
    fn test_clear_buckets() {
        let (limiter, _) = limiter(1.0, 1.0);
        let key = BucketKey::new("client");
        limiter.check(&key);
        assert!(!limiter.check(&key).allowed);

        limiter.clear();
        assert_eq!(limiter.bucket_count(), 0);
        assert!(limiter.check(&key).allowed);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let cases = [
            LimiterConfig::new(0.0, 1.0),
            LimiterConfig::new(5.0, -1.0),
            LimiterConfig::new(f64::NAN, 1.0),
            LimiterConfig::new(5.0, f64::INFINITY),
            LimiterConfig::new(5.0, 1.0).with_key_ttl(Duration::ZERO),
            LimiterConfig::new(5.0, 1.0).with_cost_per_request(0.0),
        ];

        for config in cases {
            let result = RateLimiter::new(config.clone());
            assert!(
                matches!(result, Err(FloodgateError::Config(_))),
                "{:?} should be rejected",
                config
            );
        }
    }

    #[test]
    fn test_retry_after_secs_rounds_up() {
        let decision = Decision {
            allowed: false,
            remaining: 0.0,
            retry_after: Duration::from_millis(1500),
            limit: 5.0,
        };
        assert_eq!(decision.retry_after_secs(), 2);

        let exact = Decision {
            retry_after: Duration::from_secs(3),
            ..decision
        };
        assert_eq!(exact.retry_after_secs(), 3);
    }
}
