//! Token bucket state and arithmetic.

use std::time::{Duration, Instant};

/// Outcome of a single consume attempt against a bucket.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum Consume {
    /// Tokens were taken; carries the balance left afterwards.
    Taken { remaining: f64 },
    /// Not enough tokens; carries the balance and the wait until `cost` accrues.
    Short { remaining: f64, retry_after: Duration },
}

/// Per-key token bucket.
///
/// `tokens` always stays within `[0, capacity]`. It only grows through
/// [`refill`](Self::refill) and only shrinks through
/// [`try_consume`](Self::try_consume), and both run under the caller's lock.
#[derive(Debug, Clone)]
pub struct TokenBucket {
    tokens: f64,
    capacity: f64,
    refill_rate: f64,
    last_refill: Instant,
    /// Set by the store when the bucket has been unlinked from the map.
    retired: bool,
}

impl TokenBucket {
    /// Create a full bucket.
    pub fn new(capacity: f64, refill_rate: f64, now: Instant) -> Self {
        Self {
            tokens: capacity,
            capacity,
            refill_rate,
            last_refill: now,
            retired: false,
        }
    }

    /// Current token balance, as of the last refill.
    pub fn tokens(&self) -> f64 {
        self.tokens
    }

    /// Maximum token balance.
    pub fn capacity(&self) -> f64 {
        self.capacity
    }

    /// Instant of the last refill.
    pub fn last_refill(&self) -> Instant {
        self.last_refill
    }

    /// Add the tokens accrued since the last refill.
    ///
    /// A `now` earlier than the last refill counts as zero elapsed time and
    /// leaves the timestamp where it is.
    pub fn refill(&mut self, now: Instant) {
        let elapsed = now.saturating_duration_since(self.last_refill);
        if elapsed.is_zero() {
            return;
        }
        self.tokens = (self.tokens + elapsed.as_secs_f64() * self.refill_rate).min(self.capacity);
        self.last_refill = now;
    }

    /// Balance `now` would observe, without mutating the bucket.
    pub fn projected_tokens(&self, now: Instant) -> f64 {
        let elapsed = now.saturating_duration_since(self.last_refill);
        (self.tokens + elapsed.as_secs_f64() * self.refill_rate).min(self.capacity)
    }

    /// Refill, then take `cost` tokens if the balance covers it.
    pub(crate) fn try_consume(&mut self, cost: f64, now: Instant) -> Consume {
        self.refill(now);

        if self.tokens >= cost {
            self.tokens = (self.tokens - cost).max(0.0);
            return Consume::Taken {
                remaining: self.tokens,
            };
        }

        Consume::Short {
            remaining: self.tokens,
            retry_after: self.time_until(cost),
        }
    }

    /// Time until the balance reaches `cost`. Never zero for a shortfall.
    fn time_until(&self, cost: f64) -> Duration {
        let wait = (cost - self.tokens) / self.refill_rate;
        Duration::try_from_secs_f64(wait)
            .unwrap_or(Duration::MAX)
            .max(Duration::from_nanos(1))
    }

    /// How long the bucket has gone without a refill as of `now`.
    pub fn idle_for(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_refill)
    }

    pub(crate) fn is_retired(&self) -> bool {
        self.retired
    }

    pub(crate) fn retire(&mut self) {
        self.retired = true;
    }
}
