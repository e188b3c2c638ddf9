//! Limiter counters.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Monotonic counters updated by the limiter.
///
/// The limiter only counts; exporting the values is up to the caller.
#[derive(Debug, Default)]
pub struct LimiterStats {
    admitted: AtomicU64,
    rejected: AtomicU64,
    buckets_created: AtomicU64,
    buckets_evicted: AtomicU64,
}

/// Point-in-time copy of [`LimiterStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub checks: u64,
    pub admitted: u64,
    pub rejected: u64,
    pub buckets_created: u64,
    pub buckets_evicted: u64,
}

impl LimiterStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_decision(&self, allowed: bool) {
        let counter = if allowed {
            &self.admitted
        } else {
            &self.rejected
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_created(&self) {
        self.buckets_created.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_evicted(&self, count: usize) {
        self.buckets_evicted
            .fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let admitted = self.admitted.load(Ordering::Relaxed);
        let rejected = self.rejected.load(Ordering::Relaxed);
        StatsSnapshot {
            checks: admitted + rejected,
            admitted,
            rejected,
            buckets_created: self.buckets_created.load(Ordering::Relaxed),
            buckets_evicted: self.buckets_evicted.load(Ordering::Relaxed),
        }
    }
}
