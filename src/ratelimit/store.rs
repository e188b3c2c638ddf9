//! Concurrent key to bucket storage.
//!
//! The map is sharded by [`DashMap`]; each bucket additionally sits behind
//! its own mutex, so checks on different keys never wait on one another and
//! the map shard lock is never held while a bucket is being updated.
//!
//! Lock order is always shard, then bucket. Checks release the shard guard
//! before taking the bucket lock, and eviction only `try_lock`s buckets, so
//! the two paths cannot deadlock.

use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::bucket::TokenBucket;
use super::key::BucketKey;

/// Shared handle to a single bucket.
pub type SharedBucket = Arc<Mutex<TokenBucket>>;

/// Sharded storage for per-key token buckets.
#[derive(Debug, Default)]
pub struct BucketStore {
    buckets: DashMap<BucketKey, SharedBucket>,
}

impl BucketStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self {
            buckets: DashMap::new(),
        }
    }

    /// Return the canonical bucket for `key`, creating it if absent.
    ///
    /// The second element is `true` when this call created the bucket.
    /// Concurrent first accesses for one key all observe the same instance.
    pub fn get_or_insert_with(
        &self,
        key: &BucketKey,
        factory: impl FnOnce() -> TokenBucket,
    ) -> (SharedBucket, bool) {
        if let Some(existing) = self.buckets.get(key) {
            return (Arc::clone(existing.value()), false);
        }

        let mut created = false;
        let bucket = self
            .buckets
            .entry(key.clone())
            .or_insert_with(|| {
                created = true;
                Arc::new(Mutex::new(factory()))
            })
            .value()
            .clone();
        (bucket, created)
    }

    /// Look up an existing bucket without creating one.
    pub fn get(&self, key: &BucketKey) -> Option<SharedBucket> {
        self.buckets.get(key).map(|b| Arc::clone(b.value()))
    }

    /// Remove every bucket idle for longer than `ttl` as of `now`.
    ///
    /// Idleness is re-checked under the bucket lock right before removal and
    /// the removed bucket is marked retired, so a check that already holds a
    /// handle to it will retry against a fresh bucket instead of writing into
    /// an orphan. Buckets locked by an in-flight check are skipped this round.
    ///
    /// Returns the number of buckets removed.
    pub fn evict_idle(&self, now: Instant, ttl: Duration) -> usize {
        let mut evicted = 0;
        self.buckets.retain(|_, shared| {
            let Some(mut bucket) = shared.try_lock() else {
                return true;
            };
            if bucket.idle_for(now) > ttl {
                bucket.retire();
                evicted += 1;
                false
            } else {
                true
            }
        });
        evicted
    }

    /// Number of live buckets.
    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    /// Check if the store holds no buckets.
    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    /// Drop every bucket.
    pub fn clear(&self) {
        self.buckets.retain(|_, shared| {
            shared.lock().retire();
            false
        });
    }

    /// Remove `key` from the map without retiring its bucket.
    #[cfg(test)]
    pub(crate) fn unlink(&self, key: &BucketKey) -> Option<SharedBucket> {
        self.buckets.remove(key).map(|(_, bucket)| bucket)
    }
}
