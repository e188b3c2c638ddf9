//! Admission backend trait for abstracting local and remote limiters.

use async_trait::async_trait;

use super::clock::Clock;
use super::key::BucketKey;
use super::limiter::{Decision, RateLimiter};

/// Trait for admission-control implementations.
///
/// The HTTP layer only talks to this trait, so the in-process
/// [`RateLimiter`] can be swapped for one that coordinates across processes
/// without touching the middleware.
#[async_trait]
pub trait AdmissionBackend: Send + Sync {
    /// Check `key`, consuming `cost` tokens if admitted.
    async fn check(&self, key: &BucketKey, cost: f64) -> Decision;

    /// Tokens consumed by a plain request.
    fn default_cost(&self) -> f64;

    /// Burst ceiling advertised to clients.
    fn limit(&self) -> f64;
}

#[async_trait]
impl<C: Clock + 'static> AdmissionBackend for RateLimiter<C> {
    async fn check(&self, key: &BucketKey, cost: f64) -> Decision {
        self.check_with_cost(key, cost)
    }

    fn default_cost(&self) -> f64 {
        self.config().cost_per_request
    }

    fn limit(&self) -> f64 {
        self.config().capacity
    }
}
