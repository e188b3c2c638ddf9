//! Background eviction of idle buckets.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{info, trace};

use super::clock::Clock;
use super::limiter::RateLimiter;

/// Handle to a running sweeper task.
#[derive(Debug)]
pub struct SweeperHandle {
    stop: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl SweeperHandle {
    /// Stop the sweeper and wait for it to exit.
    pub async fn shutdown(mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        let _ = self.task.await;
    }
}

/// Spawn a task that calls [`RateLimiter::sweep_idle`] every `interval`.
///
/// Must be called from within a tokio runtime.
pub fn spawn_sweeper<C: Clock + 'static>(
    limiter: Arc<RateLimiter<C>>,
    interval: Duration,
) -> SweeperHandle {
    let (stop, mut stopped) = oneshot::channel();

    let task = tokio::spawn(async move {
        info!(
            interval_ms = interval.as_millis() as u64,
            key_ttl_ms = limiter.config().key_ttl.as_millis() as u64,
            "Bucket sweeper started"
        );

        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately; nothing is idle yet.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = &mut stopped => break,
                _ = ticker.tick() => {
                    let evicted = limiter.sweep_idle();
                    trace!(
                        evicted = evicted,
                        buckets = limiter.bucket_count(),
                        "Sweep complete"
                    );
                }
            }
        }

        info!("Bucket sweeper stopped");
    });

    SweeperHandle {
        stop: Some(stop),
        task,
    }
}
