//! Rate limiting logic and state management.

mod backend;
mod bucket;
mod clock;
mod key;
mod limiter;
mod stats;
mod store;
mod sweeper;

pub use backend::AdmissionBackend;
pub use bucket::TokenBucket;
pub use clock::{Clock, ManualClock, SystemClock};
pub use key::{
    ApiKeyHeader, BucketKey, ClientAddrKey, FirstOf, KeyExtractor, KeyStrategy, RequestMeta,
    GLOBAL_KEY,
};
pub use limiter::{Decision, LimiterConfig, RateLimiter};
pub use stats::{LimiterStats, StatsSnapshot};
pub use store::{BucketStore, SharedBucket};
pub use sweeper::{spawn_sweeper, SweeperHandle};
