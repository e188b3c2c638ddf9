//! HTTP boundary: handler composition, the limited endpoint and the server.

mod middleware;
mod server;
mod service;

pub use middleware::{
    handler_fn, rate_limited, rejection, request_meta, Handler, HandlerFn, RateLimited,
    X_RATELIMIT_LIMIT, X_RATELIMIT_REMAINING,
};
pub use server::{HttpServer, LIMITED_PATH};
pub use service::{healthz, limited, LimitedResponse};
