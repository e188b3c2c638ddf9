//! Handler composition for rate limiting.
//!
//! [`rate_limited`] takes any [`Handler`] and returns a new handler that
//! consults an [`AdmissionBackend`] before delegating. Nothing here depends
//! on routing; the server module decides where the composed handler is
//! mounted.

use async_trait::async_trait;
use axum::body::Body;
use axum::extract::ConnectInfo;
use axum::http::header::RETRY_AFTER;
use axum::http::{HeaderName, HeaderValue, Request, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{instrument, trace};

use crate::ratelimit::{AdmissionBackend, Decision, KeyExtractor, RequestMeta};

/// Remaining whole tokens after an admitted request.
pub const X_RATELIMIT_REMAINING: HeaderName = HeaderName::from_static("x-ratelimit-remaining");
/// Bucket capacity.
pub const X_RATELIMIT_LIMIT: HeaderName = HeaderName::from_static("x-ratelimit-limit");

/// An asynchronous request handler.
#[async_trait]
pub trait Handler: Send + Sync + 'static {
    async fn call(&self, request: Request<Body>) -> Response;
}

/// Adapts an async function into a [`Handler`].
#[derive(Clone)]
pub struct HandlerFn<F> {
    f: F,
}

/// Wrap an async function as a [`Handler`].
pub fn handler_fn<F, Fut>(f: F) -> HandlerFn<F>
where
    F: Fn(Request<Body>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Response> + Send + 'static,
{
    HandlerFn { f }
}

#[async_trait]
impl<F, Fut> Handler for HandlerFn<F>
where
    F: Fn(Request<Body>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Response> + Send + 'static,
{
    async fn call(&self, request: Request<Body>) -> Response {
        (self.f)(request).await
    }
}

/// Machine-readable body of a rejection.
#[derive(Debug, Serialize)]
struct RateLimitedBody {
    error: &'static str,
}

/// A handler guarded by an admission check.
pub struct RateLimited<H, B: ?Sized, E> {
    inner: H,
    backend: Arc<B>,
    extractor: E,
}

/// Compose `handler` with a rate limit check.
///
/// Each request is keyed by `extractor` and checked against `backend` at the
/// backend's default cost. Rejections short-circuit with `429 Too Many
/// Requests`; admitted requests reach `handler` and gain quota headers.
pub fn rate_limited<H, B, E>(handler: H, backend: Arc<B>, extractor: E) -> RateLimited<H, B, E>
where
    H: Handler,
    B: AdmissionBackend + ?Sized + 'static,
    E: KeyExtractor,
{
    RateLimited {
        inner: handler,
        backend,
        extractor,
    }
}

#[async_trait]
impl<H, B, E> Handler for RateLimited<H, B, E>
where
    H: Handler,
    B: AdmissionBackend + ?Sized + 'static,
    E: KeyExtractor,
{
    #[instrument(skip_all, fields(method = %request.method(), path = %request.uri().path()))]
    async fn call(&self, request: Request<Body>) -> Response {
        let meta = request_meta(&request);
        let key = self.extractor.extract(&meta);
        let decision = self.backend.check(&key, self.backend.default_cost()).await;

        trace!(
            key = %key,
            allowed = decision.allowed,
            remaining = decision.remaining,
            "Admission decision made"
        );

        if !decision.allowed {
            return rejection(&decision);
        }

        let mut response = self.inner.call(request).await;
        annotate(&mut response, &decision);
        response
    }
}

/// Collect the metadata key extractors need from an inbound request.
///
/// The peer address comes from axum's `ConnectInfo` extension when present.
pub fn request_meta(request: &Request<Body>) -> RequestMeta {
    let peer_addr = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|info| info.0);
    RequestMeta::new(peer_addr, request.headers().clone())
}

/// Build the `429` response for a denied decision.
pub fn rejection(decision: &Decision) -> Response {
    let mut response = (
        StatusCode::TOO_MANY_REQUESTS,
        Json(RateLimitedBody {
            error: "rate_limited",
        }),
    )
        .into_response();

    let headers = response.headers_mut();
    headers.insert(RETRY_AFTER, HeaderValue::from(decision.retry_after_secs()));
    headers.insert(X_RATELIMIT_LIMIT, quota_value(decision.limit));
    response
}

/// Add quota headers to an admitted response.
fn annotate(response: &mut Response, decision: &Decision) {
    let headers = response.headers_mut();
    headers.insert(X_RATELIMIT_REMAINING, quota_value(decision.remaining));
    headers.insert(X_RATELIMIT_LIMIT, quota_value(decision.limit));
}

/// Token counts are advertised as whole tokens, rounded down.
fn quota_value(tokens: f64) -> HeaderValue {
    HeaderValue::from(tokens.max(0.0).floor() as u64)
}
