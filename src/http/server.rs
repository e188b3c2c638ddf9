//! HTTP server implementation.

use axum::body::Body;
use axum::http::Request;
use axum::routing::{any, get};
use axum::Router;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info};

use super::middleware::{handler_fn, rate_limited, Handler};
use super::service;
use crate::error::{FloodgateError, Result};
use crate::ratelimit::{AdmissionBackend, KeyExtractor};

/// Path of the rate-limited endpoint.
pub const LIMITED_PATH: &str = "/api/limited";

/// HTTP server exposing the rate-limited endpoint.
pub struct HttpServer<B: AdmissionBackend + ?Sized + 'static> {
    /// Address to bind to
    addr: SocketAddr,
    /// Admission backend shared by every request
    backend: Arc<B>,
    /// Derives bucket keys from requests
    extractor: Arc<dyn KeyExtractor>,
}

impl<B: AdmissionBackend + ?Sized + 'static> HttpServer<B> {
    /// Create a new HTTP server.
    pub fn new(addr: SocketAddr, backend: Arc<B>, extractor: Arc<dyn KeyExtractor>) -> Self {
        Self {
            addr,
            backend,
            extractor,
        }
    }

    /// Build the router without binding a socket.
    pub fn router(&self) -> Router {
        let guarded = Arc::new(rate_limited(
            handler_fn(service::limited),
            Arc::clone(&self.backend),
            Arc::clone(&self.extractor),
        ));

        Router::new()
            .route("/healthz", get(service::healthz))
            .route(
                LIMITED_PATH,
                any(move |request: Request<Body>| {
                    let guarded = Arc::clone(&guarded);
                    async move { guarded.call(request).await }
                }),
            )
    }

    /// Start the HTTP server.
    ///
    /// This method will block until the server is shut down.
    pub async fn serve(self) -> Result<()> {
        self.serve_with_shutdown(std::future::pending()).await
    }

    /// Start the HTTP server with graceful shutdown.
    ///
    /// The server will shut down when the provided signal resolves.
    pub async fn serve_with_shutdown<F>(self, signal: F) -> Result<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let app = self.router();
        let listener = TcpListener::bind(self.addr).await?;

        info!(
            addr = %listener.local_addr()?,
            path = LIMITED_PATH,
            key_extractor = self.extractor.name(),
            "Starting HTTP server"
        );

        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(signal)
        .await
        .map_err(|e| {
            error!(error = %e, "HTTP server failed");
            FloodgateError::Io(e)
        })
    }
}
