//! Endpoint handlers.

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

/// Payload returned by the limited endpoint.
#[derive(Debug, Serialize)]
pub struct LimitedResponse {
    pub name: &'static str,
}

/// The rate-limited endpoint. Always succeeds once admitted.
pub async fn limited(_request: Request<Body>) -> Response {
    (
        StatusCode::OK,
        Json(LimitedResponse {
            name: "Limited, don't over use me!",
        }),
    )
        .into_response()
}

/// Liveness probe. Not rate limited.
pub async fn healthz() -> &'static str {
    "ok"
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_limited_returns_fixed_payload() {
        let response = limited(Request::new(Body::empty())).await;
        assert_eq!(response.status(), StatusCode::OK);

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["name"], "Limited, don't over use me!");
    }
}
