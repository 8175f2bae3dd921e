//! Shared bearer-token authentication for control-plane handlers: the
//! fixed first step of the pipeline in spec.md §4.6 (parse, authenticate).

use std::net::SocketAddr;

use axum::http::HeaderMap;

use crate::api::middleware::resolve_source_ip;
use crate::api::state::AppState;
use crate::errors::ApiError;
use crate::session::Session;

/// An authenticated request: the session it resolved to and the source IP
/// it was attributed to (used for both rate limiting and audit logging).
pub struct AuthenticatedRequest {
    /// The validated session.
    pub session: Session,
    /// The address the request is attributed to.
    pub source_ip: std::net::IpAddr,
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
}

/// Parse the bearer token, resolve the source IP, and validate the session
/// against it. This is the `parse → authenticate` prefix of the fixed
/// pipeline; callers still owe rate-limit and policy checks before
/// dispatch.
pub fn authenticate(state: &AppState, headers: &HeaderMap, peer: SocketAddr) -> Result<AuthenticatedRequest, ApiError> {
    let token = bearer_token(headers).ok_or(ApiError::Unauthenticated)?;
    let source_ip = resolve_source_ip(peer, headers);

    let validated = state
        .sessions
        .validate(token, source_ip)
        .map_err(ApiError::InvalidSession)?;

    Ok(AuthenticatedRequest { session: validated.session, source_ip })
}
