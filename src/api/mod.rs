//! Control-plane HTTP API (spec.md §4.6): bearer-token auth, rate limiting,
//! policy checks, and audit logging wired around an `axum::Router`.

/// Bearer-token authentication shared by every handler.
pub mod auth;
/// Route handlers implementing the fixed pipeline per endpoint.
pub mod handlers;
/// Correlation-id middleware and peer-address resolution.
pub mod middleware;
/// `ApiError` to HTTP response conversion.
pub mod response;
/// Router assembly.
pub mod router;
/// Shared application state.
pub mod state;
/// Request/response DTOs.
pub mod types;

pub use router::create_router;
pub use state::AppState;
