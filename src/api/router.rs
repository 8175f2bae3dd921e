//! Router assembly, grounded in `src/api/http_server.rs`'s router/state/
//! middleware layering.

use axum::routing::{delete, get, post};
use axum::Router;
use tower_http::trace::TraceLayer;

use crate::api::handlers;
use crate::api::middleware::correlation_id_middleware;
use crate::api::state::AppState;

/// Build the control-plane `axum::Router` over every endpoint in the fixed
/// table, layered with correlation-id and request tracing middleware.
#[must_use]
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route("/session/register", post(handlers::session_register))
        .route("/session/validate", post(handlers::session_validate))
        .route("/session", delete(handlers::session_delete))
        .route("/git/execute", post(handlers::git_execute))
        .route("/pr/{op}", post(handlers::pr_operation))
        .route("/logs/list", get(handlers::logs_list))
        .route("/logs/task/{id}", get(handlers::logs_task))
        .route("/logs/container/{id}", get(handlers::logs_container))
        .route("/logs/search", get(handlers::logs_search))
        .layer(axum::middleware::from_fn(correlation_id_middleware))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
