//! Shared control-plane state, grounded in `src/api/http_server.rs`'s
//! `AppState` pattern (component handles behind `Arc`, no global singleton).

use std::sync::Arc;

use crate::audit::AuditLogger;
use crate::config::GatewayConfig;
use crate::credentials::CredentialStore;
use crate::logs::{LogIndex, LogReader};
use crate::policy::PolicyEngine;
use crate::rate_limiter::RateLimiter;
use crate::session::SessionManager;

/// Everything a control-plane handler needs, held by `Arc` so axum can
/// clone it cheaply per request.
#[derive(Clone)]
pub struct AppState {
    /// Gateway configuration.
    pub config: Arc<GatewayConfig>,
    /// Session table.
    pub sessions: Arc<SessionManager>,
    /// Per-(session, class) rate limiter.
    pub rate_limiter: Arc<RateLimiter>,
    /// Branch/PR ownership policy engine.
    pub policy: Arc<PolicyEngine>,
    /// Append-only audit sink.
    pub audit: Arc<AuditLogger>,
    /// Log index for the log access endpoints.
    pub log_index: Arc<LogIndex>,
    /// Capped log reader.
    pub log_reader: Arc<LogReader>,
    /// Credential store, exposed read-only via the control plane so the
    /// operator CLI can confirm a credential is loaded without the value.
    pub credential_store: Arc<CredentialStore>,
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState").finish_non_exhaustive()
    }
}
