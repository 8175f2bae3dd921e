//! Request/response DTOs for the control-plane API (spec.md §4.6).

use std::net::IpAddr;

use serde::{Deserialize, Serialize};

use crate::errors::ErrorKind;
use crate::policy::AuthMode;
use crate::session::RepoMode;

/// `POST /session/register` request body. Requires the launcher secret.
#[derive(Debug, Deserialize)]
pub struct RegisterSessionRequest {
    /// Launcher secret, proving this call comes from the trusted launcher.
    pub launcher_secret: String,
    /// Opaque container identifier.
    pub container_id: String,
    /// Container's bridge-network IP.
    pub container_ip: IpAddr,
    /// Repository access mode to grant.
    pub mode: RepoMode,
}

/// `POST /session/register` response body.
#[derive(Debug, Serialize)]
pub struct RegisterSessionResponse {
    /// The raw bearer token, returned exactly once.
    pub token: String,
}

/// `DELETE /session` request body.
#[derive(Debug, Deserialize)]
pub struct DeleteSessionRequest {
    /// Launcher secret.
    pub launcher_secret: String,
    /// Container id whose session should be removed.
    pub container_id: String,
}

/// `POST /git/execute` request body. The operation is a fixed enum, not a
/// free-form string (spec.md §9: avoid late-bound string dispatch).
#[derive(Debug, Deserialize)]
pub struct GitExecuteRequest {
    /// Which git operation to perform.
    pub operation: GitOperation,
    /// Path to the repository the operation runs against.
    pub repo_path: String,
    /// Remote URL, used to resolve the owning `owner/repo` for policy
    /// checks.
    pub remote_url: String,
    /// Refspec for push operations; ignored for read-only operations.
    #[serde(default)]
    pub refspec: Option<String>,
    /// Which identity this push is acting as; defaults to `bot` when the
    /// caller omits it.
    #[serde(default)]
    pub auth_mode: AuthMode,
}

/// Fixed set of git operations the control plane will dispatch. Mutating
/// operations outside this set are rejected as `operation-not-permitted`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum GitOperation {
    /// Push to a remote branch; requires branch-ownership.
    Push,
    /// Fetch from a remote.
    Fetch,
    /// `git status`.
    Status,
    /// `git log`.
    Log,
    /// `git diff`.
    Diff,
    /// `git show`.
    Show,
}

impl GitOperation {
    /// Whether this operation mutates remote state and therefore requires
    /// a branch-ownership check before execution.
    #[must_use]
    pub fn is_mutating(self) -> bool {
        matches!(self, Self::Push)
    }
}

/// `POST /pr/{op}` request body.
#[derive(Debug, Deserialize)]
pub struct PrOperationRequest {
    /// Repository identifier (`"owner/repo"`).
    pub repo: String,
    /// PR number.
    pub pr_number: u64,
    /// Comment body, required when `op` is `comment`.
    #[serde(default)]
    pub body: Option<String>,
    /// Which identity this operation is acting as; defaults to `bot` when
    /// the caller omits it.
    #[serde(default)]
    pub auth_mode: AuthMode,
}

/// The `{op}` path parameter of `POST /pr/{op}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum PrOperation {
    /// Post a comment; allowed on any existing PR.
    Comment,
    /// Merge; always denied.
    Merge,
    /// Close the PR; requires PR-ownership.
    Close,
    /// Mark the PR ready for review; requires PR-ownership.
    ReadyForReview,
}

impl PrOperation {
    /// Whether this operation requires a PR-ownership check (as opposed to
    /// being allowed on any existing PR, like commenting).
    #[must_use]
    pub fn requires_ownership(self) -> bool {
        !matches!(self, Self::Comment)
    }
}

/// `GET /logs/search` query parameters.
#[derive(Debug, Deserialize)]
pub struct LogSearchQuery {
    /// Regex search pattern.
    pub pattern: String,
    /// Scope of the search; only `self` is ever permitted.
    pub scope: String,
}

/// The fixed error response shape (spec.md §7).
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    /// Always `false` for error responses.
    pub success: bool,
    /// Machine-readable error kind.
    pub error_kind: ErrorKind,
    /// Human-readable reason.
    pub reason: String,
}

/// A generic success envelope for operations with no specific payload.
#[derive(Debug, Serialize)]
pub struct SuccessResponse {
    /// Always `true`.
    pub success: bool,
}

impl SuccessResponse {
    /// Construct the canonical success envelope.
    #[must_use]
    pub fn ok() -> Self {
        Self { success: true }
    }
}
