//! Structured error types for each gateway component.
//!
//! Every variant here is converted at the control-plane/adaptation boundary
//! into the fixed `{success: false, error_kind, reason}` response shape. No
//! variant carries a credential value or raw session token.

use std::net::IpAddr;

/// Errors from the session manager (spec.md §4.2, §7).
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// No session matches the presented token.
    #[error("session not found")]
    NotFound,

    /// The session's `expires_at` has passed.
    #[error("session expired")]
    Expired,

    /// The presented token hashes to a known session, but the request's
    /// source address does not match the session's bound container IP.
    #[error("session bound to {bound}, request came from {presented}")]
    IpMismatch {
        /// The IP address the session was registered with.
        bound: IpAddr,
        /// The IP address the request actually arrived from.
        presented: IpAddr,
    },

    /// Persistence file read/write failure.
    #[error("session persistence I/O error: {0}")]
    Io(#[source] std::io::Error),

    /// Persistence file exists but does not parse as the expected format.
    #[error("session persistence file corrupted: {0}")]
    Corrupted(String),
}

/// Errors from the policy engine (spec.md §4.4, §7).
#[derive(Debug, thiserror::Error)]
pub enum PolicyError {
    /// The referenced PR, branch, or task does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// A network or subprocess call the policy engine depends on
    /// (e.g. `gh pr view`) failed or timed out. Callers treat this as a
    /// fail-closed deny, never as an allow.
    #[error("policy backend unavailable: {0}")]
    Unavailable(String),

    /// The request did not carry enough information to evaluate policy
    /// (e.g. a refspec that does not resolve to a destination branch).
    #[error("cannot evaluate policy: {0}")]
    Indeterminate(String),
}

/// Errors from the adaptation server's request parsing/handling (spec.md §4.5, §7).
#[derive(Debug, thiserror::Error)]
pub enum AdaptationError {
    /// The request frame did not parse as a well-formed ICAP-like message.
    #[error("malformed request: {0}")]
    Malformed(String),

    /// The `Encapsulated` header is missing or its offsets are inconsistent.
    #[error("malformed encapsulated header: {0}")]
    MalformedEncapsulated(String),

    /// An unsupported method was requested.
    #[error("unsupported method: {0}")]
    UnsupportedMethod(String),

    /// The client disconnected or the read timeout elapsed mid-frame.
    #[error("connection error: {0}")]
    Connection(#[source] std::io::Error),
}

/// Errors surfaced by the control-plane API (spec.md §4.6, §7).
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// No `Authorization: Bearer` header, or the header did not parse.
    #[error("missing or malformed authorization header")]
    Unauthenticated,

    /// The session token does not validate (wraps the underlying reason).
    #[error("session invalid: {0}")]
    InvalidSession(#[source] SessionError),

    /// The caller exceeded their rate limit for this operation class.
    #[error("rate limit exceeded, retry after {retry_after_secs}s")]
    RateLimited {
        /// Seconds until the oldest request in the window expires.
        retry_after_secs: u64,
    },

    /// The policy engine denied the operation.
    #[error("operation not permitted: {reason}")]
    Forbidden {
        /// Human-readable denial reason, safe to return to the caller.
        reason: String,
    },

    /// The requested operation is not one the dispatcher recognizes.
    #[error("operation not permitted")]
    OperationNotPermitted,

    /// Subprocess execution (`git`, `gh`) failed or timed out.
    #[error("execution failed: {0}")]
    ExecutionFailed(String),

    /// The client disconnected while a subprocess was still running.
    #[error("client closed connection")]
    ClientClosed,

    /// Malformed request body or missing required field.
    #[error("bad request: {0}")]
    BadRequest(String),
}

/// Errors from the log access subsystem (spec.md §4.7, §7).
#[derive(Debug, thiserror::Error)]
pub enum LogError {
    /// The task, container, or thread id does not appear in the index.
    #[error("not found: {0}")]
    NotFound(String),

    /// Search pattern failed pre-compilation validation (a DoS guard, not a
    /// regex syntax error).
    #[error("search pattern rejected: {0}")]
    PatternRejected(String),

    /// Underlying log file could not be read.
    #[error("log read error: {0}")]
    Io(#[source] std::io::Error),

    /// The index file could not be parsed.
    #[error("log index corrupted: {0}")]
    IndexCorrupted(String),
}

/// The error kinds returned to API/adaptation callers, independent of which
/// component raised them (spec.md §7's fixed taxonomy).
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorKind {
    /// No credentials were presented.
    Unauthenticated,
    /// Credentials were presented but are invalid or expired.
    InvalidSession,
    /// The operation class's rate limit is exhausted.
    RateLimited,
    /// Policy denied the operation.
    OperationNotPermitted,
    /// The request was malformed.
    BadRequest,
    /// A dependency (subprocess, network) was unavailable.
    Unavailable,
    /// The client disconnected before the operation completed.
    ClientClosed,
    /// Catch-all for unexpected internal failures.
    Internal,
}

impl ApiError {
    /// Map this error onto the fixed external error-kind taxonomy.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Unauthenticated => ErrorKind::Unauthenticated,
            Self::InvalidSession(_) => ErrorKind::InvalidSession,
            Self::RateLimited { .. } => ErrorKind::RateLimited,
            Self::Forbidden { .. } | Self::OperationNotPermitted => ErrorKind::OperationNotPermitted,
            Self::BadRequest(_) => ErrorKind::BadRequest,
            Self::ExecutionFailed(_) => ErrorKind::Unavailable,
            Self::ClientClosed => ErrorKind::ClientClosed,
        }
    }
}
