//! Log access policy: task/container self-scoping, search scope enforcement
//! (spec.md §4.7). Ground truth:
//! `examples/original_source/gateway-sidecar/tests/test_log_endpoints.py::TestLogPolicy`.

use crate::logs::index::LogIndex;
use crate::policy::engine::PolicyResult;

/// The `scope` query parameter accepted by `GET /logs/search`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchScope {
    /// Search only the calling container's own logs.
    SelfScope,
    /// Any other value; always denied.
    Other,
}

/// Decide whether `requesting_container` may read logs for `task_id`: only
/// the task's owning container may.
pub fn task_access(index: &LogIndex, requesting_container: &str, task_id: &str) -> PolicyResult {
    match index.get_container_for_task(task_id) {
        Ok(Some(owner)) if owner == requesting_container => {
            PolicyResult { allowed: true, reason: "owner access".to_string() }
        }
        Ok(Some(_)) => PolicyResult { allowed: false, reason: "task owned by a different container".to_string() },
        Ok(None) => PolicyResult { allowed: false, reason: "task not found".to_string() },
        Err(_) => PolicyResult { allowed: false, reason: "unavailable".to_string() },
    }
}

/// Decide whether `requesting_container` may read logs for
/// `target_container`: only itself.
#[must_use]
pub fn container_access(requesting_container: &str, target_container: &str) -> PolicyResult {
    if requesting_container == target_container {
        PolicyResult { allowed: true, reason: "self access".to_string() }
    } else {
        PolicyResult { allowed: false, reason: "container access denied: not self".to_string() }
    }
}

/// Decide whether a search request's `scope` is permitted: only `self`.
#[must_use]
pub fn search_scope_allowed(scope: SearchScope) -> PolicyResult {
    match scope {
        SearchScope::SelfScope => PolicyResult { allowed: true, reason: "self-scoped search allowed".to_string() },
        SearchScope::Other => PolicyResult { allowed: false, reason: "search scope must be self".to_string() },
    }
}
