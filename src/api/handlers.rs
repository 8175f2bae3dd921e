//! Control-plane route handlers (spec.md §4.6). Every mutating/ownership
//! endpoint runs the fixed pipeline: authenticate, rate-limit, policy,
//! dispatch, audit.

use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use axum::extract::{ConnectInfo, Path as AxumPath, Query, State};
use axum::http::HeaderMap;
use axum::Json;

use crate::api::auth::authenticate;
use crate::api::state::AppState;
use crate::api::types::{
    DeleteSessionRequest, GitExecuteRequest, LogSearchQuery, PrOperation, PrOperationRequest,
    RegisterSessionRequest, RegisterSessionResponse, SuccessResponse,
};
use crate::audit::{AuditEntry, Decision};
use crate::errors::ApiError;
use crate::logs::policy::{self as log_policy, SearchScope};
use crate::policy::identity::extract_branch_from_refspec;
use crate::rate_limiter::OperationClass;

fn audit_and_return<T>(
    state: &AppState,
    session_hash_prefix: Option<String>,
    container_id: Option<String>,
    operation: &str,
    target: &str,
    decision: Decision,
    reason: &str,
    source_ip: std::net::IpAddr,
    result: Result<T, ApiError>,
) -> Result<T, ApiError> {
    let entry = AuditEntry {
        timestamp: chrono::Utc::now(),
        session_hash_prefix,
        container_id,
        operation: operation.to_string(),
        target: target.to_string(),
        decision,
        reason: reason.to_string(),
        source_ip,
    };
    if let Err(err) = state.audit.log(&entry) {
        tracing::warn!(error = %err, "failed to write audit log entry");
    }
    result
}

/// `GET /health`.
pub async fn health() -> Json<SuccessResponse> {
    Json(SuccessResponse::ok())
}

/// `POST /session/register`. Requires the launcher secret, not a session
/// bearer token (the launcher calls this before any session exists).
pub async fn session_register(
    State(state): State<AppState>,
    Json(body): Json<RegisterSessionRequest>,
) -> Result<Json<RegisterSessionResponse>, ApiError> {
    if body.launcher_secret != state.config.launcher_secret || state.config.launcher_secret.is_empty() {
        return Err(ApiError::Unauthenticated);
    }

    let token = state
        .sessions
        .register(body.container_id, body.container_ip, body.mode)
        .map_err(|e| ApiError::ExecutionFailed(e.to_string()))?;

    Ok(Json(RegisterSessionResponse { token: token.0 }))
}

/// `POST /session/validate`. Validates the bearer token against the
/// transport peer address and returns success with no further payload.
pub async fn session_validate(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
) -> Result<Json<SuccessResponse>, ApiError> {
    authenticate(&state, &headers, peer)?;
    Ok(Json(SuccessResponse::ok()))
}

/// `DELETE /session`. Requires the launcher secret.
pub async fn session_delete(
    State(state): State<AppState>,
    Json(body): Json<DeleteSessionRequest>,
) -> Result<Json<SuccessResponse>, ApiError> {
    if body.launcher_secret != state.config.launcher_secret || state.config.launcher_secret.is_empty() {
        return Err(ApiError::Unauthenticated);
    }
    state
        .sessions
        .delete_by_container(&body.container_id)
        .map_err(|e| ApiError::ExecutionFailed(e.to_string()))?;
    Ok(Json(SuccessResponse::ok()))
}

/// `POST /git/execute`. Dispatches on a fixed `GitOperation` enum; a push
/// requires branch-ownership, every other operation only requires a valid
/// session and rate-limit headroom.
pub async fn git_execute(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Json(body): Json<GitExecuteRequest>,
) -> Result<Json<SuccessResponse>, ApiError> {
    let auth = authenticate(&state, &headers, peer)?;
    let hash_prefix = AuditEntry::hash_prefix(&auth.session.token_hash);
    let container_id = auth.session.container_id.clone();
    let target = format!("{}@{}", body.remote_url, body.repo_path);

    let class = if body.operation.is_mutating() {
        OperationClass::GitPush
    } else {
        OperationClass::BranchOperation
    };
    if let Err(limited) = state.rate_limiter.check(&auth.session.token_hash, class) {
        return audit_and_return(
            &state,
            Some(hash_prefix),
            Some(container_id),
            "git.execute",
            &target,
            Decision::Deny,
            "rate limited",
            auth.source_ip,
            Err(ApiError::RateLimited { retry_after_secs: limited.retry_after_secs }),
        );
    }

    let repo = crate::policy::identity::extract_repo_from_remote(&body.remote_url)
        .ok_or_else(|| ApiError::BadRequest("remote_url is not a GitHub remote".to_string()))?;

    let mode_decision = state.policy.repo_mode_allowed(&repo, auth.session.mode).await;
    if !mode_decision.allowed {
        return audit_and_return(
            &state,
            Some(hash_prefix),
            Some(container_id),
            "git.execute",
            &target,
            Decision::Deny,
            &mode_decision.reason.clone(),
            auth.source_ip,
            Err(ApiError::Forbidden { reason: mode_decision.reason }),
        );
    }

    if body.operation.is_mutating() {
        let branch = body
            .refspec
            .as_deref()
            .and_then(extract_branch_from_refspec)
            .ok_or_else(|| ApiError::BadRequest("refspec does not resolve to a branch".to_string()))?;

        let decision = state.policy.branch_ownership(&repo, &branch, body.auth_mode).await;
        if !decision.allowed {
            return audit_and_return(
                &state,
                Some(hash_prefix),
                Some(container_id),
                "git.push",
                &target,
                Decision::Deny,
                &decision.reason.clone(),
                auth.source_ip,
                Err(ApiError::Forbidden { reason: decision.reason }),
            );
        }
    }

    let result = run_git_operation(&body).await;
    audit_and_return(
        &state,
        Some(hash_prefix),
        Some(container_id),
        "git.execute",
        &target,
        if result.is_ok() { Decision::Allow } else { Decision::Deny },
        "executed",
        auth.source_ip,
        result.map(|()| Json(SuccessResponse::ok())),
    )
}

async fn run_git_operation(body: &GitExecuteRequest) -> Result<(), ApiError> {
    let args: Vec<&str> = match body.operation {
        crate::api::types::GitOperation::Push => {
            let refspec = body.refspec.as_deref().unwrap_or("HEAD");
            vec!["push", "origin", refspec]
        }
        crate::api::types::GitOperation::Fetch => vec!["fetch", "origin"],
        crate::api::types::GitOperation::Status => vec!["status", "--short"],
        crate::api::types::GitOperation::Log => vec!["log", "--oneline", "-20"],
        crate::api::types::GitOperation::Diff => vec!["diff"],
        crate::api::types::GitOperation::Show => vec!["show", "HEAD"],
    };

    let output = crate::subprocess::run_bounded("git", &args, Path::new(&body.repo_path), Duration::from_secs(30))
        .await
        .map_err(|e| ApiError::ExecutionFailed(e.to_string()))?;

    if output.success {
        Ok(())
    } else {
        Err(ApiError::ExecutionFailed(output.stderr))
    }
}

/// `POST /pr/{op}`. Comment is allowed on any existing PR; close,
/// ready-for-review require PR-ownership; merge is always denied.
pub async fn pr_operation(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    AxumPath(op): AxumPath<PrOperation>,
    headers: HeaderMap,
    Json(body): Json<PrOperationRequest>,
) -> Result<Json<SuccessResponse>, ApiError> {
    let auth = authenticate(&state, &headers, peer)?;
    let hash_prefix = AuditEntry::hash_prefix(&auth.session.token_hash);
    let container_id = auth.session.container_id.clone();
    let target = format!("{}#{}", body.repo, body.pr_number);

    if let Err(limited) = state.rate_limiter.check(&auth.session.token_hash, OperationClass::PrMutation) {
        return audit_and_return(
            &state,
            Some(hash_prefix),
            Some(container_id),
            "pr.operation",
            &target,
            Decision::Deny,
            "rate limited",
            auth.source_ip,
            Err(ApiError::RateLimited { retry_after_secs: limited.retry_after_secs }),
        );
    }

    let mode_decision = state.policy.repo_mode_allowed(&body.repo, auth.session.mode).await;
    if !mode_decision.allowed {
        return audit_and_return(
            &state,
            Some(hash_prefix),
            Some(container_id),
            "pr.operation",
            &target,
            Decision::Deny,
            &mode_decision.reason.clone(),
            auth.source_ip,
            Err(ApiError::Forbidden { reason: mode_decision.reason }),
        );
    }

    let decision = if op == PrOperation::Merge {
        state.policy.merge_allowed()
    } else if op.requires_ownership() {
        state.policy.pr_ownership(&body.repo, body.pr_number, body.auth_mode).await
    } else {
        state.policy.pr_comment_allowed(&body.repo, body.pr_number).await
    };

    if !decision.allowed {
        return audit_and_return(
            &state,
            Some(hash_prefix),
            Some(container_id),
            "pr.operation",
            &target,
            Decision::Deny,
            &decision.reason.clone(),
            auth.source_ip,
            Err(ApiError::Forbidden { reason: decision.reason }),
        );
    }

    let result = run_pr_operation(op, &body).await;
    audit_and_return(
        &state,
        Some(hash_prefix),
        Some(container_id),
        "pr.operation",
        &target,
        if result.is_ok() { Decision::Allow } else { Decision::Deny },
        "executed",
        auth.source_ip,
        result.map(|()| Json(SuccessResponse::ok())),
    )
}

async fn run_pr_operation(op: PrOperation, body: &PrOperationRequest) -> Result<(), ApiError> {
    let pr_number = body.pr_number.to_string();
    let args: Vec<&str> = match op {
        PrOperation::Comment => {
            let comment_body = body
                .body
                .as_deref()
                .ok_or_else(|| ApiError::BadRequest("comment body is required".to_string()))?;
            vec!["pr", "comment", &pr_number, "--repo", &body.repo, "--body", comment_body]
        }
        PrOperation::Close => vec!["pr", "close", &pr_number, "--repo", &body.repo],
        PrOperation::ReadyForReview => vec!["pr", "ready", &pr_number, "--repo", &body.repo],
        PrOperation::Merge => return Err(ApiError::OperationNotPermitted),
    };

    let output = crate::subprocess::run_bounded("gh", &args, Path::new("."), Duration::from_secs(30))
        .await
        .map_err(|e| ApiError::ExecutionFailed(e.to_string()))?;

    if output.success {
        Ok(())
    } else {
        Err(ApiError::ExecutionFailed(output.stderr))
    }
}

/// `GET /logs/list`.
pub async fn logs_list(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
) -> Result<Json<Vec<crate::logs::LogIndexEntry>>, ApiError> {
    let auth = authenticate(&state, &headers, peer)?;
    let hash_prefix = AuditEntry::hash_prefix(&auth.session.token_hash);
    let container_id = auth.session.container_id.clone();
    let target = container_id.clone();

    if let Err(limited) = state.rate_limiter.check(&auth.session.token_hash, OperationClass::LogAccess) {
        return audit_and_return(
            &state,
            Some(hash_prefix),
            Some(container_id),
            "logs.list",
            &target,
            Decision::Deny,
            "rate limited",
            auth.source_ip,
            Err(ApiError::RateLimited { retry_after_secs: limited.retry_after_secs }),
        );
    }

    let result = state
        .log_index
        .list_entries(Some(&container_id))
        .map_err(|e| ApiError::ExecutionFailed(e.to_string()));
    audit_and_return(
        &state,
        Some(hash_prefix),
        Some(container_id),
        "logs.list",
        &target,
        if result.is_ok() { Decision::Allow } else { Decision::Deny },
        "listed own container logs",
        auth.source_ip,
        result.map(Json),
    )
}

/// `GET /logs/task/{id}`.
pub async fn logs_task(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    AxumPath(task_id): AxumPath<String>,
    headers: HeaderMap,
) -> Result<Json<crate::logs::LogReadResult>, ApiError> {
    let auth = authenticate(&state, &headers, peer)?;
    let hash_prefix = AuditEntry::hash_prefix(&auth.session.token_hash);
    let container_id = auth.session.container_id.clone();

    state
        .rate_limiter
        .check(&auth.session.token_hash, OperationClass::LogAccess)
        .map_err(|l| ApiError::RateLimited { retry_after_secs: l.retry_after_secs })?;

    let decision = log_policy::task_access(&state.log_index, &container_id, &task_id);
    if !decision.allowed {
        return audit_and_return(
            &state,
            Some(hash_prefix),
            Some(container_id),
            "logs.task",
            &task_id,
            Decision::Deny,
            &decision.reason.clone(),
            auth.source_ip,
            Err(ApiError::Forbidden { reason: decision.reason }),
        );
    }

    let result = read_task_log(&state, &task_id);
    audit_and_return(
        &state,
        Some(hash_prefix),
        Some(container_id),
        "logs.task",
        &task_id,
        if result.is_ok() { Decision::Allow } else { Decision::Deny },
        "owner access",
        auth.source_ip,
        result.map(Json),
    )
}

fn read_task_log(state: &AppState, task_id: &str) -> Result<crate::logs::LogReadResult, ApiError> {
    let entries = state
        .log_index
        .list_entries(None)
        .map_err(|e| ApiError::ExecutionFailed(e.to_string()))?;
    let entry = entries
        .into_iter()
        .find(|e| e.task_id == task_id)
        .ok_or_else(|| ApiError::BadRequest("task not found".to_string()))?;

    state
        .log_reader
        .read(&entry.log_file)
        .map_err(|e| ApiError::ExecutionFailed(e.to_string()))?
        .ok_or_else(|| ApiError::BadRequest("log file not found".to_string()))
}

/// `GET /logs/container/{id}`.
pub async fn logs_container(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    AxumPath(target_container): AxumPath<String>,
    headers: HeaderMap,
) -> Result<Json<Vec<crate::logs::LogIndexEntry>>, ApiError> {
    let auth = authenticate(&state, &headers, peer)?;
    let hash_prefix = AuditEntry::hash_prefix(&auth.session.token_hash);
    let container_id = auth.session.container_id.clone();

    state
        .rate_limiter
        .check(&auth.session.token_hash, OperationClass::LogAccess)
        .map_err(|l| ApiError::RateLimited { retry_after_secs: l.retry_after_secs })?;

    let decision = log_policy::container_access(&container_id, &target_container);
    if !decision.allowed {
        return audit_and_return(
            &state,
            Some(hash_prefix),
            Some(container_id),
            "logs.container",
            &target_container,
            Decision::Deny,
            &decision.reason.clone(),
            auth.source_ip,
            Err(ApiError::Forbidden { reason: decision.reason }),
        );
    }

    let result = state
        .log_index
        .list_entries(Some(&target_container))
        .map_err(|e| ApiError::ExecutionFailed(e.to_string()));
    audit_and_return(
        &state,
        Some(hash_prefix),
        Some(container_id),
        "logs.container",
        &target_container,
        if result.is_ok() { Decision::Allow } else { Decision::Deny },
        "self access",
        auth.source_ip,
        result.map(Json),
    )
}

/// `GET /logs/search`.
pub async fn logs_search(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Query(query): Query<LogSearchQuery>,
) -> Result<Json<Vec<String>>, ApiError> {
    let auth = authenticate(&state, &headers, peer)?;
    let hash_prefix = AuditEntry::hash_prefix(&auth.session.token_hash);
    let container_id = auth.session.container_id.clone();

    state
        .rate_limiter
        .check(&auth.session.token_hash, OperationClass::LogAccess)
        .map_err(|l| ApiError::RateLimited { retry_after_secs: l.retry_after_secs })?;

    if query.pattern.trim().is_empty() {
        return Err(ApiError::BadRequest("pattern is required".to_string()));
    }

    let scope = if query.scope == "self" { SearchScope::SelfScope } else { SearchScope::Other };
    let decision = log_policy::search_scope_allowed(scope);
    if !decision.allowed {
        return audit_and_return(
            &state,
            Some(hash_prefix),
            Some(container_id.clone()),
            "logs.search",
            &query.pattern,
            Decision::Deny,
            &decision.reason.clone(),
            auth.source_ip,
            Err(ApiError::Forbidden { reason: decision.reason }),
        );
    }

    let result = search_own_logs(&state, &container_id, &query.pattern);
    audit_and_return(
        &state,
        Some(hash_prefix),
        Some(container_id),
        "logs.search",
        &query.pattern,
        if result.is_ok() { Decision::Allow } else { Decision::Deny },
        "self-scoped search allowed",
        auth.source_ip,
        result.map(Json),
    )
}

fn search_own_logs(state: &AppState, container_id: &str, pattern: &str) -> Result<Vec<String>, ApiError> {
    let entries = state
        .log_index
        .list_entries(Some(container_id))
        .map_err(|e| ApiError::ExecutionFailed(e.to_string()))?;

    let mut matches = Vec::new();
    for entry in entries {
        if let Some(result) = state
            .log_reader
            .read(&entry.log_file)
            .map_err(|e| ApiError::ExecutionFailed(e.to_string()))?
        {
            let found = crate::logs::reader::search_lines(pattern, &result.lines)
                .map_err(|e| ApiError::BadRequest(e.to_string()))?;
            matches.extend(found);
        }
    }
    Ok(matches)
}
