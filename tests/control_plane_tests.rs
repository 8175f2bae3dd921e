#![allow(clippy::expect_used, reason = "test code")]
#![allow(clippy::unwrap_used, reason = "test code")]

//! Control-plane integration tests: a real axum app built via `create_router`,
//! driven with `tower::ServiceExt::oneshot`, covering the concrete scenarios
//! against an in-memory session manager and a fake `GitHubClient`.

mod common;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::ConnectInfo;
use axum::http::{Request, StatusCode};
use sandbox_gateway::api::{create_router, AppState};
use sandbox_gateway::audit::AuditLogger;
use sandbox_gateway::config::{CredentialConfig, CredentialKind, GatewayConfig};
use sandbox_gateway::credentials::CredentialStore;
use sandbox_gateway::logs::{LogIndex, LogReader};
use sandbox_gateway::policy::github_client::fakes::FakeGitHubClient;
use sandbox_gateway::policy::{GitHubClient, PolicyEngine, PrInfo};
use sandbox_gateway::rate_limiter::RateLimiter;
use sandbox_gateway::session::{RepoMode, SessionManager};
use tower::ServiceExt;

const PEER: &str = "198.51.100.7:9000";

struct Harness {
    state: AppState,
    _dir: tempfile::TempDir,
}

impl Harness {
    fn new(github_client: impl GitHubClient + 'static) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let mut config = GatewayConfig::default();
        config.launcher_secret = "launcher-secret".to_string();
        config.identity.branch_prefixes = vec!["agent-".to_string()];

        let credential_path = dir.path().join("credential");
        std::fs::write(&credential_path, "sk-injected").unwrap();
        let credential_config = CredentialConfig {
            source_path: credential_path,
            kind: CredentialKind::ApiKey,
            header_name: "x-api-key".to_string(),
        };

        let state = AppState {
            sessions: Arc::new(SessionManager::new(dir.path().join("sessions.json"), config.session_ttl_secs)),
            rate_limiter: Arc::new(RateLimiter::new(config.rate_limit.clone())),
            policy: Arc::new(PolicyEngine::new(Arc::new(github_client), config.identity.clone(), config.pr_cache_ttl_secs)),
            audit: Arc::new(AuditLogger::noop()),
            log_index: Arc::new(LogIndex::new(dir.path().join("log-index.json"))),
            log_reader: Arc::new(LogReader::new(config.log_max_lines)),
            credential_store: Arc::new(CredentialStore::new(&credential_config)),
            config: Arc::new(config),
        };

        Self { state, _dir: dir }
    }

    fn write_log_index(&self, entries_json: &str) {
        std::fs::write(self.state.log_index.path(), format!("{{\"entries\": {entries_json}}}")).unwrap();
    }

    async fn register(&self, container_id: &str, container_ip: &str, mode: RepoMode) -> String {
        let body = serde_json::json!({
            "launcher_secret": "launcher-secret",
            "container_id": container_id,
            "container_ip": container_ip,
            "mode": mode,
        });
        let response = create_router(self.state.clone())
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/session/register")
                    .header("content-type", "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let parsed: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        parsed["token"].as_str().unwrap().to_string()
    }

    fn request(&self, method: &str, uri: &str) -> axum::http::request::Builder {
        Request::builder().method(method).uri(uri).extension(ConnectInfo(PEER.parse::<SocketAddr>().unwrap()))
    }
}

#[tokio::test]
async fn health_check_requires_no_authentication() {
    let harness = Harness::new(FakeGitHubClient::default());
    let response = create_router(harness.state.clone())
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn register_validate_heartbeat_extends_ttl() {
    let harness = Harness::new(FakeGitHubClient::default());
    let token = harness.register("c1", "198.51.100.7", RepoMode::Private).await;

    let before = harness.state.sessions.get_by_container("c1").unwrap().expires_at;

    let response = harness
        .request("POST", "/session/validate")
        .header("authorization", format!("Bearer {token}"))
        .body(Body::empty())
        .unwrap();
    let response = create_router(harness.state.clone()).oneshot(response).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let after = harness.state.sessions.get_by_container("c1").unwrap().expires_at;
    assert!(after >= before);
}

#[tokio::test]
async fn cross_ip_reuse_is_blocked() {
    let harness = Harness::new(FakeGitHubClient::default());
    let token = harness.register("c1", "10.0.0.5", RepoMode::Private).await;

    // The registered container IP (10.0.0.5) never matches the non-loopback
    // peer address every request in this harness arrives from, so a reused
    // token must be rejected regardless of any forwarded-for header.
    let response = harness
        .request("POST", "/session/validate")
        .header("authorization", format!("Bearer {token}"))
        .body(Body::empty())
        .unwrap();
    let response = create_router(harness.state.clone()).oneshot(response).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn merge_is_always_denied() {
    let harness = Harness::new(
        FakeGitHubClient::default()
            .with_pr(PrInfo {
                number: 42,
                author: "gateway-agent".to_string(),
                state: "open".to_string(),
                head_branch: "agent-fix".to_string(),
            })
            .with_visibility("o/r", RepoMode::Private),
    );
    let token = harness.register("c1", "198.51.100.7", RepoMode::Private).await;

    let body = serde_json::json!({"repo": "o/r", "pr_number": 42});
    let response = harness
        .request("POST", "/pr/merge")
        .header("authorization", format!("Bearer {token}"))
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap();
    let response = create_router(harness.state.clone()).oneshot(response).await.unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let parsed: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(parsed["error_kind"], "operation-not-permitted");
    assert!(parsed["reason"].as_str().unwrap().contains("human must merge"));
}

#[tokio::test]
async fn branch_ownership_on_agent_prefixed_branch_passes_policy() {
    if !common::git_available() {
        eprintln!("skipping: git not available");
        return;
    }

    let harness = Harness::new(FakeGitHubClient::default().with_visibility("acme/widgets", RepoMode::Public));
    let token = harness.register("c1", "198.51.100.7", RepoMode::Public).await;

    let work_dir = tempfile::tempdir().unwrap();
    let bare_dir = tempfile::tempdir().unwrap();
    common::init_git_repo_with_bare_origin(work_dir.path(), bare_dir.path());

    let body = serde_json::json!({
        "operation": "push",
        "repo_path": work_dir.path().to_string_lossy(),
        "remote_url": "https://github.com/acme/widgets.git",
        "refspec": "main:agent-fix-1",
    });
    let response = harness
        .request("POST", "/git/execute")
        .header("authorization", format!("Bearer {token}"))
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap();
    let response = create_router(harness.state.clone()).oneshot(response).await.unwrap();

    // The branch-ownership gate must have passed (otherwise this would be
    // 403 Forbidden); the push itself lands in the local bare origin.
    assert_ne!(response.status(), StatusCode::FORBIDDEN);
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn branch_without_agent_prefix_or_owning_pr_is_denied() {
    let harness = Harness::new(FakeGitHubClient::default().with_visibility("acme/widgets", RepoMode::Public));
    let token = harness.register("c1", "198.51.100.7", RepoMode::Public).await;

    let body = serde_json::json!({
        "operation": "push",
        "repo_path": "/tmp/does-not-matter",
        "remote_url": "https://github.com/acme/widgets.git",
        "refspec": "main:someone-elses-feature",
    });
    let response = harness
        .request("POST", "/git/execute")
        .header("authorization", format!("Bearer {token}"))
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap();
    let response = create_router(harness.state.clone()).oneshot(response).await.unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn private_session_denied_on_public_repo() {
    let harness = Harness::new(FakeGitHubClient::default().with_visibility("acme/widgets", RepoMode::Public));
    let token = harness.register("c1", "198.51.100.7", RepoMode::Private).await;

    let body = serde_json::json!({
        "operation": "status",
        "repo_path": "/tmp/does-not-matter",
        "remote_url": "https://github.com/acme/widgets.git",
    });
    let response = harness
        .request("POST", "/git/execute")
        .header("authorization", format!("Bearer {token}"))
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap();
    let response = create_router(harness.state.clone()).oneshot(response).await.unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn log_task_access_denied_across_containers() {
    let harness = Harness::new(FakeGitHubClient::default());
    harness.write_log_index(
        r#"[{"container_id":"c1","task_id":"t1","thread_ts":null,"log_file":"/nonexistent.log","timestamp":"2026-01-01T00:00:00Z"}]"#,
    );
    let token = harness.register("c2", "198.51.100.7", RepoMode::Private).await;

    let response = harness
        .request("GET", "/logs/task/t1")
        .header("authorization", format!("Bearer {token}"))
        .body(Body::empty())
        .unwrap();
    let response = create_router(harness.state.clone()).oneshot(response).await.unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let parsed: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(parsed["error_kind"], "operation-not-permitted");
}

#[tokio::test]
async fn log_task_access_allowed_for_owning_container() {
    let harness = Harness::new(FakeGitHubClient::default());
    let log_dir = tempfile::tempdir().unwrap();
    let log_path = log_dir.path().join("c1.log");
    std::fs::write(&log_path, "line one\nline two\n").unwrap();
    harness.write_log_index(&format!(
        r#"[{{"container_id":"c1","task_id":"t1","thread_ts":null,"log_file":{:?},"timestamp":"2026-01-01T00:00:00Z"}}]"#,
        log_path.to_string_lossy()
    ));
    let token = harness.register("c1", "198.51.100.7", RepoMode::Private).await;

    let response = harness
        .request("GET", "/logs/task/t1")
        .header("authorization", format!("Bearer {token}"))
        .body(Body::empty())
        .unwrap();
    let response = create_router(harness.state.clone()).oneshot(response).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn delete_session_requires_launcher_secret() {
    let harness = Harness::new(FakeGitHubClient::default());
    harness.register("c1", "10.0.0.5", RepoMode::Private).await;

    let body = serde_json::json!({"launcher_secret": "wrong", "container_id": "c1"});
    let response = create_router(harness.state.clone())
        .oneshot(
            Request::builder()
                .method("DELETE")
                .uri("/session")
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}
