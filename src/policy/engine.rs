//! Policy engine: branch-ownership, PR-ownership, PR-comment, and
//! merge-always-deny decisions (spec.md §4.4).
//!
//! Ground truth for the decision tables is
//! `examples/original_source/gateway-sidecar/tests/test_policy.py`; this
//! module's tests mirror its cases directly.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::config::IdentityConfig;
use crate::errors::PolicyError;
use crate::policy::github_client::{GitHubClient, PrInfo};
use crate::policy::identity::{
    author_is_agent_owned_for_branch, author_is_agent_owned_for_pr, branch_has_agent_prefix, AuthMode,
};
use crate::session::RepoMode;

/// Outcome of a policy decision, returned to the control-plane API for
/// both dispatch and audit logging.
#[derive(Debug, Clone)]
pub struct PolicyResult {
    /// Whether the operation is permitted.
    pub allowed: bool,
    /// Human-readable reason, safe to return to the caller and to audit.
    pub reason: String,
}

impl PolicyResult {
    fn allow(reason: impl Into<String>) -> Self {
        Self { allowed: true, reason: reason.into() }
    }

    fn deny(reason: impl Into<String>) -> Self {
        Self { allowed: false, reason: reason.into() }
    }
}

#[derive(Clone)]
struct CachedPrInfo {
    pr: PrInfo,
    fetched_at: Instant,
}

impl CachedPrInfo {
    fn is_stale(&self, ttl: Duration) -> bool {
        self.fetched_at.elapsed() >= ttl
    }
}

/// Branch/PR ownership and merge policy, backed by a `GitHubClient` trait
/// object so tests can inject a fake instead of shelling out to `gh`.
pub struct PolicyEngine {
    github_client: Arc<dyn GitHubClient>,
    identity: IdentityConfig,
    pr_cache: Mutex<HashMap<(String, u64), CachedPrInfo>>,
    pr_cache_ttl: Duration,
}

impl std::fmt::Debug for PolicyEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PolicyEngine")
            .field("identity", &self.identity.agent_identity)
            .finish_non_exhaustive()
    }
}

impl PolicyEngine {
    /// Construct a policy engine over `github_client`.
    #[must_use]
    pub fn new(github_client: Arc<dyn GitHubClient>, identity: IdentityConfig, pr_cache_ttl_secs: u64) -> Self {
        Self {
            github_client,
            identity,
            pr_cache: Mutex::new(HashMap::new()),
            pr_cache_ttl: Duration::from_secs(pr_cache_ttl_secs),
        }
    }

    fn agent_variants(&self) -> std::collections::HashSet<String> {
        let name = &self.identity.agent_identity;
        [
            name.to_lowercase(),
            format!("{name}[bot]").to_lowercase(),
            format!("app/{name}").to_lowercase(),
            format!("apps/{name}").to_lowercase(),
        ]
        .into_iter()
        .collect()
    }

    fn is_agent_owned_for_branch(&self, author: &str, auth_mode: AuthMode) -> bool {
        author_is_agent_owned_for_branch(
            author,
            &self.agent_variants(),
            &self.identity.trusted_branch_owners,
            self.identity.incognito_user.as_deref(),
            auth_mode,
        )
    }

    fn is_agent_owned_for_pr(&self, author: &str) -> bool {
        author_is_agent_owned_for_pr(author, &self.agent_variants(), self.identity.incognito_user.as_deref())
    }

    async fn pr_for_branch(&self, repo: &str, branch: &str) -> Result<Option<PrInfo>, PolicyError> {
        let prs = self
            .github_client
            .list_prs_for_branch(repo, branch)
            .await?;
        Ok(prs.into_iter().find(|pr| pr.state == "open"))
    }

    async fn cached_pr(&self, repo: &str, pr_number: u64) -> Result<PrInfo, PolicyError> {
        {
            let cache = self.pr_cache.lock().expect("pr cache lock poisoned");
            if let Some(entry) = cache.get(&(repo.to_string(), pr_number)) {
                if !entry.is_stale(self.pr_cache_ttl) {
                    return Ok(entry.pr.clone());
                }
            }
        }

        let pr = self.github_client.get_pr_info(repo, pr_number).await?;
        let mut cache = self.pr_cache.lock().expect("pr cache lock poisoned");
        cache.insert(
            (repo.to_string(), pr_number),
            CachedPrInfo { pr: pr.clone(), fetched_at: Instant::now() },
        );
        Ok(pr)
    }

    /// Decide whether a push to `branch` in `repo` is permitted: allowed
    /// immediately if the branch matches a configured agent prefix,
    /// otherwise allowed only if an open PR for that branch is authored by
    /// an agent-owned identity. Fails closed (`deny`, reason `"unavailable"`)
    /// if the GitHub lookup fails.
    pub async fn branch_ownership(&self, repo: &str, branch: &str, auth_mode: AuthMode) -> PolicyResult {
        if branch_has_agent_prefix(branch, &self.identity.branch_prefixes) {
            return PolicyResult::allow("branch matches configured agent prefix");
        }

        match self.pr_for_branch(repo, branch).await {
            Ok(Some(pr)) if self.is_agent_owned_for_branch(&pr.author, auth_mode) => {
                PolicyResult::allow(format!("open PR #{} owned by {}", pr.number, pr.author))
            }
            Ok(Some(pr)) => PolicyResult::deny(format!(
                "branch has an open PR authored by {}, not an agent-owned identity",
                pr.author
            )),
            Ok(None) => PolicyResult::deny("no open PR found for branch"),
            Err(_) => PolicyResult::deny("unavailable"),
        }
    }

    /// Decide whether a mutating PR operation (merge/close/ready-for-review)
    /// is permitted: allowed only if the PR's author is agent-owned or the
    /// configured incognito user. `auth_mode` is accepted for parity with
    /// branch-ownership's signature, but unlike branch-ownership the
    /// incognito user is honored here in either mode.
    pub async fn pr_ownership(&self, repo: &str, pr_number: u64, _auth_mode: AuthMode) -> PolicyResult {
        match self.cached_pr(repo, pr_number).await {
            Ok(pr) if self.is_agent_owned_for_pr(&pr.author) => {
                PolicyResult::allow(format!("PR owned by {}", pr.author))
            }
            Ok(pr) => PolicyResult::deny(format!(
                "PR #{pr_number} not owned by an agent-owned identity or configured user (author: {})",
                pr.author
            )),
            Err(PolicyError::NotFound(_)) => PolicyResult::deny(format!("PR #{pr_number} not found")),
            Err(_) => PolicyResult::deny("unavailable"),
        }
    }

    /// Commenting is allowed on any existing PR, regardless of author.
    pub async fn pr_comment_allowed(&self, repo: &str, pr_number: u64) -> PolicyResult {
        match self.cached_pr(repo, pr_number).await {
            Ok(_) => PolicyResult::allow("comments allowed on any existing PR"),
            Err(PolicyError::NotFound(_)) => PolicyResult::deny(format!("PR #{pr_number} not found")),
            Err(_) => PolicyResult::deny("unavailable"),
        }
    }

    /// Decide whether `session_mode` may touch `repo` at all: the
    /// repository's visibility must match the session's mode exactly. A
    /// `private`-mode session is denied on a public repository and vice
    /// versa. Fails closed if the visibility lookup fails.
    pub async fn repo_mode_allowed(&self, repo: &str, session_mode: RepoMode) -> PolicyResult {
        match self.github_client.repo_visibility(repo).await {
            Ok(visibility) if visibility == session_mode => {
                PolicyResult::allow(format!("repository is {visibility:?}, matching session mode"))
            }
            Ok(visibility) => PolicyResult::deny(format!(
                "repository is {visibility:?} but session is in {session_mode:?} mode"
            )),
            Err(_) => PolicyResult::deny("unavailable"),
        }
    }

    /// Merges are never permitted through this gateway; a human must merge.
    #[must_use]
    pub fn merge_allowed(&self) -> PolicyResult {
        PolicyResult::deny("merge not supported through the gateway: a human must merge")
    }
}
