//! GitHub PR lookups used by the policy engine, backed by the `gh` CLI.
//!
//! Grounded in `src/github/issues.rs`'s `gh`-CLI fetch pattern (subprocess,
//! `--json` field selection, raw intermediate struct for parsing).

use async_trait::async_trait;
use serde::Deserialize;
use tracing::instrument;

use crate::session::RepoMode;

/// A pull request as the policy engine needs to see it.
#[derive(Debug, Clone)]
pub struct PrInfo {
    /// PR number.
    pub number: u64,
    /// Author's GitHub login.
    pub author: String,
    /// PR state (`open`, `closed`, `merged`).
    pub state: String,
    /// Branch the PR is proposing to merge.
    pub head_branch: String,
}

/// The subset of the GitHub API the policy engine depends on, behind a
/// trait so tests can inject a fake instead of shelling out to `gh`
/// (mirrors `test_policy.py`'s `MagicMock` fixture).
#[async_trait]
pub trait GitHubClient: Send + Sync + std::fmt::Debug {
    /// List open PRs whose head branch is `branch` in `repo` (`"owner/repo"`).
    async fn list_prs_for_branch(
        &self,
        repo: &str,
        branch: &str,
    ) -> Result<Vec<PrInfo>, crate::errors::PolicyError>;

    /// Fetch a single PR by number.
    async fn get_pr_info(
        &self,
        repo: &str,
        pr_number: u64,
    ) -> Result<PrInfo, crate::errors::PolicyError>;

    /// Fetch `repo`'s visibility, mapped to the same `private`/`public` axis
    /// a session's mode is granted on.
    async fn repo_visibility(&self, repo: &str) -> Result<RepoMode, crate::errors::PolicyError>;
}

#[derive(Debug, Deserialize)]
struct RawPr {
    number: u64,
    author: RawAuthor,
    state: String,
    #[serde(rename = "headRefName")]
    head_ref_name: String,
}

#[derive(Debug, Deserialize)]
struct RawAuthor {
    login: String,
}

impl From<RawPr> for PrInfo {
    fn from(raw: RawPr) -> Self {
        Self {
            number: raw.number,
            author: raw.author.login,
            state: raw.state.to_lowercase(),
            head_branch: raw.head_ref_name,
        }
    }
}

/// `gh`-CLI-backed [`GitHubClient`].
#[derive(Debug, Clone, Default)]
pub struct GhCliClient;

#[async_trait]
impl GitHubClient for GhCliClient {
    #[instrument(skip(self))]
    async fn list_prs_for_branch(
        &self,
        repo: &str,
        branch: &str,
    ) -> Result<Vec<PrInfo>, crate::errors::PolicyError> {
        let output = tokio::process::Command::new("gh")
            .args([
                "pr",
                "list",
                "--repo",
                repo,
                "--head",
                branch,
                "--json",
                "number,author,state,headRefName",
                "--state",
                "all",
            ])
            .output()
            .await
            .map_err(|e| crate::errors::PolicyError::Unavailable(e.to_string()))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(crate::errors::PolicyError::Unavailable(stderr.into_owned()));
        }

        let json = String::from_utf8_lossy(&output.stdout);
        if json.trim().is_empty() || json.trim() == "[]" {
            return Ok(Vec::new());
        }

        let raw: Vec<RawPr> = serde_json::from_str(&json)
            .map_err(|e| crate::errors::PolicyError::Unavailable(e.to_string()))?;
        Ok(raw.into_iter().map(PrInfo::from).collect())
    }

    #[instrument(skip(self))]
    async fn get_pr_info(
        &self,
        repo: &str,
        pr_number: u64,
    ) -> Result<PrInfo, crate::errors::PolicyError> {
        let output = tokio::process::Command::new("gh")
            .args([
                "pr",
                "view",
                &pr_number.to_string(),
                "--repo",
                repo,
                "--json",
                "number,author,state,headRefName",
            ])
            .output()
            .await
            .map_err(|e| crate::errors::PolicyError::Unavailable(e.to_string()))?;

        if !output.status.success() {
            return Err(crate::errors::PolicyError::NotFound(format!(
                "pr #{pr_number} in {repo}"
            )));
        }

        let json = String::from_utf8_lossy(&output.stdout);
        let raw: RawPr = serde_json::from_str(&json)
            .map_err(|e| crate::errors::PolicyError::Unavailable(e.to_string()))?;
        Ok(raw.into())
    }

    #[instrument(skip(self))]
    async fn repo_visibility(&self, repo: &str) -> Result<RepoMode, crate::errors::PolicyError> {
        let output = tokio::process::Command::new("gh")
            .args(["repo", "view", repo, "--json", "visibility"])
            .output()
            .await
            .map_err(|e| crate::errors::PolicyError::Unavailable(e.to_string()))?;

        if !output.status.success() {
            return Err(crate::errors::PolicyError::NotFound(repo.to_string()));
        }

        #[derive(Deserialize)]
        struct RawVisibility {
            visibility: String,
        }
        let json = String::from_utf8_lossy(&output.stdout);
        let raw: RawVisibility = serde_json::from_str(&json)
            .map_err(|e| crate::errors::PolicyError::Unavailable(e.to_string()))?;

        // `gh` reports PUBLIC, PRIVATE, or INTERNAL; anything short of PUBLIC
        // is treated as private for session-mode enforcement.
        Ok(if raw.visibility.eq_ignore_ascii_case("public") {
            RepoMode::Public
        } else {
            RepoMode::Private
        })
    }
}
