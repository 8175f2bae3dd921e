//! Git remote/refspec parsing and agent-identity matching helpers.
//!
//! Grounded in `examples/original_source/gateway-sidecar/policy.py` and its
//! test suite `tests/test_policy.py::TestExtractRepoFromRemote` /
//! `TestExtractBranchFromRefspec`.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

/// Which identity a policy-checked request is acting as: the hosted agent
/// itself, or a user delegating through it. Branch-ownership only honors
/// the configured incognito user in `Bot` mode; pr-ownership honors it in
/// either mode (spec.md §4.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthMode {
    /// The hosted agent identity acting on its own behalf.
    Bot,
    /// A user-delegated identity acting through the agent.
    Incognito,
}

impl Default for AuthMode {
    fn default() -> Self {
        Self::Bot
    }
}

/// Parse a git remote URL into an `"owner/repo"` identifier. Supports both
/// `https://github.com/owner/repo(.git)` and `git@github.com:owner/repo(.git)`
/// forms. Returns `None` for non-GitHub remotes or anything that does not
/// parse.
#[must_use]
pub fn extract_repo_from_remote(remote_url: &str) -> Option<String> {
    let trimmed = remote_url.trim();

    let path = if let Some(rest) = trimmed.strip_prefix("https://github.com/") {
        rest
    } else if let Some(rest) = trimmed.strip_prefix("http://github.com/") {
        rest
    } else if let Some(rest) = trimmed.strip_prefix("git@github.com:") {
        rest
    } else {
        return None;
    };

    let path = path.strip_suffix(".git").unwrap_or(path);
    let mut parts = path.splitn(2, '/');
    let owner = parts.next()?;
    let repo = parts.next()?;
    if owner.is_empty() || repo.is_empty() || repo.contains('/') {
        return None;
    }
    Some(format!("{owner}/{repo}"))
}

/// Resolve a git refspec to the destination branch name a push would land
/// on. Handles `main`, `refs/heads/feature`, `local:remote`, and
/// `+refs/heads/local:refs/heads/remote` (leading `+` is a force-push
/// marker and is stripped). Empty input yields `None`.
#[must_use]
pub fn extract_branch_from_refspec(refspec: &str) -> Option<String> {
    let refspec = refspec.trim().strip_prefix('+').unwrap_or(refspec.trim());
    if refspec.is_empty() {
        return None;
    }

    let dest = match refspec.split_once(':') {
        Some((_, dest)) => dest,
        None => refspec,
    };
    if dest.is_empty() {
        return None;
    }

    let branch = dest.strip_prefix("refs/heads/").unwrap_or(dest);
    if branch.is_empty() {
        None
    } else {
        Some(branch.to_string())
    }
}

/// Whether `branch` is treated as agent-owned purely by its name, without
/// consulting any PR, because it matches a configured agent branch prefix.
#[must_use]
pub fn branch_has_agent_prefix(branch: &str, prefixes: &[String]) -> bool {
    prefixes.iter().any(|p| branch.starts_with(p.as_str()))
}

/// Whether `author` (a GitHub login) should be treated as agent-owned for
/// a **branch-ownership** decision: one of the agent's derived variants, a
/// configured trusted branch owner, or — only in `Bot` mode — the
/// configured incognito user. All comparisons are case-insensitive.
#[must_use]
pub fn author_is_agent_owned_for_branch(
    author: &str,
    agent_variants: &HashSet<String>,
    trusted_branch_owners: &[String],
    incognito_user: Option<&str>,
    auth_mode: AuthMode,
) -> bool {
    let author_lc = author.to_lowercase();
    if agent_variants.contains(&author_lc) {
        return true;
    }
    if trusted_branch_owners
        .iter()
        .any(|u| u.to_lowercase() == author_lc)
    {
        return true;
    }
    if auth_mode == AuthMode::Bot {
        if let Some(incognito) = incognito_user {
            if incognito.to_lowercase() == author_lc {
                return true;
            }
        }
    }
    false
}

/// Whether `author` should be treated as agent-owned for a
/// **pr-ownership** decision: one of the agent's derived variants, or — in
/// either mode — the configured incognito user. Trusted branch owners are
/// not consulted here; that allowance is specific to branch-ownership.
#[must_use]
pub fn author_is_agent_owned_for_pr(
    author: &str,
    agent_variants: &HashSet<String>,
    incognito_user: Option<&str>,
) -> bool {
    let author_lc = author.to_lowercase();
    if agent_variants.contains(&author_lc) {
        return true;
    }
    if let Some(incognito) = incognito_user {
        if incognito.to_lowercase() == author_lc {
            return true;
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn https_remote_with_git_suffix() {
        assert_eq!(
            extract_repo_from_remote("https://github.com/acme/widgets.git"),
            Some("acme/widgets".to_string())
        );
    }

    #[test]
    fn https_remote_without_git_suffix() {
        assert_eq!(
            extract_repo_from_remote("https://github.com/acme/widgets"),
            Some("acme/widgets".to_string())
        );
    }

    #[test]
    fn ssh_remote_with_and_without_git_suffix() {
        assert_eq!(
            extract_repo_from_remote("git@github.com:acme/widgets.git"),
            Some("acme/widgets".to_string())
        );
        assert_eq!(
            extract_repo_from_remote("git@github.com:acme/widgets"),
            Some("acme/widgets".to_string())
        );
    }

    #[test]
    fn invalid_and_non_github_urls_return_none() {
        assert_eq!(extract_repo_from_remote("not a url"), None);
        assert_eq!(
            extract_repo_from_remote("https://gitlab.com/acme/widgets.git"),
            None
        );
    }

    #[test]
    fn refspec_simple_branch() {
        assert_eq!(extract_branch_from_refspec("main"), Some("main".to_string()));
    }

    #[test]
    fn refspec_with_refs_heads_prefix() {
        assert_eq!(
            extract_branch_from_refspec("refs/heads/feature"),
            Some("feature".to_string())
        );
    }

    #[test]
    fn refspec_local_colon_remote() {
        assert_eq!(
            extract_branch_from_refspec("local-branch:remote-branch"),
            Some("remote-branch".to_string())
        );
    }

    #[test]
    fn refspec_full_force_push_form() {
        assert_eq!(
            extract_branch_from_refspec("+refs/heads/local:refs/heads/remote"),
            Some("remote".to_string())
        );
    }

    #[test]
    fn empty_refspec_is_none() {
        assert_eq!(extract_branch_from_refspec(""), None);
    }

    #[test]
    fn agent_variants_include_bot_and_app_forms() {
        let variants: HashSet<String> = ["myagent", "myagent[bot]", "app/myagent", "apps/myagent"]
            .into_iter()
            .map(str::to_string)
            .collect();
        assert!(author_is_agent_owned_for_branch("MyAgent[bot]", &variants, &[], None, AuthMode::Bot));
        assert!(!author_is_agent_owned_for_branch("someone-else", &variants, &[], None, AuthMode::Bot));
    }

    #[test]
    fn trusted_owner_matches_case_insensitively_in_either_mode() {
        let variants: HashSet<String> = HashSet::new();
        assert!(author_is_agent_owned_for_branch(
            "Trusted-User",
            &variants,
            &["trusted-user".to_string()],
            None,
            AuthMode::Bot
        ));
        assert!(author_is_agent_owned_for_branch(
            "Trusted-User",
            &variants,
            &["trusted-user".to_string()],
            None,
            AuthMode::Incognito
        ));
    }

    #[test]
    fn incognito_user_allows_branch_ownership_only_in_bot_mode() {
        let variants: HashSet<String> = HashSet::new();
        assert!(author_is_agent_owned_for_branch(
            "Incognito",
            &variants,
            &[],
            Some("incognito"),
            AuthMode::Bot
        ));
        assert!(!author_is_agent_owned_for_branch(
            "Incognito",
            &variants,
            &[],
            Some("incognito"),
            AuthMode::Incognito
        ));
    }

    #[test]
    fn pr_ownership_ignores_trusted_branch_owners() {
        let variants: HashSet<String> = HashSet::new();
        // A trusted branch owner is not, by itself, an agent-owned PR author.
        assert!(!author_is_agent_owned_for_pr("trusted-user", &variants, None));
    }

    #[test]
    fn pr_ownership_honors_incognito_user_regardless_of_mode() {
        let variants: HashSet<String> = HashSet::new();
        assert!(author_is_agent_owned_for_pr("Incognito", &variants, Some("incognito")));
    }
}
