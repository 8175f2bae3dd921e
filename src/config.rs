//! Gateway configuration: a single struct loaded once at startup and passed
//! by `Arc` into every component. No global config singleton (spec.md §9).

use std::collections::HashSet;
use std::net::SocketAddr;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Which header shape a credential is injected as.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CredentialKind {
    /// `x-api-key: <value>`.
    ApiKey,
    /// `authorization: Bearer <value>`.
    OAuthToken,
}

/// Per operation-class rate limits, requests per hour.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// `git-push` operations per hour.
    pub git_push: u32,
    /// `pr-mutation` operations per hour.
    pub pr_mutation: u32,
    /// `branch-operation` operations per hour (fetch/status/log/diff/show).
    pub branch_operation: u32,
    /// `credential-access` operations per hour.
    pub credential_access: u32,
    /// `log-access` operations per hour.
    pub log_access: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            git_push: 200,
            pr_mutation: 50,
            branch_operation: 100,
            credential_access: 20,
            log_access: 500,
        }
    }
}

/// Credential source configuration (spec.md §4.1).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CredentialConfig {
    /// File the credential store watches for the current token value.
    pub source_path: PathBuf,
    /// Header kind resolved from configuration (spec.md §9 open question).
    pub kind: CredentialKind,
    /// Header name to inject (e.g. `x-api-key`, `authorization`).
    pub header_name: String,
}

/// Agent identity configuration for the policy engine's branch/PR
/// ownership checks (spec.md §4.4, generalized from the original's
/// hardcoded agent name).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IdentityConfig {
    /// Short name of the hosted agent identity (e.g. `my-agent`). Variants
    /// `<name>[bot]`, `app/<name>`, `apps/<name>` are derived from this.
    pub agent_identity: String,
    /// Additional branch owners trusted regardless of PR authorship,
    /// matched case-insensitively.
    pub trusted_branch_owners: Vec<String>,
    /// The single configured "incognito" user (bot-mode/private identity)
    /// whose branches/PRs are also treated as agent-owned.
    pub incognito_user: Option<String>,
    /// Git branch name prefixes that are always considered agent-owned
    /// regardless of any PR lookup (e.g. `agent-`, `agent/`).
    pub branch_prefixes: Vec<String>,
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            agent_identity: "gateway-agent".to_string(),
            trusted_branch_owners: Vec::new(),
            incognito_user: None,
            branch_prefixes: vec!["agent-".to_string(), "agent/".to_string()],
        }
    }
}

/// Top-level gateway configuration, loaded from TOML with environment
/// variable overrides (`GATEWAY_*`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Address the control-plane API binds to.
    pub control_plane_addr: SocketAddr,
    /// Address the adaptation (credential-injection) server binds to.
    pub adaptation_addr: SocketAddr,
    /// Hostname the adaptation server injects credentials for; requests to
    /// any other host pass through unmodified.
    pub upstream_host: String,
    /// Directory holding `sessions.json`, `log-index.json`, and similar
    /// gateway state files.
    pub state_dir: PathBuf,
    /// Path to the audit log (JSON lines, append-only).
    pub audit_log_path: PathBuf,
    /// Session time-to-live before a heartbeat is required.
    pub session_ttl_secs: u64,
    /// Interval between expired-session prune sweeps.
    pub prune_interval_secs: u64,
    /// Shared secret the launcher must present to call `/session/register`
    /// and `/session` (delete) directly, out of band from per-container
    /// session tokens.
    pub launcher_secret: String,
    /// Credential injection configuration.
    pub credential: CredentialConfig,
    /// Policy engine identity configuration.
    pub identity: IdentityConfig,
    /// Rate limit configuration.
    pub rate_limit: RateLimitConfig,
    /// TTL for cached PR lookups consulted by the policy engine.
    pub pr_cache_ttl_secs: u64,
    /// Maximum lines a single log read may return.
    pub log_max_lines: usize,
    /// Log output format.
    pub log_format: LogFormat,
    /// `tracing-subscriber` env-filter directive.
    pub log_level: String,
    /// Timeout applied to git/gh subprocess invocations.
    pub subprocess_timeout_secs: u64,
}

/// Structured log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LogFormat {
    /// Human-readable text, for local development.
    Text,
    /// Newline-delimited JSON, for production log collection.
    Json,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        let state_dir = dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("/tmp"))
            .join("sandbox-gateway");
        Self {
            control_plane_addr: "127.0.0.1:8088".parse().expect("valid default addr"),
            adaptation_addr: "127.0.0.1:8089".parse().expect("valid default addr"),
            upstream_host: "api.anthropic.com".to_string(),
            audit_log_path: state_dir.join("audit.log"),
            state_dir,
            session_ttl_secs: 3600,
            prune_interval_secs: 900,
            launcher_secret: String::new(),
            credential: CredentialConfig {
                source_path: PathBuf::from("/run/secrets/gateway-credential"),
                kind: CredentialKind::ApiKey,
                header_name: "x-api-key".to_string(),
            },
            identity: IdentityConfig::default(),
            rate_limit: RateLimitConfig::default(),
            pr_cache_ttl_secs: 30,
            log_max_lines: 10_000,
            log_format: LogFormat::Text,
            log_level: "sandbox_gateway=info".to_string(),
            subprocess_timeout_secs: 30,
        }
    }
}

impl GatewayConfig {
    /// Load configuration from `path`, falling back to defaults if the file
    /// does not exist, then apply `GATEWAY_*` environment overrides.
    pub fn load(path: &std::path::Path) -> anyhow::Result<Self> {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path)?;
            toml::from_str(&content)?
        } else {
            Self::default()
        };

        if let Ok(secret) = std::env::var("GATEWAY_LAUNCHER_SECRET") {
            config.launcher_secret = secret;
        }
        if let Ok(level) = std::env::var("GATEWAY_LOG_LEVEL") {
            config.log_level = level;
        }
        if let Ok(host) = std::env::var("GATEWAY_UPSTREAM_HOST") {
            config.upstream_host = host;
        }

        Ok(config)
    }

    /// Render this configuration with secret-shaped fields redacted, for the
    /// `config` CLI subcommand.
    #[must_use]
    pub fn redacted(&self) -> serde_json::Value {
        let mut value = serde_json::to_value(self).unwrap_or(serde_json::Value::Null);
        if let Some(obj) = value.as_object_mut() {
            obj.insert(
                "launcher_secret".to_string(),
                serde_json::Value::String(if self.launcher_secret.is_empty() {
                    String::new()
                } else {
                    "<redacted>".to_string()
                }),
            );
        }
        value
    }

    /// Agent identity name variants used by the policy engine's ownership
    /// checks (short name, `[bot]` suffix, `app/`/`apps/` prefixes).
    #[must_use]
    pub fn agent_identity_variants(&self) -> HashSet<String> {
        let name = &self.identity.agent_identity;
        let mut variants = HashSet::new();
        variants.insert(name.to_lowercase());
        variants.insert(format!("{name}[bot]").to_lowercase());
        variants.insert(format!("app/{name}").to_lowercase());
        variants.insert(format!("apps/{name}").to_lowercase());
        variants
    }
}
