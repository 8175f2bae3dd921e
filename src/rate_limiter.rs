//! Sliding-window rate limiter (spec.md §4.3).
//!
//! Buckets are keyed by `(session_hash, OperationClass)`. Each bucket holds
//! a ring of request timestamps within the trailing hour; `check` evicts
//! anything older than the window before comparing against the limit.

use std::time::{Duration, Instant};

use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::config::RateLimitConfig;

/// The rate limiter's bucketing dimension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OperationClass {
    /// `git push`.
    GitPush,
    /// PR comment/merge/close/ready-for-review.
    PrMutation,
    /// Any other git operation that touches branch state.
    BranchOperation,
    /// Reading the injected credential (spec.md §4.1 access, audited).
    CredentialAccess,
    /// Log list/read/search.
    LogAccess,
}

const WINDOW: Duration = Duration::from_secs(3600);

/// Exceeded-limit error, carrying how long until the oldest entry ages out.
#[derive(Debug, Clone, Copy)]
pub struct RateLimited {
    /// Seconds until the next request would be accepted.
    pub retry_after_secs: u64,
}

struct Bucket {
    timestamps: Vec<Instant>,
}

impl Bucket {
    fn new() -> Self {
        Self { timestamps: Vec::new() }
    }

    fn evict_stale(&mut self, now: Instant) {
        self.timestamps.retain(|&t| now.duration_since(t) < WINDOW);
    }
}

/// Per-`(session_hash, OperationClass)` sliding-window limiter.
pub struct RateLimiter {
    buckets: DashMap<(String, OperationClass), Bucket>,
    config: RateLimitConfig,
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("active_buckets", &self.buckets.len())
            .finish_non_exhaustive()
    }
}

impl RateLimiter {
    /// Construct a rate limiter from the configured per-class limits.
    #[must_use]
    pub fn new(config: RateLimitConfig) -> Self {
        Self { buckets: DashMap::new(), config }
    }

    fn limit_for(&self, class: OperationClass) -> u32 {
        match class {
            OperationClass::GitPush => self.config.git_push,
            OperationClass::PrMutation => self.config.pr_mutation,
            OperationClass::BranchOperation => self.config.branch_operation,
            OperationClass::CredentialAccess => self.config.credential_access,
            OperationClass::LogAccess => self.config.log_access,
        }
    }

    /// Record and check a request for `session_hash` under `class`. Returns
    /// `Err(RateLimited)` without recording the request if the bucket is
    /// already at its limit.
    pub fn check(&self, session_hash: &str, class: OperationClass) -> Result<(), RateLimited> {
        let now = Instant::now();
        let limit = self.limit_for(class);
        let key = (session_hash.to_string(), class);

        let mut bucket = self.buckets.entry(key).or_insert_with(Bucket::new);
        bucket.evict_stale(now);

        if bucket.timestamps.len() >= limit as usize {
            let oldest = bucket.timestamps.first().copied().unwrap_or(now);
            let retry_after = WINDOW.saturating_sub(now.duration_since(oldest));
            return Err(RateLimited { retry_after_secs: retry_after.as_secs() });
        }

        bucket.timestamps.push(now);
        Ok(())
    }
}
