//! Append-only JSON-lines audit sink (spec.md §4.8). Grounded in
//! `src/proxy/audit.rs`'s `AuditLogger` (`Mutex<Option<File>>`,
//! `OpenOptions::append`, a `noop()` constructor used when audit is disabled
//! in tests).

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::net::IpAddr;
use std::path::PathBuf;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Whether a decision was allowed or denied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Decision {
    /// The operation was permitted.
    Allow,
    /// The operation was denied.
    Deny,
}

/// One audit record: the gateway never writes a credential or raw token
/// value into this struct, only the first 16 hex characters of a session
/// hash.
#[derive(Debug, Clone, Serialize)]
pub struct AuditEntry {
    /// When the decision was made.
    pub timestamp: DateTime<Utc>,
    /// First 16 hex characters of the session token hash, or `None` for
    /// unauthenticated requests.
    pub session_hash_prefix: Option<String>,
    /// Container the request originated from, if known.
    pub container_id: Option<String>,
    /// The operation attempted (e.g. `"git.push"`, `"pr.merge"`).
    pub operation: String,
    /// The target of the operation (repo, branch, PR number, log task id).
    pub target: String,
    /// Allow or deny.
    pub decision: Decision,
    /// Human-readable reason for the decision.
    pub reason: String,
    /// Source IP the request arrived from.
    pub source_ip: IpAddr,
}

impl AuditEntry {
    /// Truncate a full session hash to the audit-safe 16-character prefix.
    #[must_use]
    pub fn hash_prefix(token_hash: &str) -> String {
        token_hash.chars().take(16).collect()
    }
}

/// Writes [`AuditEntry`] records as newline-delimited JSON to a single
/// append-only file.
pub struct AuditLogger {
    file: Mutex<Option<File>>,
    path: PathBuf,
}

impl std::fmt::Debug for AuditLogger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuditLogger").field("path", &self.path).finish()
    }
}

impl AuditLogger {
    /// Open (creating if necessary) the audit log at `path`.
    pub fn new(path: PathBuf) -> std::io::Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self { file: Mutex::new(Some(file)), path })
    }

    /// A logger that discards everything written to it, for tests and for
    /// audit-disabled configurations.
    #[must_use]
    pub fn noop() -> Self {
        Self { file: Mutex::new(None), path: PathBuf::new() }
    }

    /// Append one entry as a JSON line.
    pub fn log(&self, entry: &AuditEntry) -> std::io::Result<()> {
        let mut guard = self.file.lock().expect("audit lock poisoned");
        if let Some(file) = guard.as_mut() {
            let json = serde_json::to_string(entry)?;
            writeln!(file, "{json}")?;
        }
        Ok(())
    }

    /// Flush buffered writes to disk.
    pub fn flush(&self) -> std::io::Result<()> {
        let mut guard = self.file.lock().expect("audit lock poisoned");
        if let Some(file) = guard.as_mut() {
            file.flush()?;
        }
        Ok(())
    }

    /// The configured audit log path.
    #[must_use]
    pub fn path(&self) -> &PathBuf {
        &self.path
    }
}
