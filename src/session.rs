//! Session manager (spec.md §4.2).
//!
//! Sessions are keyed by the SHA-256 hash of a 256-bit random token; the raw
//! token is returned once from [`SessionManager::register`] and never stored
//! anywhere after that, on disk or in memory. Ground truth:
//! `examples/original_source/gateway-sidecar/session_manager.py`.

use std::collections::HashMap;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use crate::errors::SessionError;

/// Which kind of repository access this session was granted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RepoMode {
    /// Full access to a private repository clone.
    Private,
    /// Access limited to a public repository's public surface.
    Public,
}

/// The raw bearer token handed back once at registration. Deliberately not
/// `Clone`/`Serialize` — nothing downstream should be able to persist it.
#[derive(Debug)]
pub struct RawToken(pub String);

/// An active session, held only in memory.
#[derive(Debug, Clone)]
pub struct Session {
    /// Hex-encoded SHA-256 hash of the raw token.
    pub token_hash: String,
    /// Opaque identifier of the container this session belongs to.
    pub container_id: String,
    /// IP address the session was registered from; validation rejects
    /// requests from any other address.
    pub container_ip: IpAddr,
    /// Access mode granted to this session.
    pub mode: RepoMode,
    /// When the session was first registered.
    pub created_at: DateTime<Utc>,
    /// When the session was last validated or heartbeated.
    pub last_seen: DateTime<Utc>,
    /// When the session expires absent a heartbeat.
    pub expires_at: DateTime<Utc>,
}

impl Session {
    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    fn extend_ttl(&mut self, ttl: Duration, now: DateTime<Utc>) {
        self.last_seen = now;
        self.expires_at = now + ttl;
    }
}

/// The on-disk shape of a session row. Deliberately a separate type from
/// [`Session`] (not a `#[serde(skip)]` field) so persistence and in-memory
/// representations cannot accidentally diverge by forgetting an attribute.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct PersistedSession {
    token_hash: String,
    container_id: String,
    container_ip: IpAddr,
    mode: RepoMode,
    created_at: DateTime<Utc>,
    last_seen: DateTime<Utc>,
    expires_at: DateTime<Utc>,
}

impl From<&Session> for PersistedSession {
    fn from(s: &Session) -> Self {
        Self {
            token_hash: s.token_hash.clone(),
            container_id: s.container_id.clone(),
            container_ip: s.container_ip,
            mode: s.mode,
            created_at: s.created_at,
            last_seen: s.last_seen,
            expires_at: s.expires_at,
        }
    }
}

impl From<PersistedSession> for Session {
    fn from(p: PersistedSession) -> Self {
        Self {
            token_hash: p.token_hash,
            container_id: p.container_id,
            container_ip: p.container_ip,
            mode: p.mode,
            created_at: p.created_at,
            last_seen: p.last_seen,
            expires_at: p.expires_at,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct PersistenceFile {
    version: u32,
    saved_at: DateTime<Utc>,
    sessions: Vec<PersistedSession>,
}

const PERSISTENCE_VERSION: u32 = 1;

fn hash_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hex::encode(hasher.finalize())
}

/// Hex encoding without pulling in the `hex` crate's full surface; the
/// gateway only ever needs lowercase digest-to-string conversion.
mod hex {
    pub(super) fn encode(bytes: impl AsRef<[u8]>) -> String {
        bytes.as_ref().iter().map(|b| format!("{b:02x}")).collect()
    }
}

fn constant_time_eq(a: &str, b: &str) -> bool {
    a.as_bytes().ct_eq(b.as_bytes()).into()
}

/// Result of validating a presented token against the session table.
#[derive(Debug)]
pub struct ValidatedSession {
    /// The session the token resolved to.
    pub session: Session,
}

/// In-memory, hash-keyed session table with atomic persistence.
pub struct SessionManager {
    sessions: Mutex<HashMap<String, Session>>,
    persistence_path: PathBuf,
    ttl: Duration,
}

impl std::fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionManager")
            .field("persistence_path", &self.persistence_path)
            .finish_non_exhaustive()
    }
}

impl SessionManager {
    /// Construct a session manager backed by `persistence_path`, loading any
    /// existing sessions from disk. A corrupted persistence file is treated
    /// as empty and logged, never as a hard startup failure.
    pub fn new(persistence_path: PathBuf, ttl_secs: u64) -> Self {
        let sessions = Self::load_from_disk(&persistence_path).unwrap_or_else(|err| {
            tracing::warn!(error = %err, path = %persistence_path.display(), "session persistence file corrupted, starting empty");
            HashMap::new()
        });
        Self {
            sessions: Mutex::new(sessions),
            persistence_path,
            ttl: Duration::seconds(ttl_secs as i64),
        }
    }

    fn load_from_disk(path: &Path) -> Result<HashMap<String, Session>, SessionError> {
        if !path.exists() {
            return Ok(HashMap::new());
        }
        let content = std::fs::read_to_string(path).map_err(SessionError::Io)?;
        if content.trim().is_empty() {
            return Ok(HashMap::new());
        }
        let file: PersistenceFile = serde_json::from_str(&content)
            .map_err(|e| SessionError::Corrupted(e.to_string()))?;
        Ok(file
            .sessions
            .into_iter()
            .map(|p| (p.token_hash.clone(), p.into()))
            .collect())
    }

    fn save_to_disk(&self, sessions: &HashMap<String, Session>) -> Result<(), SessionError> {
        let file = PersistenceFile {
            version: PERSISTENCE_VERSION,
            saved_at: Utc::now(),
            sessions: sessions.values().map(PersistedSession::from).collect(),
        };
        let json = serde_json::to_string_pretty(&file)
            .map_err(|e| SessionError::Corrupted(e.to_string()))?;

        if let Some(parent) = self.persistence_path.parent() {
            std::fs::create_dir_all(parent).map_err(SessionError::Io)?;
        }

        let tmp_path = self.persistence_path.with_extension("tmp");
        std::fs::write(&tmp_path, json).map_err(SessionError::Io)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let perms = std::fs::Permissions::from_mode(0o600);
            std::fs::set_permissions(&tmp_path, perms).map_err(SessionError::Io)?;
        }

        std::fs::rename(&tmp_path, &self.persistence_path).map_err(SessionError::Io)?;
        Ok(())
    }

    /// Register a new session for `container_id`/`container_ip`, returning
    /// the raw bearer token. The token is not retrievable again; only its
    /// hash lives in the session table from this point on.
    pub fn register(
        &self,
        container_id: String,
        container_ip: IpAddr,
        mode: RepoMode,
    ) -> Result<RawToken, SessionError> {
        let mut raw = [0u8; 32];
        rand::rng().fill_bytes(&mut raw);
        let token = raw.iter().map(|b| format!("{b:02x}")).collect::<String>();
        let token_hash = hash_token(&token);

        let now = Utc::now();
        let session = Session {
            token_hash: token_hash.clone(),
            container_id,
            container_ip,
            mode,
            created_at: now,
            last_seen: now,
            expires_at: now + self.ttl,
        };

        let mut sessions = self.sessions.lock().expect("session lock poisoned");
        sessions.insert(token_hash, session);
        self.save_to_disk(&sessions)?;

        Ok(RawToken(token))
    }

    /// Validate a presented raw token against `source_ip`. Hashes the
    /// presented token and looks up the hash (there is no plaintext-token
    /// index); on match, compares the stored hash in constant time, checks
    /// expiry, checks IP binding, and extends the TTL as a heartbeat.
    pub fn validate(
        &self,
        raw_token: &str,
        source_ip: IpAddr,
    ) -> Result<ValidatedSession, SessionError> {
        let presented_hash = hash_token(raw_token);
        let now = Utc::now();

        let mut sessions = self.sessions.lock().expect("session lock poisoned");

        let Some(stored_hash) = sessions
            .keys()
            .find(|k| constant_time_eq(k, &presented_hash))
            .cloned()
        else {
            return Err(SessionError::NotFound);
        };

        let expired = sessions
            .get(&stored_hash)
            .map(|s| s.is_expired(now))
            .unwrap_or(true);
        if expired {
            sessions.remove(&stored_hash);
            let _ = self.save_to_disk(&sessions);
            return Err(SessionError::Expired);
        }

        let bound_ip = sessions.get(&stored_hash).map(|s| s.container_ip);
        if bound_ip != Some(source_ip) {
            return Err(SessionError::IpMismatch {
                bound: bound_ip.expect("checked above"),
                presented: source_ip,
            });
        }

        let session = sessions.get_mut(&stored_hash).expect("checked above");
        session.extend_ttl(self.ttl, now);
        let session = session.clone();
        self.save_to_disk(&sessions)?;

        Ok(ValidatedSession { session })
    }

    /// Look up a session by container id, ignoring expiry.
    #[must_use]
    pub fn get_by_container(&self, container_id: &str) -> Option<Session> {
        let sessions = self.sessions.lock().expect("session lock poisoned");
        sessions
            .values()
            .find(|s| s.container_id == container_id)
            .cloned()
    }

    /// Look up every session bound to `ip`, ignoring expiry.
    #[must_use]
    pub fn get_by_ip(&self, ip: IpAddr) -> Vec<Session> {
        let sessions = self.sessions.lock().expect("session lock poisoned");
        sessions.values().filter(|s| s.container_ip == ip).cloned().collect()
    }

    /// Remove a session by its raw token, if present.
    pub fn delete(&self, raw_token: &str) -> Result<bool, SessionError> {
        let hash = hash_token(raw_token);
        let mut sessions = self.sessions.lock().expect("session lock poisoned");
        let removed = sessions.remove(&hash).is_some();
        if removed {
            self.save_to_disk(&sessions)?;
        }
        Ok(removed)
    }

    /// Remove a session by container id, if present.
    pub fn delete_by_container(&self, container_id: &str) -> Result<bool, SessionError> {
        let mut sessions = self.sessions.lock().expect("session lock poisoned");
        let hash = sessions
            .iter()
            .find(|(_, s)| s.container_id == container_id)
            .map(|(h, _)| h.clone());
        let Some(hash) = hash else {
            return Ok(false);
        };
        sessions.remove(&hash);
        self.save_to_disk(&sessions)?;
        Ok(true)
    }

    /// Remove every expired session, returning the number pruned. Intended
    /// to be called on a fixed interval (spec.md §5).
    pub fn prune_expired(&self) -> Result<usize, SessionError> {
        let now = Utc::now();
        let mut sessions = self.sessions.lock().expect("session lock poisoned");
        let before = sessions.len();
        sessions.retain(|_, s| !s.is_expired(now));
        let pruned = before - sessions.len();
        if pruned > 0 {
            self.save_to_disk(&sessions)?;
        }
        Ok(pruned)
    }

    /// List every session currently held, expired or not.
    #[must_use]
    pub fn list(&self) -> Vec<Session> {
        let sessions = self.sessions.lock().expect("session lock poisoned");
        sessions.values().cloned().collect()
    }

    /// Remove every session. Used by operator tooling and tests.
    pub fn clear_all(&self) -> Result<(), SessionError> {
        let mut sessions = self.sessions.lock().expect("session lock poisoned");
        sessions.clear();
        self.save_to_disk(&sessions)
    }
}
