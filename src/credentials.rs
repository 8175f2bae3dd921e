//! Credential store (spec.md §4.1): watches a file's mtime, reparses on
//! change, and exposes the current `(header-name, header-value)` pair for
//! the adaptation server to inject. Grounded in `src/proxy/rules.rs`'s
//! `Rule`/`AuthEncoding` pattern, narrowed to the single configured
//! upstream host.

use std::path::PathBuf;
use std::sync::RwLock;
use std::time::SystemTime;

use crate::config::{CredentialConfig, CredentialKind};

/// A header-shaped credential ready for injection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credential {
    /// The header name to set (e.g. `x-api-key`).
    pub header_name: String,
    /// The header value to set.
    pub header_value: String,
    /// Which kind of credential this is, as resolved from configuration.
    pub kind: CredentialKind,
}

struct Loaded {
    credential: Option<Credential>,
    mtime: Option<SystemTime>,
}

/// Watches `source_path` and exposes the most recently successfully parsed
/// credential. A transient bad write never clears a working credential:
/// a reparse failure logs a warning and the previous value is kept.
pub struct CredentialStore {
    source_path: PathBuf,
    header_name: String,
    kind: CredentialKind,
    state: RwLock<Loaded>,
}

impl std::fmt::Debug for CredentialStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialStore")
            .field("source_path", &self.source_path)
            .field("header_name", &self.header_name)
            .finish_non_exhaustive()
    }
}

impl CredentialStore {
    /// Construct a credential store from configuration. Performs an initial
    /// load; if the source file does not yet exist, `current()` returns
    /// `None` until it appears.
    #[must_use]
    pub fn new(config: &CredentialConfig) -> Self {
        let store = Self {
            source_path: config.source_path.clone(),
            header_name: config.header_name.clone(),
            kind: config.kind,
            state: RwLock::new(Loaded { credential: None, mtime: None }),
        };
        store.refresh_if_changed();
        store
    }

    /// The current credential, if one has been successfully loaded.
    #[must_use]
    pub fn current(&self) -> Option<Credential> {
        self.state.read().expect("credential lock poisoned").credential.clone()
    }

    /// Re-stat the source file; if its mtime changed since the last
    /// successful load, reparse and swap in the new value. Returns whether
    /// a reparse happened.
    pub fn refresh_if_changed(&self) -> bool {
        let metadata = match std::fs::metadata(&self.source_path) {
            Ok(m) => m,
            Err(_) => return false,
        };
        let Ok(mtime) = metadata.modified() else {
            return false;
        };

        {
            let state = self.state.read().expect("credential lock poisoned");
            if state.mtime == Some(mtime) {
                return false;
            }
        }

        match std::fs::read_to_string(&self.source_path) {
            Ok(raw) => {
                let value = raw.trim().to_string();
                if value.is_empty() {
                    tracing::warn!(path = %self.source_path.display(), "credential file is empty, keeping previous value");
                    return false;
                }
                let mut state = self.state.write().expect("credential lock poisoned");
                state.credential = Some(Credential {
                    header_name: self.header_name.clone(),
                    header_value: value,
                    kind: self.kind,
                });
                state.mtime = Some(mtime);
                true
            }
            Err(err) => {
                tracing::warn!(path = %self.source_path.display(), error = %err, "failed to read credential file, keeping previous value");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(path: PathBuf) -> CredentialConfig {
        CredentialConfig {
            source_path: path,
            kind: CredentialKind::ApiKey,
            header_name: "x-api-key".to_string(),
        }
    }

    #[test]
    fn missing_file_yields_no_credential() {
        let store = CredentialStore::new(&config(PathBuf::from("/nonexistent/credential")));
        assert!(store.current().is_none());
    }

    #[test]
    fn loads_credential_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cred");
        std::fs::write(&path, "sk-test-value").unwrap();

        let store = CredentialStore::new(&config(path));
        let credential = store.current().unwrap();
        assert_eq!(credential.header_value, "sk-test-value");
        assert_eq!(credential.header_name, "x-api-key");
    }

    #[test]
    fn reparses_on_mtime_change() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cred");
        std::fs::write(&path, "first-value").unwrap();

        let store = CredentialStore::new(&config(path.clone()));
        assert_eq!(store.current().unwrap().header_value, "first-value");

        std::thread::sleep(std::time::Duration::from_millis(20));
        std::fs::write(&path, "second-value").unwrap();
        assert!(store.refresh_if_changed());
        assert_eq!(store.current().unwrap().header_value, "second-value");
    }

    #[test]
    fn keeps_previous_value_when_file_becomes_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cred");
        std::fs::write(&path, "good-value").unwrap();
        let store = CredentialStore::new(&config(path.clone()));

        std::thread::sleep(std::time::Duration::from_millis(20));
        std::fs::write(&path, "").unwrap();
        store.refresh_if_changed();
        assert_eq!(store.current().unwrap().header_value, "good-value");
    }
}
