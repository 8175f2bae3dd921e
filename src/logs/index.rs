//! Log index: task→container and thread→task lookups, cached and
//! invalidated on the index file's mtime (spec.md §4.7). Ground truth:
//! `examples/original_source/gateway-sidecar/tests/test_log_endpoints.py::TestLogIndex`.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use std::time::SystemTime;

use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::errors::LogError;

/// One entry in the log index file.
#[derive(Debug, Clone, Deserialize)]
pub struct LogIndexEntry {
    /// Container the log file belongs to.
    pub container_id: String,
    /// Task the log file belongs to.
    pub task_id: String,
    /// Thread timestamp, if the entry is associated with a Slack-style
    /// thread.
    pub thread_ts: Option<String>,
    /// Path to the underlying log file.
    pub log_file: PathBuf,
    /// When the entry was recorded.
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
struct IndexFile {
    entries: Vec<LogIndexEntry>,
}

struct Cache {
    entries: Vec<LogIndexEntry>,
    mtime: Option<SystemTime>,
}

/// Loads and caches `log-index.json`, invalidated on file mtime change.
pub struct LogIndex {
    path: PathBuf,
    cache: RwLock<Cache>,
}

impl std::fmt::Debug for LogIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogIndex").field("path", &self.path).finish()
    }
}

impl LogIndex {
    /// Construct a log index backed by `path`. A missing file is treated as
    /// an empty index, not an error.
    #[must_use]
    pub fn new(path: PathBuf) -> Self {
        Self { path, cache: RwLock::new(Cache { entries: Vec::new(), mtime: None }) }
    }

    fn refresh(&self) -> Result<(), LogError> {
        let metadata = match std::fs::metadata(&self.path) {
            Ok(m) => m,
            Err(_) => return Ok(()),
        };
        let mtime = metadata.modified().map_err(LogError::Io)?;

        {
            let cache = self.cache.read().expect("log index lock poisoned");
            if cache.mtime == Some(mtime) {
                return Ok(());
            }
        }

        let content = std::fs::read_to_string(&self.path).map_err(LogError::Io)?;
        let parsed: IndexFile =
            serde_json::from_str(&content).map_err(|e| LogError::IndexCorrupted(e.to_string()))?;

        let mut cache = self.cache.write().expect("log index lock poisoned");
        cache.entries = parsed.entries;
        cache.mtime = Some(mtime);
        Ok(())
    }

    /// The container id owning `task_id`, if known.
    pub fn get_container_for_task(&self, task_id: &str) -> Result<Option<String>, LogError> {
        self.refresh()?;
        let cache = self.cache.read().expect("log index lock poisoned");
        Ok(cache
            .entries
            .iter()
            .find(|e| e.task_id == task_id)
            .map(|e| e.container_id.clone()))
    }

    /// The task id owning `thread_ts`, if known.
    pub fn get_task_for_thread(&self, thread_ts: &str) -> Result<Option<String>, LogError> {
        self.refresh()?;
        let cache = self.cache.read().expect("log index lock poisoned");
        Ok(cache
            .entries
            .iter()
            .find(|e| e.thread_ts.as_deref() == Some(thread_ts))
            .map(|e| e.task_id.clone()))
    }

    /// List entries, optionally filtered to one container.
    pub fn list_entries(&self, container_id: Option<&str>) -> Result<Vec<LogIndexEntry>, LogError> {
        self.refresh()?;
        let cache = self.cache.read().expect("log index lock poisoned");
        Ok(cache
            .entries
            .iter()
            .filter(|e| container_id.is_none_or(|c| e.container_id == c))
            .cloned()
            .collect())
    }

    /// Path of the index file this instance watches.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}
