//! Log access subsystem: index, capped reads, search, and access policy
//! (spec.md §4.7).

/// Task→container / thread→task index, mtime-cached.
pub mod index;
/// Access policy: task/container self-scoping, search scope.
pub mod policy;
/// Capped reads and the search pattern DoS guard.
pub mod reader;

pub use index::{LogIndex, LogIndexEntry};
pub use reader::{validate_search_pattern, LogReadResult, LogReader};
