//! Policy engine: branch/PR ownership, merge-always-deny, and the
//! identity/remote-parsing helpers it depends on (spec.md §4.4).

/// Engine and PR decision logic.
pub mod engine;
/// `GitHubClient` trait and its `gh`-CLI-backed implementation.
pub mod github_client;
/// Remote URL / refspec parsing and agent-identity matching.
pub mod identity;

pub use engine::{PolicyEngine, PolicyResult};
pub use github_client::{GhCliClient, GitHubClient, PrInfo};
pub use identity::AuthMode;
