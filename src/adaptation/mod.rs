//! ICAP-like request-adaptation protocol and server (spec.md §4.5).

/// Frame parsing and response building.
pub mod protocol;
/// Per-connection accept loop and dispatch.
pub mod server;

pub use server::{run, AdaptationState};
