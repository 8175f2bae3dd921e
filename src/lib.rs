//! Sandbox gateway: outbound-traffic mediation for sandboxed agent containers.

#![warn(missing_debug_implementations)]
#![warn(missing_docs)]
#![warn(rust_2018_idioms)]
#![warn(unreachable_pub)]
#![warn(elided_lifetimes_in_paths)]
#![warn(missing_copy_implementations)]
#![deny(unused_must_use)]
#![deny(unsafe_op_in_unsafe_fn)]

/// ICAP-like request-adaptation protocol and server.
pub mod adaptation;
/// Control-plane HTTP API: auth, rate limiting, policy checks, audit.
pub mod api;
/// Append-only JSON-lines audit sink.
pub mod audit;
/// Gateway configuration loading.
pub mod config;
/// Credential source watching and header injection.
pub mod credentials;
/// Structured error types for each gateway component.
pub mod errors;
/// Launcher-side session client.
pub mod gateway_client;
/// Log access subsystem: index, capped reads, search, and access policy.
pub mod logs;
/// Correlation-id and operation-context plumbing for tracing spans.
pub mod observability;
/// Policy engine: branch/PR ownership, merge-always-deny.
pub mod policy;
/// Per-(session, operation class) rate limiting.
pub mod rate_limiter;
/// Session table: registration, validation, heartbeat, pruning.
pub mod session;
/// Bounded git/gh subprocess invocation.
pub mod subprocess;
