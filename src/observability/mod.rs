//! Observability infrastructure for the gateway.
//!
//! This module provides:
//! - Correlation ID tracking for operations
//! - Structured logging utilities
//! - Error context helpers

pub mod correlation;

pub use correlation::{CorrelationId, OperationContext};
