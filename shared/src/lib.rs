//! Shared data structures and utilities for the task routing system
//!
//! This crate contains the wire contract between producers, workers and the
//! router (endpoint paths, parameter names, response shapes) together with
//! small utilities used by more than one component.

pub mod api;
pub mod defaults;
pub mod utils;

// Re-export commonly used types for convenience
pub use api::{parse_prefer_wait, ClaimResponse};
pub use utils::calculate_backoff_delay;

/// Result type alias used throughout the shared crate
pub type Result<T> = anyhow::Result<T>;

/// Common error types for the task routing system
#[derive(Debug, thiserror::Error)]
pub enum RoutingError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Protocol error: {0}")]
    Protocol(String),
}
