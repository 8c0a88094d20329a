//! API types and structures for producer/worker/router communication
//!
//! This module defines the endpoint paths, query parameter names and response
//! types used by the REST API between task producers, workers and the router.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

/// Response body for GET /task/get
///
/// Returned to a worker when a queued task has been assigned to it. The
/// payload is the producer's JSON value, passed through unchanged.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ClaimResponse {
    pub task_type: String,
    pub task_id: String,
    pub payload: serde_json::Value,
}

/// HTTP headers used by the task retrieval protocol
pub mod headers {
    /// RFC 7240 preference header carrying the long-poll wait budget
    pub const PREFER: &str = "Prefer";
}

/// Query parameter names
pub mod params {
    pub const TASK_TYPE: &str = "taskType";
    pub const TASK_ID: &str = "taskId";
}

/// API endpoint paths
pub mod endpoints {
    pub const TASK_RUN: &str = "/task/run";
    pub const TASK_GET: &str = "/task/get";
    pub const TASK_HEARTBEAT: &str = "/task/heartbeat";
    pub const RESULT_SET: &str = "/result/set";
}

/// Parse the `Prefer` header of a task retrieval request (RFC 7240).
///
/// The only recognized form is `wait=<non-negative integer>`, the number of
/// seconds the router may hold the request open while waiting for work.
/// Any other directive is rejected.
pub fn parse_prefer_wait(value: &str) -> crate::Result<u64> {
    static PREFER_WAIT: OnceLock<Regex> = OnceLock::new();
    let pattern = PREFER_WAIT.get_or_init(|| {
        Regex::new(r"^wait=(\d+)$").expect("invalid Prefer header pattern")
    });

    let captures = pattern.captures(value).ok_or_else(|| {
        crate::RoutingError::Validation(format!("Malformed Prefer header: '{}'", value))
    })?;

    captures[1].parse::<u64>().map_err(|e| {
        crate::RoutingError::Validation(format!("Malformed Prefer header: '{}': {}", value, e))
            .into()
    })
}
