//! REST API implementation for the task router
//!
//! This module provides the four HTTP endpoints producers and workers use:
//! task submission, task retrieval with long polling, heartbeating, and
//! result delivery.
// This module uses the `axum` web framework to build the API. Each public
// function corresponds to an API endpoint and is responsible for parsing
// and validating the request, invoking one broker operation, and
// translating failures into status codes. Client disconnects drop the
// handler future, which is how producer cancellation enters the system.

use axum::{
    extract::{DefaultBodyLimit, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use shared::api::{endpoints, headers, params, parse_prefer_wait, ClaimResponse};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::broker::{Broker, BrokerError};

/// Application state shared across all API handlers
#[derive(Clone)]
pub struct AppState {
    /// The broker sequencing the task lifecycle
    pub broker: Arc<Broker>,
}

impl AppState {
    pub fn new(broker: Arc<Broker>) -> Self {
        Self { broker }
    }
}

/// Creates the main API router and defines all the application's routes.
/// This function is called once at server startup to build the routing tree.
pub fn create_router(state: AppState) -> Router {
    // Maximum request body size: 10MB
    // Payloads and results are opaque JSON of unknown size; cap them so a
    // single request cannot exhaust memory.
    const MAX_REQUEST_SIZE: usize = 10 * 1024 * 1024;

    Router::new()
        .route(endpoints::TASK_RUN, post(handle_task_run))
        .route(endpoints::TASK_GET, get(handle_task_get))
        .route(endpoints::TASK_HEARTBEAT, post(handle_task_heartbeat))
        .route(endpoints::RESULT_SET, post(handle_result_set))
        .layer(DefaultBodyLimit::max(MAX_REQUEST_SIZE))
        .with_state(state)
}

/// The handler for the task submission endpoint (producer -> router).
///
/// Enqueues the task and suspends until a worker delivers the result, which
/// becomes the response body. If the producer disconnects while waiting,
/// this future is dropped and the broker withdraws the task.
async fn handle_task_run(
    State(state): State<AppState>,
    Query(query): Query<HashMap<String, String>>,
    Json(payload): Json<serde_json::Value>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let task_type = query
        .get(params::TASK_TYPE)
        .ok_or(ApiError::MissingTaskType)?;

    info!(task_type = %task_type, "Producer submitted task");

    match state.broker.submit(task_type, payload).await {
        Some(result) => Ok(Json(result)),
        // the result promise only closes without a value during shutdown
        None => Err(ApiError::Internal(
            "result promise closed before a result was delivered".to_string(),
        )),
    }
}

/// The handler for the task retrieval endpoint (worker -> router).
///
/// Long-polls the pending queues for up to the wait budget carried in the
/// `Prefer: wait=<seconds>` header (RFC 7240). The `taskType` query
/// parameter is repeatable; the first listed type wins when several have
/// work available.
async fn handle_task_get(
    State(state): State<AppState>,
    Query(query): Query<Vec<(String, String)>>,
    header_map: HeaderMap,
) -> Result<Response, ApiError> {
    let wait_budget = match header_map.get(headers::PREFER) {
        None => return Err(ApiError::MissingPreferHeader),
        Some(value) => {
            let value = value
                .to_str()
                .map_err(|_| ApiError::MalformedPreferHeader)?;
            parse_prefer_wait(value).map_err(|_| ApiError::MalformedPreferHeader)?
        }
    };

    // collect the repeatable taskType parameter in request order
    let task_types: Vec<String> = query
        .into_iter()
        .filter(|(key, _)| key == params::TASK_TYPE)
        .map(|(_, value)| value)
        .collect();
    if task_types.is_empty() {
        return Err(ApiError::MissingTaskType);
    }

    match state
        .broker
        .claim(&task_types, Duration::from_secs(wait_budget))
        .await
    {
        Ok((assignment_id, task)) => {
            info!(
                assignment_id = %assignment_id,
                task_type = %task.task_type,
                "Task assigned to worker"
            );
            Ok(Json(ClaimResponse {
                task_type: task.task_type.clone(),
                task_id: assignment_id,
                payload: task.payload.clone(),
            })
            .into_response())
        }
        Err(BrokerError::NoWork) => Ok(StatusCode::NO_CONTENT.into_response()),
        Err(error) => Err(ApiError::Internal(error.to_string())),
    }
}

/// The handler for the heartbeat endpoint (worker -> router).
/// Each heartbeat re-arms the assignment's deadline for the full timeout.
async fn handle_task_heartbeat(
    State(state): State<AppState>,
    Query(query): Query<HashMap<String, String>>,
) -> Result<StatusCode, ApiError> {
    let task_id = query.get(params::TASK_ID).ok_or(ApiError::MissingTaskId)?;

    state.broker.heartbeat(task_id).map_err(|error| {
        warn!(task_id = %task_id, error = %error, "Heartbeat for unknown task");
        ApiError::TaskNotFound
    })?;

    Ok(StatusCode::OK)
}

/// The handler for the result delivery endpoint (worker -> router).
///
/// Consumes the assignment and hands the result to the waiting producer. A
/// stale assignment id (timed out or withdrawn) is rejected with 404,
/// telling the worker to abandon the task.
async fn handle_result_set(
    State(state): State<AppState>,
    Query(query): Query<HashMap<String, String>>,
    Json(result): Json<serde_json::Value>,
) -> Result<StatusCode, ApiError> {
    let task_id = query.get(params::TASK_ID).ok_or(ApiError::MissingTaskId)?;

    state.broker.deliver_result(task_id, result).map_err(|error| {
        warn!(task_id = %task_id, error = %error, "Result for unknown task");
        ApiError::TaskNotFound
    })?;

    info!(task_id = %task_id, "Result delivered");
    Ok(StatusCode::OK)
}

/// Custom error types for the API.
/// Using a dedicated enum for API errors allows for consistent error
/// handling and response formatting.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("Missing taskType")]
    MissingTaskType,
    #[error("Missing taskId")]
    MissingTaskId,
    #[error("Missing Prefer header")]
    MissingPreferHeader,
    #[error("Malformed Prefer header")]
    MalformedPreferHeader,
    #[error("Task with taskId not found")]
    TaskNotFound,
    #[error("Internal server error: {0}")]
    Internal(String),
}

/// This implementation allows `ApiError` to be converted into an HTTP
/// response, letting handlers return `Result<_, ApiError>` and have the
/// `Err` variant rendered automatically.
impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match self {
            ApiError::MissingTaskType
            | ApiError::MissingTaskId
            | ApiError::MissingPreferHeader
            | ApiError::MalformedPreferHeader => StatusCode::BAD_REQUEST,
            ApiError::TaskNotFound => StatusCode::NOT_FOUND,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        // The error response body is a JSON object with a consistent structure.
        let body = Json(serde_json::json!({
            "error": status.canonical_reason().unwrap_or("Error"),
            "details": self.to_string()
        }));

        (status, body).into_response()
    }
}
