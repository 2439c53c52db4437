//! API error types and HTTP status mapping.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;

use crate::scheduler::SchedulerError;
use crate::storage::StorageError;
use crate::workflow::WorkflowError;

/// API error response body.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

/// API error type that can be converted to HTTP responses.
#[derive(Debug)]
pub enum ApiError {
    /// The request was rejected before anything changed.
    BadRequest(String),
    /// Resource not found.
    NotFound(String),
    /// Request conflicts with the resource state (e.g. disabled workflow).
    Conflict(String),
    /// The operation ran and failed (e.g. workflow aborted).
    Unprocessable(String),
    /// Internal server error.
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, "CONFLICT", msg),
            ApiError::Unprocessable(msg) => {
                (StatusCode::UNPROCESSABLE_ENTITY, "WORKFLOW_ABORTED", msg)
            }
            ApiError::Internal(msg) => {
                tracing::error!(error = %msg, "Request failed");
                (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", msg)
            }
        };

        let body = ErrorResponse {
            error: message,
            code: code.to_string(),
        };

        (status, Json(body)).into_response()
    }
}

impl From<SchedulerError> for ApiError {
    fn from(err: SchedulerError) -> Self {
        match err {
            SchedulerError::NotFound(id) => ApiError::NotFound(format!("task not found: {}", id)),
            SchedulerError::Storage(e) => e.into(),
            e @ (SchedulerError::Validation(_)
            | SchedulerError::InvalidSchedule(_)
            | SchedulerError::PastSchedule { .. }
            | SchedulerError::IntervalTooSmall { .. }) => ApiError::BadRequest(e.to_string()),
        }
    }
}

impl From<WorkflowError> for ApiError {
    fn from(err: WorkflowError) -> Self {
        match err {
            WorkflowError::Validation(e) => ApiError::BadRequest(e.to_string()),
            e @ (WorkflowError::NotFound(_) | WorkflowError::TemplateNotFound(_)) => {
                ApiError::NotFound(e.to_string())
            }
            e @ WorkflowError::Disabled(_) => ApiError::Conflict(e.to_string()),
            e @ WorkflowError::Aborted { .. } => ApiError::Unprocessable(e.to_string()),
            WorkflowError::Storage(e) => e.into(),
        }
    }
}

impl From<StorageError> for ApiError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::NotFound(msg) => ApiError::NotFound(msg),
            StorageError::DuplicateKey(msg) => ApiError::Conflict(msg),
            _ => ApiError::Internal(err.to_string()),
        }
    }
}
