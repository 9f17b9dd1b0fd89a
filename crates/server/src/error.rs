// crates/server/src/error.rs
use async_report_jobs::{JobId, JobStatus, RegistryError};
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

/// Structured JSON error response for API errors
#[derive(Debug, Serialize)]
#[cfg_attr(test, derive(serde::Deserialize))]
pub struct ErrorResponse {
    pub error: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            details: None,
        }
    }

    pub fn with_details(error: impl Into<String>, details: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            details: Some(details.into()),
        }
    }
}

/// API error types that map to HTTP status codes
#[derive(Debug, Error)]
pub enum ApiError {
    /// Unknown, malformed, or not owned by the caller. All three answer the
    /// same way so job ids cannot be probed.
    #[error("Job not found: {0}")]
    JobNotFound(String),

    #[error("Operation not applicable to job {id} in status {status}")]
    NotApplicable { id: JobId, status: JobStatus },

    #[error("Scheduling location support is disabled")]
    FeatureDisabled,

    /// Content that existed once but can no longer be delivered.
    #[error("Content gone for job {id}: {reason}")]
    Gone { id: JobId, reason: &'static str },

    #[error("Internal server error: {0}")]
    Internal(String),

    #[error("Bad request: {0}")]
    BadRequest(String),
}

impl From<RegistryError> for ApiError {
    fn from(err: RegistryError) -> Self {
        match err {
            RegistryError::NotFound(id) => ApiError::JobNotFound(id.to_string()),
            RegistryError::NotApplicable { id, status } => ApiError::NotApplicable { id, status },
            RegistryError::FeatureDisabled => ApiError::FeatureDisabled,
            RegistryError::Canceled(id) => ApiError::Gone {
                id,
                reason: "job was canceled",
            },
            RegistryError::Failed { id, .. } => ApiError::Gone {
                id,
                reason: "job failed",
            },
            RegistryError::AlreadyConsumed(id) => ApiError::Gone {
                id,
                reason: "content was already retrieved",
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_response) = match &self {
            ApiError::JobNotFound(id) => {
                tracing::debug!(job_id = %id, "Job not found");
                (StatusCode::NOT_FOUND, ErrorResponse::new("Job not found"))
            }
            ApiError::NotApplicable { id, status } => {
                tracing::debug!(job_id = %id, status = %status, "Operation not applicable");
                (
                    StatusCode::NOT_FOUND,
                    ErrorResponse::with_details(
                        "Operation not applicable",
                        format!("Job status: {status}"),
                    ),
                )
            }
            ApiError::FeatureDisabled => {
                tracing::debug!("Scheduling location requested while disabled");
                (
                    StatusCode::NOT_FOUND,
                    ErrorResponse::new("Scheduling location support is disabled"),
                )
            }
            ApiError::Gone { id, reason } => {
                tracing::debug!(job_id = %id, reason, "Content gone");
                (
                    StatusCode::GONE,
                    ErrorResponse::with_details("Content no longer available", *reason),
                )
            }
            ApiError::Internal(msg) => {
                tracing::error!(message = %msg, "Internal server error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ErrorResponse::new("Internal server error"),
                )
            }
            ApiError::BadRequest(msg) => {
                tracing::warn!(message = %msg, "Bad request");
                (
                    StatusCode::BAD_REQUEST,
                    ErrorResponse::with_details("Bad request", msg.clone()),
                )
            }
        };

        (status, Json(error_response)).into_response()
    }
}

/// Result type alias for API handlers
pub type ApiResult<T> = Result<T, ApiError>;
