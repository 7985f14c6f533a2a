//! API Error Handling
//!
//! Unified error types and conversion for API responses.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};

use crate::service::{approval_service, execution_service, pipeline_service};

/// API error type
#[derive(Debug)]
pub enum ApiError {
    NotFound(String),
    BadRequest(String),
    Conflict(String),
    InternalError(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, msg),
            ApiError::InternalError(msg) => {
                tracing::error!("Internal error: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, msg)
            }
        };

        (status, Json(serde_json::json!({ "error": message }))).into_response()
    }
}

impl From<pipeline_service::PipelineError> for ApiError {
    fn from(err: pipeline_service::PipelineError) -> Self {
        use pipeline_service::PipelineError;
        match err {
            PipelineError::NotFound(id) => ApiError::NotFound(format!("Pipeline {} not found", id)),
            PipelineError::Invalid(e) => ApiError::BadRequest(e.to_string()),
            PipelineError::Conflict(msg) => ApiError::Conflict(msg),
        }
    }
}

impl From<execution_service::ExecutionError> for ApiError {
    fn from(err: execution_service::ExecutionError) -> Self {
        use execution_service::ExecutionError;
        match err {
            ExecutionError::NotFound(id) => ApiError::NotFound(format!("Execution {} not found", id)),
            ExecutionError::PipelineNotFound(id) => {
                ApiError::NotFound(format!("Pipeline {} not found", id))
            }
            ExecutionError::InvalidRequest(msg) => ApiError::BadRequest(msg),
            ExecutionError::NotActive(id) => {
                ApiError::Conflict(format!("Execution {} is not in progress", id))
            }
            ExecutionError::Internal(msg) => ApiError::InternalError(msg),
        }
    }
}

impl From<approval_service::ApprovalError> for ApiError {
    fn from(err: approval_service::ApprovalError) -> Self {
        use approval_service::ApprovalError;
        match err {
            ApprovalError::ExecutionNotFound(id) => {
                ApiError::NotFound(format!("Execution {} not found", id))
            }
            e @ ApprovalError::GateNotFound { .. } => ApiError::NotFound(e.to_string()),
            ApprovalError::AlreadyResolved(e) => ApiError::Conflict(e.to_string()),
            ApprovalError::InvalidRequest(msg) => ApiError::BadRequest(msg),
            ApprovalError::Internal(msg) => ApiError::InternalError(msg),
        }
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
