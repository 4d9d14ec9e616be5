//! Error types for the HTTP API

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use gatehouse_core::GatehouseError;
use serde::Serialize;
use thiserror::Error;

/// API error type
#[derive(Debug, Error)]
pub enum ApiError {
    /// Bad request (400)
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// Not found (404)
    #[error("Not found: {0}")]
    NotFound(String),

    /// Internal server error (500)
    #[error("Internal error: {0}")]
    Internal(String),

    /// Service unavailable (503)
    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),

    /// Gatehouse core error
    #[error("Gatehouse error: {0}")]
    Gatehouse(#[from] GatehouseError),
}

/// API result type
pub type ApiResult<T> = Result<T, ApiError>;

/// Error response body
#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<serde_json::Value>,
}

impl ApiError {
    fn parts(self) -> (StatusCode, &'static str, String, Option<serde_json::Value>) {
        match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "bad_request", msg, None),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, "not_found", msg, None),
            ApiError::Internal(msg) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal_error",
                msg,
                None,
            ),
            ApiError::ServiceUnavailable(msg) => (
                StatusCode::SERVICE_UNAVAILABLE,
                "service_unavailable",
                msg,
                None,
            ),
            ApiError::Gatehouse(e) => match e {
                GatehouseError::TargetNotFound(_) => {
                    (StatusCode::NOT_FOUND, "target_not_found", e.to_string(), None)
                }
                GatehouseError::StoreUnavailable(_) => (
                    StatusCode::SERVICE_UNAVAILABLE,
                    "store_unavailable",
                    e.to_string(),
                    None,
                ),
                GatehouseError::ParseError(_) | GatehouseError::InvalidDescriptor(_) => {
                    (StatusCode::BAD_REQUEST, "invalid_request", e.to_string(), None)
                }
                GatehouseError::FieldValidationFailed(ref errors) => {
                    let details = serde_json::to_value(errors).ok();
                    (
                        StatusCode::UNPROCESSABLE_ENTITY,
                        "validation_failed",
                        e.to_string(),
                        details,
                    )
                }
                other => (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "engine_error",
                    format!("Authorization engine error: {}", other),
                    None,
                ),
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_type, message, details) = self.parts();

        let body = Json(ErrorResponse {
            error: error_type.to_string(),
            message,
            details,
        });

        (status, body).into_response()
    }
}
