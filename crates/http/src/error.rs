//! HTTP error responses
//!
//! Maps engine errors onto status codes and the `{"error": {code, message,
//! hint}}` envelope. Domain errors get their proper statuses; only genuinely
//! internal faults surface as 500.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use schemaflow_engine::EngineError;
use serde_json::json;
use thiserror::Error;

/// Result type for API handlers
pub type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error("Invalid request: {message}")]
    BadRequest { message: String },
}

impl ApiError {
    /// Create a bad request error
    pub fn bad_request<T: Into<String>>(message: T) -> Self {
        ApiError::BadRequest {
            message: message.into(),
        }
    }

    /// Get the appropriate HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::Engine(EngineError::Validation(_)) => StatusCode::BAD_REQUEST,
            ApiError::Engine(EngineError::DuplicateId(_)) => StatusCode::CONFLICT,
            ApiError::Engine(EngineError::NotFound(_)) => StatusCode::NOT_FOUND,
            ApiError::Engine(EngineError::Concurrency(_)) => StatusCode::CONFLICT,
            ApiError::Engine(EngineError::Execution(_)) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::Engine(EngineError::Database(_)) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::BadRequest { .. } => StatusCode::BAD_REQUEST,
        }
    }

    /// Get error code for consistent API responses
    pub fn error_code(&self) -> &'static str {
        match self {
            ApiError::Engine(EngineError::Validation(_)) => "VALIDATION_ERROR",
            ApiError::Engine(EngineError::DuplicateId(_)) => "DUPLICATE_MIGRATION",
            ApiError::Engine(EngineError::NotFound(_)) => "RESOURCE_NOT_FOUND",
            ApiError::Engine(EngineError::Concurrency(_)) => "MIGRATION_ALREADY_RUNNING",
            ApiError::Engine(EngineError::Execution(_)) => "EXECUTION_FAILED",
            ApiError::Engine(EngineError::Database(_)) => "DATABASE_ERROR",
            ApiError::BadRequest { .. } => "BAD_REQUEST",
        }
    }

    /// Get error hint for user guidance
    pub fn error_hint(&self) -> Option<&'static str> {
        match self {
            ApiError::Engine(EngineError::Concurrency(_)) => {
                Some("Wait for the in-flight execution to finish, or pass force=true")
            }
            ApiError::Engine(EngineError::Validation(_)) | ApiError::BadRequest { .. } => {
                Some("Check request format and parameters")
            }
            _ => None,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = json!({
            "error": {
                "code": self.error_code(),
                "message": self.to_string(),
                "hint": self.error_hint(),
            }
        });
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn domain_errors_keep_their_status_codes() {
        let cases = [
            (EngineError::validation("bad"), StatusCode::BAD_REQUEST),
            (EngineError::DuplicateId("m1".into()), StatusCode::CONFLICT),
            (EngineError::not_found("gone"), StatusCode::NOT_FOUND),
            (EngineError::Concurrency("m1".into()), StatusCode::CONFLICT),
            (EngineError::execution("boom"), StatusCode::INTERNAL_SERVER_ERROR),
            (EngineError::Database("down".into()), StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (err, status) in cases {
            assert_eq!(ApiError::from(err).status_code(), status);
        }
    }

    #[test]
    fn error_codes_are_stable() {
        assert_eq!(
            ApiError::from(EngineError::DuplicateId("m1".into())).error_code(),
            "DUPLICATE_MIGRATION"
        );
        assert_eq!(
            ApiError::from(EngineError::Concurrency("m1".into())).error_code(),
            "MIGRATION_ALREADY_RUNNING"
        );
        assert_eq!(ApiError::bad_request("nope").error_code(), "BAD_REQUEST");
    }

    #[test]
    fn concurrency_errors_carry_a_hint() {
        let err = ApiError::from(EngineError::Concurrency("m1".into()));
        assert!(err.error_hint().unwrap().contains("force"));
    }
}
