//! Unified API error handling with structured responses (spec §7).
//!
//! Every failure body is `{"detail": <string|object>}`: a plain string for
//! simple categories, a structured object for schema validation failures so
//! clients can render per-field errors.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use serde_json::json;
use thiserror::Error;
use tracing::{error, warn};

use crate::schema::ValidationError;

/// The agent, schema, and violations behind a 400 on a schema-checked
/// payload — enough for a client to render per-field errors and see exactly
/// what it was checked against.
#[derive(Debug)]
pub struct SchemaValidationFailure {
    pub agent_name: String,
    pub schema: serde_json::Value,
    pub errors: Vec<ValidationError>,
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    BadRequest(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("parameter validation failed")]
    ParameterValidation(SchemaValidationFailure),

    #[error("output_schema validation failed")]
    OutputSchemaValidation(SchemaValidationFailure),

    #[error("{0}")]
    ServiceUnavailable(String),

    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::BadRequest(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    fn status_code(&self) -> StatusCode {
        match self {
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::ParameterValidation(_) | Self::OutputSchemaValidation(_) => StatusCode::BAD_REQUEST,
            Self::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn detail(&self) -> serde_json::Value {
        match self {
            Self::ParameterValidation(failure) => json!({
                "error": "parameter_validation_failed",
                "agent_name": failure.agent_name,
                "message": "parameter validation failed",
                "validation_errors": failure.errors,
                "parameters_schema": failure.schema,
            }),
            Self::OutputSchemaValidation(failure) => json!({
                "error": "output_schema_validation_failed",
                "agent_name": failure.agent_name,
                "message": "output_schema validation failed",
                "validation_errors": failure.errors,
                "output_schema": failure.schema,
            }),
            other => json!(other.to_string()),
        }
    }

    /// Categorize a generic internal error by message, the way repository/
    /// service code's bare `anyhow::Error`s surface at the HTTP boundary.
    pub fn from_anyhow(err: anyhow::Error) -> Self {
        let msg = err.to_string();
        let msg_lower = msg.to_lowercase();

        if msg_lower.contains("not found") {
            ApiError::NotFound(msg)
        } else if msg_lower.contains("already exists") || msg_lower.contains("already named") {
            ApiError::Conflict(msg)
        } else if msg_lower.contains("invalid")
            || msg_lower.contains("must be")
            || msg_lower.contains("cannot be")
            || msg_lower.contains("has not finished")
        {
            ApiError::BadRequest(msg)
        } else {
            ApiError::Internal(msg)
        }
    }
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    detail: serde_json::Value,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        match &self {
            Self::Internal(msg) => error!(error = %msg, "internal API error"),
            Self::ServiceUnavailable(msg) => warn!(error = %msg, "service unavailable"),
            _ => tracing::debug!(error = %self, "client error"),
        }

        let body = ErrorBody { detail: self.detail() };
        (status, Json(body)).into_response()
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        Self::from_anyhow(err)
    }
}

impl From<crate::auth::AuthError> for ApiError {
    fn from(err: crate::auth::AuthError) -> Self {
        ApiError::Unauthorized(err.to_string())
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn categorizes_not_found() {
        let err = anyhow::anyhow!("session not found: ses_abc");
        assert!(matches!(ApiError::from_anyhow(err), ApiError::NotFound(_)));
    }

    #[test]
    fn categorizes_conflict() {
        let err = anyhow::anyhow!("session 'ses_abc' already exists");
        assert!(matches!(ApiError::from_anyhow(err), ApiError::Conflict(_)));
    }

    #[test]
    fn categorizes_bad_request() {
        let err = anyhow::anyhow!("session 'ses_abc' has not finished yet");
        assert!(matches!(ApiError::from_anyhow(err), ApiError::BadRequest(_)));
    }

    #[test]
    fn defaults_to_internal() {
        let err = anyhow::anyhow!("unexpected sqlite error");
        assert!(matches!(ApiError::from_anyhow(err), ApiError::Internal(_)));
    }

    #[test]
    fn status_codes_match_categories() {
        assert_eq!(ApiError::not_found("").status_code(), StatusCode::NOT_FOUND);
        assert_eq!(ApiError::conflict("").status_code(), StatusCode::CONFLICT);
        assert_eq!(ApiError::bad_request("").status_code(), StatusCode::BAD_REQUEST);
    }
}
