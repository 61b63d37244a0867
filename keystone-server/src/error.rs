//! API error handling module
//!
//! Provides a unified error type for all API endpoints. This is the only place where
//! lifecycle error kinds are mapped to HTTP status codes.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use keystone_core::KeystoneError;
use serde::Serialize;
use thiserror::Error;
use utoipa::ToSchema;

/// API error type with structured variants for different error categories
#[derive(Debug, Error)]
pub enum ApiError {
    /// Bad request - client provided invalid input
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// Unauthorized - missing or invalid identity token
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Internal server error - unexpected server-side failure
    #[error("Internal error: {0}")]
    Internal(String),

    /// Service unavailable - required service is not configured or available
    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),

    /// Lifecycle error from the ceremony engine
    #[error("Keystone error: {0}")]
    Keystone(#[from] KeystoneError),
}

/// Error body returned by every endpoint
#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorResponse {
    /// Human-readable message, sanitized for clients
    pub error: String,
    /// Stable code for programmatic handling
    #[schema(example = "INVALID_INPUT")]
    pub code: String,
}

impl ApiError {
    /// Create a bad request error
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::BadRequest(message.into())
    }

    /// Create an unauthorized error
    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::Unauthorized(message.into())
    }

    /// Create an internal server error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Create a service unavailable error
    pub fn service_unavailable(message: impl Into<String>) -> Self {
        Self::ServiceUnavailable(message.into())
    }

    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Keystone(ref e) => match e {
                // Absent ceremonies and credentials look like any other bad request
                KeystoneError::InvalidInput(_)
                | KeystoneError::NotFound(_)
                | KeystoneError::Expired { .. } => StatusCode::BAD_REQUEST,

                KeystoneError::VerificationFailed(_) => StatusCode::UNAUTHORIZED,

                // Replays, duplicate registrations and lost races
                KeystoneError::ConditionalCheckFailed(_)
                | KeystoneError::CloneDetected { .. } => StatusCode::CONFLICT,

                KeystoneError::Cancelled(_) => StatusCode::REQUEST_TIMEOUT,
                KeystoneError::Transient(_) => StatusCode::SERVICE_UNAVAILABLE,
                KeystoneError::Unresolved(_) | KeystoneError::Internal(_) => {
                    StatusCode::INTERNAL_SERVER_ERROR
                }
            },
        }
    }

    /// Get the error code for programmatic error handling
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::BadRequest(_) => "INVALID_INPUT",
            Self::Unauthorized(_) => "UNAUTHORIZED",
            Self::Internal(_) => "INTERNAL_ERROR",
            Self::ServiceUnavailable(_) => "SERVICE_UNAVAILABLE",
            Self::Keystone(ref e) => match e {
                KeystoneError::InvalidInput(_) => "INVALID_INPUT",
                KeystoneError::NotFound(_) => "NOT_FOUND",
                KeystoneError::Expired { .. } => "CEREMONY_EXPIRED",
                KeystoneError::ConditionalCheckFailed(_) => "CONFLICT",
                KeystoneError::CloneDetected { .. } => "POSSIBLE_CLONE",
                KeystoneError::VerificationFailed(_) => "VERIFICATION_FAILED",
                KeystoneError::Unresolved(_) => "MISCONFIGURED",
                KeystoneError::Transient(_) => "STORE_UNAVAILABLE",
                KeystoneError::Cancelled(_) => "TIMEOUT",
                KeystoneError::Internal(_) => "INTERNAL_ERROR",
            },
        }
    }

    /// Get sanitized error message for client response
    fn client_message(&self) -> String {
        match self {
            Self::Internal(_) => "Internal server error".to_string(),
            Self::Keystone(ref e) => match e {
                KeystoneError::InvalidInput(msg) => format!("Invalid input: {msg}"),
                KeystoneError::NotFound(_) => "Unknown ceremony or credential".to_string(),
                KeystoneError::Expired { .. } => "Ceremony expired".to_string(),
                KeystoneError::ConditionalCheckFailed(_) => {
                    "Request conflicts with the current state".to_string()
                }
                KeystoneError::CloneDetected { .. } => {
                    "Signature counter did not advance".to_string()
                }
                KeystoneError::VerificationFailed(_) => "Verification failed".to_string(),
                KeystoneError::Unresolved(_) | KeystoneError::Internal(_) => {
                    "Internal server error".to_string()
                }
                KeystoneError::Transient(_) => "Storage temporarily unavailable".to_string(),
                KeystoneError::Cancelled(_) => "Request timed out".to_string(),
            },
            // For other errors, use the Display message
            _ => self.to_string(),
        }
    }

    /// Get the error category for logging
    fn error_category(&self) -> &'static str {
        match self {
            Self::BadRequest(_) => "bad_request",
            Self::Unauthorized(_) => "unauthorized",
            Self::Internal(_) => "internal",
            Self::ServiceUnavailable(_) => "service_unavailable",
            Self::Keystone(_) => "keystone",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let category = self.error_category();
        let code = self.error_code();
        let internal_message = self.to_string();
        let client_message = self.client_message();

        // Log based on severity, always including internal details
        if status.is_server_error() {
            tracing::error!(
                status = %status,
                category = category,
                code = code,
                error = %internal_message,
                "Server error"
            );
        } else if matches!(self, Self::Keystone(KeystoneError::CloneDetected { .. })) {
            tracing::warn!(
                status = %status,
                category = category,
                code = code,
                error = %internal_message,
                "Possible cloned authenticator"
            );
        } else {
            tracing::warn!(
                status = %status,
                category = category,
                code = code,
                error = %internal_message,
                "Client error"
            );
        }

        // All error responses include a `code` field for programmatic error handling
        let body = ErrorResponse {
            error: client_message,
            code: code.to_string(),
        };

        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_failures_are_bad_requests() {
        let err = ApiError::from(KeystoneError::not_found("ceremony not found"));
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(err.error_code(), "NOT_FOUND");
        assert_eq!(err.client_message(), "Unknown ceremony or credential");
    }

    #[test]
    fn test_status_mapping() {
        let cases = [
            (KeystoneError::invalid_input("x"), StatusCode::BAD_REQUEST),
            (KeystoneError::Expired { expired_at: 1 }, StatusCode::BAD_REQUEST),
            (KeystoneError::conflict("x"), StatusCode::CONFLICT),
            (
                KeystoneError::CloneDetected {
                    credential_id: "c".into(),
                    stored: 2,
                    reported: 1,
                },
                StatusCode::CONFLICT,
            ),
            (
                KeystoneError::VerificationFailed("x".into()),
                StatusCode::UNAUTHORIZED,
            ),
            (
                KeystoneError::Unresolved("x".into()),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
            (
                KeystoneError::Transient("x".into()),
                StatusCode::SERVICE_UNAVAILABLE,
            ),
            (
                KeystoneError::Cancelled("x".into()),
                StatusCode::REQUEST_TIMEOUT,
            ),
        ];
        for (err, status) in cases {
            assert_eq!(ApiError::from(err).status_code(), status);
        }
    }

    #[test]
    fn test_internal_details_are_not_returned() {
        let err = ApiError::from(KeystoneError::Internal("table keystone-users-prod".into()));
        assert!(!err.client_message().contains("keystone-users-prod"));
        let err = ApiError::from(KeystoneError::Unresolved("credentials".into()));
        assert_eq!(err.client_message(), "Internal server error");
    }
}
