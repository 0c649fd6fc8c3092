//! # API Error Types
//!
//! Structured error type implementing `axum::response::IntoResponse`.
//! Maps lifecycle refusals and store failures to HTTP status codes with
//! JSON bodies carrying a machine-readable code and a message. Internal
//! error details are logged, never returned.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;

use stayguard_core::{LifecycleError, ValidationError};

use crate::service::ServiceError;
use crate::store::StoreError;

/// Structured JSON error response body.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ErrorBody {
    pub error: ErrorDetail,
}

/// Inner error detail.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ErrorDetail {
    /// Machine-readable error code (e.g. "ALREADY_RESOLVED", "NOT_FOUND").
    pub code: String,
    /// Human-readable error message.
    pub message: String,
    /// Additional details, present only for client errors.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

/// Application-level error type that implements [`IntoResponse`] for Axum.
#[derive(Error, Debug)]
pub enum AppError {
    /// The transition is not legal from the current state (409).
    #[error("{0}")]
    InvalidTransition(String),

    /// The entity is already in a terminal state (409).
    #[error("{0}")]
    AlreadyResolved(String),

    /// The invitation's acceptance window has passed (410).
    #[error("{0}")]
    Expired(String),

    /// Resource not found (404).
    #[error("not found: {0}")]
    NotFound(String),

    /// A domain precondition does not hold (422).
    #[error("{0}")]
    PreconditionFailed(String),

    /// Request fields failed validation (422).
    #[error("validation error: {0}")]
    Validation(String),

    /// Request body could not be parsed (400).
    #[error("bad request: {0}")]
    BadRequest(String),

    /// Missing or invalid token (401).
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// Caller may not act on this resource (403).
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// Internal server error (500). Message is logged but not returned to client.
    #[error("internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Return the HTTP status code and machine-readable error code for this error.
    fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            Self::InvalidTransition(_) => (StatusCode::CONFLICT, "INVALID_TRANSITION"),
            Self::AlreadyResolved(_) => (StatusCode::CONFLICT, "ALREADY_RESOLVED"),
            Self::Expired(_) => (StatusCode::GONE, "EXPIRED"),
            Self::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            Self::PreconditionFailed(_) => (StatusCode::UNPROCESSABLE_ENTITY, "PRECONDITION_FAILED"),
            Self::Validation(_) => (StatusCode::UNPROCESSABLE_ENTITY, "VALIDATION_ERROR"),
            Self::BadRequest(_) => (StatusCode::BAD_REQUEST, "BAD_REQUEST"),
            Self::Unauthorized(_) => (StatusCode::UNAUTHORIZED, "UNAUTHORIZED"),
            Self::Forbidden(_) => (StatusCode::FORBIDDEN, "FORBIDDEN"),
            Self::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();

        let message = match &self {
            Self::Internal(_) => "An internal error occurred".to_string(),
            other => other.to_string(),
        };

        if matches!(&self, Self::Internal(_)) {
            tracing::error!(error = %self, "internal server error");
        }

        let body = ErrorBody {
            error: ErrorDetail {
                code: code.to_string(),
                message,
                details: None,
            },
        };

        (status, Json(body)).into_response()
    }
}

impl From<LifecycleError> for AppError {
    fn from(err: LifecycleError) -> Self {
        let message = err.to_string();
        match err {
            LifecycleError::InvalidTransition { .. } => Self::InvalidTransition(message),
            LifecycleError::AlreadyResolved { .. } => Self::AlreadyResolved(message),
            LifecycleError::Expired { .. } => Self::Expired(message),
            LifecycleError::NotFound { entity, id } => Self::NotFound(format!("{entity} {id}")),
            LifecycleError::PreconditionFailed(_) => Self::PreconditionFailed(message),
        }
    }
}

impl From<ValidationError> for AppError {
    fn from(err: ValidationError) -> Self {
        Self::Validation(err.to_string())
    }
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Rejected(e) => e.into(),
            other => Self::Internal(other.to_string()),
        }
    }
}

impl From<ServiceError> for AppError {
    fn from(err: ServiceError) -> Self {
        match err {
            ServiceError::Lifecycle(e) => e.into(),
            ServiceError::Forbidden(msg) => Self::Forbidden(msg),
            ServiceError::Invalid(msg) => Self::Validation(msg),
            ServiceError::Store(e) => e.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::BodyExt;
    use stayguard_core::Timestamp;

    async fn response_parts(err: AppError) -> (StatusCode, ErrorBody) {
        let response = err.into_response();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let body: ErrorBody = serde_json::from_slice(&bytes).unwrap();
        (status, body)
    }

    #[test]
    fn lifecycle_kinds_map_to_distinct_codes() {
        let cases = [
            (
                LifecycleError::InvalidTransition {
                    entity: "stay",
                    from: "OPEN".into(),
                    to: "CANCELLED".into(),
                    reason: "stay has already started".into(),
                },
                StatusCode::CONFLICT,
                "INVALID_TRANSITION",
            ),
            (
                LifecycleError::AlreadyResolved {
                    entity: "stay",
                    id: "s-1".into(),
                    state: "REVOKED".into(),
                },
                StatusCode::CONFLICT,
                "ALREADY_RESOLVED",
            ),
            (
                LifecycleError::Expired {
                    code: "INV-0000ABCD".into(),
                    expired_at: Timestamp::parse("2026-03-01T22:00:00Z").unwrap(),
                },
                StatusCode::GONE,
                "EXPIRED",
            ),
            (LifecycleError::not_found("stay", "s-1"), StatusCode::NOT_FOUND, "NOT_FOUND"),
            (
                LifecycleError::precondition("end date must be after start date"),
                StatusCode::UNPROCESSABLE_ENTITY,
                "PRECONDITION_FAILED",
            ),
        ];
        for (err, status, code) in cases {
            let app = AppError::from(err);
            assert_eq!(app.status_and_code(), (status, code), "{app:?}");
        }
    }

    #[test]
    fn service_errors_convert() {
        let forbidden = AppError::from(ServiceError::Forbidden("guest may not revoke".into()));
        assert_eq!(forbidden.status_and_code().0, StatusCode::FORBIDDEN);

        let invalid = AppError::from(ServiceError::Invalid("end before start".into()));
        assert_eq!(invalid.status_and_code().1, "VALIDATION_ERROR");

        let store = AppError::from(ServiceError::Store(StoreError::Corrupt("bad row".into())));
        assert_eq!(store.status_and_code().0, StatusCode::INTERNAL_SERVER_ERROR);

        let rejected = AppError::from(StoreError::Rejected(LifecycleError::not_found("property", "p")));
        assert_eq!(rejected.status_and_code().0, StatusCode::NOT_FOUND);
    }

    #[test]
    fn validation_error_from_core() {
        let err = AppError::from(ValidationError::InvalidRegionCode("ny c".into()));
        match &err {
            AppError::Validation(msg) => assert!(msg.contains("ny c"), "got: {msg}"),
            other => panic!("expected Validation, got: {other:?}"),
        }
    }

    #[test]
    fn error_body_skips_empty_details() {
        let body = ErrorBody {
            error: ErrorDetail {
                code: "EXPIRED".to_string(),
                message: "invitation expired".to_string(),
                details: None,
            },
        };
        let json = serde_json::to_string(&body).unwrap();
        assert!(json.contains("EXPIRED"));
        assert!(!json.contains("details"));
    }

    #[tokio::test]
    async fn into_response_already_resolved() {
        let err = AppError::from(LifecycleError::AlreadyResolved {
            entity: "stay",
            id: "s-1".into(),
            state: "COMPLETED".into(),
        });
        let (status, body) = response_parts(err).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body.error.code, "ALREADY_RESOLVED");
        assert!(body.error.message.contains("COMPLETED"));
    }

    #[tokio::test]
    async fn into_response_expired_is_gone() {
        let err = AppError::from(LifecycleError::Expired {
            code: "INV-0000ABCD".into(),
            expired_at: Timestamp::parse("2026-03-01T22:00:00Z").unwrap(),
        });
        let (status, body) = response_parts(err).await;
        assert_eq!(status, StatusCode::GONE);
        assert_eq!(body.error.code, "EXPIRED");
    }

    #[tokio::test]
    async fn into_response_internal_hides_details() {
        let (status, body) = response_parts(AppError::Internal("db connection failed".into())).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body.error.code, "INTERNAL_ERROR");
        assert!(
            !body.error.message.contains("db connection"),
            "internal error details must not leak: {}",
            body.error.message
        );
        assert_eq!(body.error.message, "An internal error occurred");
    }
}
