use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use sea_orm::error::DbErr;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Error payload returned on every failed request.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ErrorResponse {
    /// HTTP status category (e.g., "Not Found", "Conflict")
    #[schema(example = "Unprocessable Entity")]
    pub error: String,
    /// Human-readable error description
    #[schema(example = "Insufficient stock: 3 units of 6297000112 available at Slemany, 8 requested")]
    pub message: String,
    /// Additional error details
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
    /// ISO 8601 timestamp when the error occurred
    #[schema(example = "2025-11-02T10:30:00.000Z")]
    pub timestamp: String,
}

#[derive(Debug, thiserror::Error, Serialize)]
pub enum ServiceError {
    #[error("Database error: {0}")]
    DatabaseError(
        #[from]
        #[serde(skip)]
        DbErr,
    ),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Insufficient stock: {0}")]
    InsufficientStock(String),

    #[error("Invalid state transition: {0}")]
    InvalidStateTransition(String),

    #[error("Referential violation: {0}")]
    ReferentialViolation(String),

    #[error("Already claimed: {0}")]
    AlreadyClaimed(String),

    #[error("Concurrency conflict: {0}")]
    ConcurrencyConflict(String),

    #[error("Event error: {0}")]
    EventError(String),

    #[error("Internal error: {0}")]
    InternalError(String),
}

impl From<validator::ValidationErrors> for ServiceError {
    fn from(err: validator::ValidationErrors) -> Self {
        ServiceError::ValidationError(err.to_string())
    }
}

impl ServiceError {
    /// Classifies a database error, separating retryable lock/serialization
    /// failures (and unique-index races) from genuine storage errors.
    /// Callers retry the whole logical operation on `ConcurrencyConflict`.
    pub fn from_db(err: DbErr) -> Self {
        let msg = err.to_string();
        if msg.contains("database is locked")
            || msg.contains("could not serialize access")
            || msg.contains("deadlock detected")
            || msg.contains("UNIQUE constraint failed")
            || msg.contains("duplicate key value")
        {
            return ServiceError::ConcurrencyConflict(msg);
        }
        ServiceError::DatabaseError(err)
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, ServiceError::ConcurrencyConflict(_))
    }

    /// Single source of truth for error-to-status mapping.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::DatabaseError(_) | Self::EventError(_) | Self::InternalError(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::ValidationError(_) => StatusCode::BAD_REQUEST,
            Self::InsufficientStock(_) | Self::ReferentialViolation(_) => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            Self::InvalidStateTransition(_)
            | Self::AlreadyClaimed(_)
            | Self::ConcurrencyConflict(_) => StatusCode::CONFLICT,
        }
    }

    /// Message suitable for HTTP responses. Storage and event-bus failures
    /// return generic text so implementation details never leak.
    pub fn response_message(&self) -> String {
        match self {
            Self::DatabaseError(_) => "Database error".to_string(),
            Self::EventError(_) | Self::InternalError(_) => "Internal server error".to_string(),
            _ => self.to_string(),
        }
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let err = ErrorResponse {
            error: status.canonical_reason().unwrap_or("Error").to_string(),
            message: self.response_message(),
            details: None,
            timestamp: chrono::Utc::now().to_rfc3339(),
        };

        (status, Json(err)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_code_mapping() {
        assert_eq!(
            ServiceError::NotFound("x".into()).status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ServiceError::ValidationError("x".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ServiceError::InsufficientStock("x".into()).status_code(),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            ServiceError::ReferentialViolation("x".into()).status_code(),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            ServiceError::InvalidStateTransition("x".into()).status_code(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            ServiceError::AlreadyClaimed("x".into()).status_code(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            ServiceError::ConcurrencyConflict("x".into()).status_code(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            ServiceError::InternalError("x".into()).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn response_message_hides_storage_details() {
        let err = ServiceError::DatabaseError(DbErr::Custom("connection string leaked".into()));
        assert_eq!(err.response_message(), "Database error");

        let err = ServiceError::InsufficientStock("3 available, 8 requested".into());
        assert_eq!(
            err.response_message(),
            "Insufficient stock: 3 available, 8 requested"
        );
    }

    #[test]
    fn lock_failures_classify_as_conflict() {
        let err = ServiceError::from_db(DbErr::Custom("database is locked".into()));
        assert!(err.is_conflict());

        let err = ServiceError::from_db(DbErr::Custom(
            "UNIQUE constraint failed: bills.bill_number".into(),
        ));
        assert!(err.is_conflict());

        let err = ServiceError::from_db(DbErr::Custom("no such table: bills".into()));
        assert!(!err.is_conflict());
    }
}
