use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use sea_orm::error::DbErr;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::pos::PosError;

fn current_request_id() -> Option<String> {
    crate::request_id::current_request_id().map(|rid| rid.as_str().to_string())
}

/// Error body returned by every endpoint.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({
    "error": "Not Found",
    "message": "Not found: order 550e8400-e29b-41d4-a716-446655440000",
    "request_id": "req-abc123xyz",
    "timestamp": "2025-03-01T10:30:00.000Z"
}))]
pub struct ErrorResponse {
    /// HTTP status category
    pub error: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    pub timestamp: String,
}

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("Database error: {0}")]
    DatabaseError(#[from] DbErr),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Invalid status: {0}")]
    InvalidStatus(String),

    #[error("Insufficient stock: {0}")]
    InsufficientStock(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("External service error: {0}")]
    ExternalServiceError(String),

    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    #[error("POS response did not match the expected schema: {0}")]
    PosSchemaError(String),

    #[error("Internal error: {0}")]
    InternalError(String),
}

impl From<validator::ValidationErrors> for ServiceError {
    fn from(err: validator::ValidationErrors) -> Self {
        ServiceError::ValidationError(err.to_string())
    }
}

impl From<PosError> for ServiceError {
    fn from(err: PosError) -> Self {
        match err {
            PosError::Schema(msg) => ServiceError::PosSchemaError(msg),
            PosError::NotConfigured(msg) => ServiceError::ConfigurationError(msg),
            other => ServiceError::ExternalServiceError(other.to_string()),
        }
    }
}

impl From<serde_json::Error> for ServiceError {
    fn from(err: serde_json::Error) -> Self {
        ServiceError::InternalError(format!("serialization: {err}"))
    }
}

impl ServiceError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::DatabaseError(_) | Self::InternalError(_) | Self::ConfigurationError(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::ValidationError(_) | Self::InvalidStatus(_) | Self::BadRequest(_) => {
                StatusCode::BAD_REQUEST
            }
            Self::InsufficientStock(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::ExternalServiceError(_) | Self::PosSchemaError(_) => StatusCode::BAD_GATEWAY,
        }
    }

    /// Message suitable for customer-facing responses. Backend failures are
    /// collapsed to a generic text; the full error is logged instead.
    pub fn response_message(&self) -> String {
        match self {
            Self::DatabaseError(_) | Self::InternalError(_) | Self::ConfigurationError(_) => {
                "Unable to process the request".to_string()
            }
            Self::ExternalServiceError(_) | Self::PosSchemaError(_) => {
                "An upstream service is unavailable, please try again later".to_string()
            }
            _ => self.to_string(),
        }
    }

    /// Converts a database error into actionable configuration text when the
    /// backend message reveals a schema or locking problem.
    pub fn diagnosed(err: DbErr) -> Self {
        match diagnose_db_error(&err) {
            Some(hint) => ServiceError::ConfigurationError(hint),
            None => ServiceError::DatabaseError(err),
        }
    }
}

/// Pattern-matches backend error text into a remediation hint.
pub fn diagnose_db_error(err: &DbErr) -> Option<String> {
    let text = err.to_string().to_lowercase();
    if text.contains("no such table")
        || (text.contains("does not exist") && text.contains("relation"))
    {
        return Some(
            "database schema is missing tables; run the migrations (set auto_migrate = true)"
                .to_string(),
        );
    }
    if text.contains("no such column")
        || (text.contains("column") && text.contains("does not exist"))
    {
        return Some(
            "database schema is out of date; apply the pending migrations".to_string(),
        );
    }
    if text.contains("index") && (text.contains("missing") || text.contains("requires an index")) {
        return Some(
            "create composite index on orders(status, created_at) before running the stale-order sweep"
                .to_string(),
        );
    }
    if text.contains("database is locked") || text.contains("busy") {
        return Some(
            "database is locked by another writer; retry or reduce concurrent writers".to_string(),
        );
    }
    None
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        }

        let body = ErrorResponse {
            error: status.canonical_reason().unwrap_or("Error").to_string(),
            message: self.response_message(),
            details: None,
            request_id: current_request_id(),
            timestamp: chrono::Utc::now().to_rfc3339(),
        };

        (status, Json(body)).into_response()
    }
}

/// Wraps a `ServiceError` for admin endpoints, which surface the full error
/// text in `details`.
#[derive(Debug)]
pub struct AdminError(pub ServiceError);

impl From<ServiceError> for AdminError {
    fn from(err: ServiceError) -> Self {
        AdminError(err)
    }
}

impl From<DbErr> for AdminError {
    fn from(err: DbErr) -> Self {
        AdminError(ServiceError::diagnosed(err))
    }
}

impl IntoResponse for AdminError {
    fn into_response(self) -> Response {
        let status = self.0.status_code();
        if status.is_server_error() {
            tracing::error!(error = %self.0, "admin request failed");
        }

        let body = ErrorResponse {
            error: status.canonical_reason().unwrap_or("Error").to_string(),
            message: self.0.response_message(),
            details: Some(self.0.to_string()),
            request_id: current_request_id(),
            timestamp: chrono::Utc::now().to_rfc3339(),
        };

        (status, Json(body)).into_response()
    }
}
