//! Error types for the catalog
//!
//! `CatalogError` covers data access and business rule failures.
//! `GateError` is what guards surface to callers: refused credentials,
//! a generic forbidden or a server configuration mismatch. Deny reasons
//! stay internal.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use sea_orm::DbErr;
use serde_json::json;
use thiserror::Error;
use tonic::Status;
use uuid::Uuid;

pub type Result<T> = std::result::Result<T, CatalogError>;

#[derive(Error, Debug)]
pub enum CatalogError {
    #[error("Database error: {0}")]
    Database(#[from] DbErr),

    #[error("Version not found: {0}")]
    VersionNotFound(Uuid),

    #[error("Object not found: {0}")]
    ObjectNotFound(Uuid),

    #[error("Invalid attribute '{key}': {reason}")]
    InvalidAttribute { key: String, reason: String },

    /// Metadata allows one value per key
    #[error("Duplicate metadata key: {0}")]
    DuplicateKey(String),

    #[error("Invalid permission code: {0}")]
    InvalidPermission(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl CatalogError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            CatalogError::VersionNotFound(_) | CatalogError::ObjectNotFound(_) => {
                StatusCode::NOT_FOUND
            }
            CatalogError::InvalidAttribute { .. }
            | CatalogError::DuplicateKey(_)
            | CatalogError::InvalidPermission(_) => StatusCode::UNPROCESSABLE_ENTITY,
            CatalogError::Database(_) | CatalogError::Config(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for CatalogError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let detail = match &self {
            // Row-level failure detail is logged, not returned
            CatalogError::Database(e) => {
                tracing::error!("Database error while serving request: {}", e);
                "Internal server error".to_string()
            }
            other => other.to_string(),
        };
        (status, Json(json!({ "detail": detail }))).into_response()
    }
}

impl From<CatalogError> for Status {
    fn from(err: CatalogError) -> Self {
        match err {
            CatalogError::VersionNotFound(_) | CatalogError::ObjectNotFound(_) => {
                Status::not_found(err.to_string())
            }
            CatalogError::InvalidAttribute { .. }
            | CatalogError::DuplicateKey(_)
            | CatalogError::InvalidPermission(_) => Status::invalid_argument(err.to_string()),
            CatalogError::Database(_) | CatalogError::Config(_) => {
                Status::internal("Internal server error")
            }
        }
    }
}

/// Caller-visible outcome of the request guards
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GateError {
    /// Credentials were presented and failed verification
    #[error("Unauthenticated")]
    Unauthenticated,

    /// Every authorization denial; the reason is only logged
    #[error("Forbidden")]
    Forbidden,

    /// Presented auth type is not usable in the configured auth mode
    #[error("{0}")]
    NotImplemented(String),
}

impl GateError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            GateError::Unauthenticated => StatusCode::UNAUTHORIZED,
            GateError::Forbidden => StatusCode::FORBIDDEN,
            GateError::NotImplemented(_) => StatusCode::NOT_IMPLEMENTED,
        }
    }
}

impl IntoResponse for GateError {
    fn into_response(self) -> Response {
        let body = match &self {
            GateError::Unauthenticated => json!({ "detail": "Invalid authorization credentials" }),
            GateError::Forbidden => json!({ "detail": "User lacks permission to complete this action" }),
            GateError::NotImplemented(detail) => json!({ "detail": detail }),
        };
        (self.status_code(), Json(body)).into_response()
    }
}

impl From<GateError> for Status {
    fn from(err: GateError) -> Self {
        match err {
            GateError::Unauthenticated => Status::unauthenticated("Unauthenticated"),
            GateError::Forbidden => Status::permission_denied("Forbidden"),
            GateError::NotImplemented(detail) => Status::unimplemented(detail),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gate_error_status_codes() {
        assert_eq!(GateError::Unauthenticated.status_code(), StatusCode::UNAUTHORIZED);
        assert_eq!(GateError::Forbidden.status_code(), StatusCode::FORBIDDEN);
        assert_eq!(
            GateError::NotImplemented("x".into()).status_code(),
            StatusCode::NOT_IMPLEMENTED
        );
    }

    #[test]
    fn test_gate_error_to_grpc_status() {
        let status: Status = GateError::Forbidden.into();
        assert_eq!(status.code(), tonic::Code::PermissionDenied);
        assert_eq!(status.message(), "Forbidden");

        let status: Status = GateError::NotImplemented("BEARER not supported".into()).into();
        assert_eq!(status.code(), tonic::Code::Unimplemented);
    }

    #[test]
    fn test_catalog_error_hides_database_detail() {
        let status: Status = CatalogError::Database(DbErr::Custom("row 42 failed".into())).into();
        assert_eq!(status.code(), tonic::Code::Internal);
        assert!(!status.message().contains("row 42"));

        let status: Status = CatalogError::VersionNotFound(Uuid::nil()).into();
        assert_eq!(status.code(), tonic::Code::NotFound);
    }
}
