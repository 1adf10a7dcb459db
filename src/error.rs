// src/error.rs
//! Unified error type for every workflow service.
//!
//! Each failure belongs to exactly one [`ErrorKind`]; the HTTP layer maps
//! kinds to status codes so handlers can simply propagate with `?`.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;

/// Coarse classification of a [`ServiceError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Malformed input (bad identifier, missing field).
    Validation,
    /// The referenced entity does not exist.
    NotFound,
    /// The entity exists but its current state forbids the operation.
    Conflict,
    /// Storage or chain failure outside this process.
    ExternalDependency,
    /// Missing or invalid session.
    Unauthorized,
}

/// Error returned by all service operations.
#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("invalid address or id: {0:?}")]
    InvalidAddress(String),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("insufficient_balance: {address} has {available}, needs {required}")]
    InsufficientBalance {
        address: String,
        required: u64,
        available: u64,
    },

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("issuer {issuer_id} cannot issue credentials: {reason}")]
    IssuerNotEligible { issuer_id: String, reason: String },

    #[error("external dependency failed: {0}")]
    ExternalDependency(String),

    #[error("storage failure: {0}")]
    Storage(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),
}

/// Result alias used across the crate.
pub type ServiceResult<T> = Result<T, ServiceError>;

impl ServiceError {
    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        ServiceError::NotFound {
            entity,
            id: id.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            ServiceError::InvalidAddress(_) | ServiceError::Validation(_) => ErrorKind::Validation,
            ServiceError::NotFound { .. } => ErrorKind::NotFound,
            ServiceError::InsufficientBalance { .. }
            | ServiceError::Conflict(_)
            | ServiceError::IssuerNotEligible { .. } => ErrorKind::Conflict,
            ServiceError::ExternalDependency(_) | ServiceError::Storage(_) => {
                ErrorKind::ExternalDependency
            }
            ServiceError::Unauthorized(_) => ErrorKind::Unauthorized,
        }
    }

    fn status_code(&self) -> StatusCode {
        match self.kind() {
            ErrorKind::Validation => StatusCode::UNPROCESSABLE_ENTITY,
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::Conflict => StatusCode::CONFLICT,
            ErrorKind::ExternalDependency => StatusCode::BAD_GATEWAY,
            ErrorKind::Unauthorized => StatusCode::UNAUTHORIZED,
        }
    }
}

impl From<serde_json::Error> for ServiceError {
    fn from(err: serde_json::Error) -> Self {
        ServiceError::Storage(format!("json: {}", err))
    }
}

impl From<std::io::Error> for ServiceError {
    fn from(err: std::io::Error) -> Self {
        ServiceError::Storage(err.to_string())
    }
}

impl From<reqwest::Error> for ServiceError {
    fn from(err: reqwest::Error) -> Self {
        ServiceError::ExternalDependency(err.to_string())
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            log::error!("request failed: {}", self);
        }
        let body = serde_json::json!({
            "error": {
                "kind": self.kind(),
                "code": status.as_u16(),
                "message": self.to_string(),
            }
        });
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insufficient_balance_is_conflict() {
        let err = ServiceError::InsufficientBalance {
            address: "0x01".into(),
            required: 5,
            available: 2,
        };
        assert_eq!(err.kind(), ErrorKind::Conflict);
        assert!(err.to_string().starts_with("insufficient_balance"));
    }

    #[test]
    fn test_status_codes_follow_kind() {
        let resp = ServiceError::not_found("submission", "SUB-1").into_response();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);

        let resp = ServiceError::Storage("disk full".into()).into_response();
        assert_eq!(resp.status(), StatusCode::BAD_GATEWAY);

        let resp = ServiceError::InvalidAddress("zz".into()).into_response();
        assert_eq!(resp.status(), StatusCode::UNPROCESSABLE_ENTITY);
    }
}
