//! Error types for the engine and its HTTP surface.
//!
//! `EngineError` is what ingest and the metadata store return. Duplicate
//! detection and lost claims are outcomes, not errors, so they never appear
//! here. `AppError` wraps engine failures for axum handlers.

use crate::stores::StoreError;
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use std::fmt;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    /// Bad ingest input. Surfaced to the caller and never retried.
    #[error("validation failed: {0}")]
    Validation(String),
    /// An object store could not be reached. Transient.
    #[error("backend unavailable: {0}")]
    BackendUnavailable(String),
    /// The upload stream itself failed while being read.
    #[error("ingest failed: {0}")]
    IngestFailed(String),
    /// Durable copy did not match the recorded size. Transient.
    #[error("transfer verification failed: expected {expected} bytes, found {actual}")]
    TransferVerificationFailed { expected: u64, actual: u64 },
    #[error("{0} not found")]
    NotFound(String),
    #[error(transparent)]
    Metadata(#[from] sqlx::Error),
}

pub type EngineResult<T> = Result<T, EngineError>;

impl From<StoreError> for EngineError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(key) => EngineError::NotFound(format!("object `{}`", key)),
            other => EngineError::BackendUnavailable(other.to_string()),
        }
    }
}

/// A lightweight wrapper for general errors that keeps the message local.
#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub message: String,
}

impl AppError {
    /// Create a new AppError with a specific status and message.
    pub fn new(status: StatusCode, msg: impl Into<String>) -> Self {
        Self {
            status,
            message: msg.into(),
        }
    }

    /// Shortcut for a 500 Internal Server Error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, msg)
    }

    /// Shortcut for 404 Not Found
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, msg)
    }

    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, msg)
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for AppError {}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "error": self.message,
            "status": self.status.as_u16()
        }));

        (self.status, body).into_response()
    }
}

impl From<EngineError> for AppError {
    fn from(err: EngineError) -> Self {
        let status = match &err {
            EngineError::Validation(_) => StatusCode::BAD_REQUEST,
            EngineError::NotFound(_) => StatusCode::NOT_FOUND,
            EngineError::BackendUnavailable(_) | EngineError::TransferVerificationFailed { .. } => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            EngineError::IngestFailed(_) | EngineError::Metadata(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        AppError::new(status, err.to_string())
    }
}
