//! Unified server error type.
//!
//! Every handler returns `Result<T, ServerError>`, which implements
//! [`axum::response::IntoResponse`]: the body is always
//! `{"success": false, "error": "<message>"}`.
//!
//! Database and storage failures are logged in full; clients only get a
//! generic message.

use aleart_core::{ArtifactError, GenerationError, StoreError, SynthesisError};
use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use thiserror::Error;
use tracing::error;

#[derive(Debug, Error)]
pub enum ServerError {
    /// The caller sent an invalid or malformed request.
    #[error("bad request: {0}")]
    BadRequest(String),

    /// The caller referenced a resource that does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// The request collides with work already in progress.
    #[error("conflict: {0}")]
    Conflict(String),

    /// The synthesizer could not be brought up.
    #[error("backend not ready: {0}")]
    BackendNotReady(String),

    /// Synthesis ran and failed; the message is returned to the caller.
    #[error("generation failed: {0}")]
    Generation(String),

    #[error("database error: {0}")]
    Database(#[from] StoreError),

    #[error("storage error: {0}")]
    Storage(#[source] ArtifactError),
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let (status, client_message) = match &self {
            ServerError::BadRequest(m) => (StatusCode::BAD_REQUEST, m.clone()),
            ServerError::NotFound(m) => (StatusCode::NOT_FOUND, m.clone()),
            ServerError::Conflict(m) => (StatusCode::CONFLICT, m.clone()),
            ServerError::BackendNotReady(m) => (StatusCode::SERVICE_UNAVAILABLE, m.clone()),
            ServerError::Generation(m) => {
                error!(message = %m, "generation failed");
                (StatusCode::INTERNAL_SERVER_ERROR, m.clone())
            }
            ServerError::Database(e) => {
                error!(error = %e, "database error");
                (StatusCode::INTERNAL_SERVER_ERROR, "internal server error".to_owned())
            }
            ServerError::Storage(e) => {
                error!(error = %e, "artifact storage error");
                (StatusCode::INTERNAL_SERVER_ERROR, "internal server error".to_owned())
            }
        };
        (status, Json(json!({ "success": false, "error": client_message }))).into_response()
    }
}

impl From<ArtifactError> for ServerError {
    fn from(e: ArtifactError) -> Self {
        match e {
            ArtifactError::NotFound(_) => ServerError::NotFound("Image not found".to_owned()),
            other => ServerError::Storage(other),
        }
    }
}

impl From<GenerationError> for ServerError {
    fn from(e: GenerationError) -> Self {
        match e {
            GenerationError::InvalidRequest(m) => ServerError::BadRequest(m),
            GenerationError::Synthesis(SynthesisError::Init(m)) => ServerError::BackendNotReady(m),
            GenerationError::Synthesis(SynthesisError::InvalidParameters(m)) => {
                ServerError::BadRequest(m)
            }
            GenerationError::Synthesis(other) => ServerError::Generation(other.to_string()),
            GenerationError::Storage(e) => ServerError::Storage(e),
            GenerationError::Submit(e @ StoreError::AlreadyGenerating { .. }) => {
                ServerError::Conflict(e.to_string())
            }
            GenerationError::Submit(e) => ServerError::Database(e),
        }
    }
}
