//! Error kinds of the generation core.
//!
//! Fatal to a generation request: [`SynthesisError`], [`ArtifactError::Write`].
//! Non-fatal bookkeeping failures surface as [`DatabasePersistError`] inside
//! [`crate::PersistOutcome`] and are never returned as `Err` from
//! [`crate::GenerationService::generate`].

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::types::TokenId;

/// Failure of the external image synthesizer.
#[derive(Debug, Error)]
pub enum SynthesisError {
    /// The synthesizer could not be initialised (model load failed, service unreachable).
    #[error("synthesizer initialisation failed: {0}")]
    Init(String),

    /// The parameter combination was rejected before or by the synthesizer.
    #[error("invalid generation parameters: {0}")]
    InvalidParameters(String),

    /// Synthesis did not finish within the configured bound.
    #[error("synthesis timed out after {}s", .0.as_secs())]
    Timeout(Duration),

    /// The synthesizer ran and reported an error (out of memory, sampler failure, …).
    #[error("synthesis failed: {0}")]
    Backend(String),

    /// The synthesizer finished without producing an image.
    #[error("synthesizer returned no image")]
    EmptyResult,

    #[error("synthesizer transport error: {0}")]
    Transport(#[from] reqwest::Error),
}

/// Failure of the artifact file store.
#[derive(Debug, Error)]
pub enum ArtifactError {
    /// The requested artifact file does not exist.
    #[error("artifact not found: {0}")]
    NotFound(String),

    /// Writing a new artifact failed (disk full, permission denied, …).
    #[error("failed to write artifact {}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Listing or reading existing artifacts failed.
    #[error("failed to access artifact storage at {}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Failure of the job-record repository.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    /// A `generating` record already exists for this user and token.
    #[error("a generation job for token {token_id} is already in progress for user {user_id}")]
    AlreadyGenerating { user_id: String, token_id: TokenId },

    /// A stored value could not be decoded.
    #[error("corrupt job record: {0}")]
    Corrupt(String),
}

/// Best-effort bookkeeping failed after the artifact was already stored.
///
/// The request still succeeds; the record can be repaired by re-running
/// generation or by the reconciliation sweep.
#[derive(Debug, Error)]
#[error("failed to persist job record: {0}")]
pub struct DatabasePersistError(#[from] pub StoreError);

/// Fatal failure of a generation request.
#[derive(Debug, Error)]
pub enum GenerationError {
    /// The request was malformed or violates parameter bounds.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error(transparent)]
    Synthesis(#[from] SynthesisError),

    #[error(transparent)]
    Storage(#[from] ArtifactError),

    /// Recording a submitted job failed, so nothing was started.
    #[error(transparent)]
    Submit(#[from] StoreError),
}
