//! aleart-core – generation-job lifecycle and artifact reconciliation.
//!
//! Components, leaves first:
//! - [`artifact`]: generated image files on local storage, named by token.
//! - [`synth`]: the external image synthesizer and its one-time-init guard.
//! - [`store`]: per-user job records ([`JobRepository`], SQLite by default).
//! - [`generation`]: synthesize → store artifact → record the job.
//! - [`reconcile`]: repairs records left in `generating` once their artifact exists.

pub mod artifact;
pub mod error;
pub mod generation;
pub mod reconcile;
pub mod store;
pub mod synth;
pub mod types;

#[cfg(any(test, feature = "test-support"))]
pub mod testing;

pub use artifact::{ArtifactCandidate, ArtifactStore, LocalArtifactStore};
pub use error::{ArtifactError, DatabasePersistError, GenerationError, StoreError, SynthesisError};
pub use generation::{
    GenerationRequest, GenerationResult, GenerationService, PersistOutcome, SubmittedJob, artifact_url,
    data_uri,
};
pub use reconcile::{ReconcileEntry, ReconcileOutcome, ReconcileReport, ReconciliationJob};
pub use store::{JobLocator, JobRepository, NewJobRecord, sqlite::SqliteJobStore};
pub use synth::{Synthesizer, SynthesizerHandle, SynthesizerInfo, http::HttpSynthesizer};
pub use types::{GenerationParameters, JobRecord, JobStatus, TokenId};
