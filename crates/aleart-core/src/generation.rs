//! Generation orchestration.
//!
//! `generate` runs synthesis inline: validate → synthesize → store the
//! artifact → record a completed job (best effort) → respond. `submit`
//! records a `generating` job first and finishes it on a background task.

use std::sync::Arc;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::artifact::ArtifactStore;
use crate::error::{DatabasePersistError, GenerationError};
use crate::store::{JobLocator, JobRepository, NewJobRecord};
use crate::synth::SynthesizerHandle;
use crate::types::{GenerationParameters, TokenId};

/// URL prefix under which artifacts are served.
pub const ARTIFACT_URL_PREFIX: &str = "/generated_images/";

/// A resolved generation request; absent wire fields already carry defaults.
#[derive(Debug, Clone, Default)]
pub struct GenerationRequest {
    pub prompt: String,
    pub parameters: GenerationParameters,
    pub token_id: TokenId,
    pub user_id: Option<String>,
}

impl GenerationRequest {
    /// The owning user, treating an empty or blank id as no user.
    pub fn owner(&self) -> Option<&str> {
        self.user_id.as_deref().map(str::trim).filter(|u| !u.is_empty())
    }

    fn new_record(&self, user_id: &str) -> NewJobRecord {
        NewJobRecord {
            user_id: user_id.to_owned(),
            token_id: self.token_id.clone(),
            prompt: self.prompt.clone(),
            parameters: self.parameters.clone(),
        }
    }
}

/// What happened to the bookkeeping half of a generation.
#[derive(Debug)]
pub enum PersistOutcome {
    /// A completed record was appended to the user's list.
    Recorded(JobLocator),
    /// No user was given; the image went to the unowned collection.
    RecordedUnowned(String),
    /// No user was given and unowned recording is off.
    Skipped,
    /// The database write failed. The artifact is still stored and served.
    Failed(DatabasePersistError),
}

impl PersistOutcome {
    pub fn is_recorded(&self) -> bool {
        matches!(self, PersistOutcome::Recorded(_) | PersistOutcome::RecordedUnowned(_))
    }
}

#[derive(Debug)]
pub struct GenerationResult {
    pub filename: String,
    /// Relative URL of the stored artifact.
    pub image_url: String,
    /// The artifact bytes, base64 encoded.
    pub image_base64: String,
    pub token_id: TokenId,
    pub prompt: String,
    pub parameters: GenerationParameters,
    pub persistence: PersistOutcome,
}

impl GenerationResult {
    pub fn data_uri(&self) -> String {
        data_uri(&self.image_base64)
    }
}

/// `data:image/png;base64,<payload>`
pub fn data_uri(image_base64: &str) -> String {
    format!("data:image/png;base64,{image_base64}")
}

pub fn artifact_url(filename: &str) -> String {
    format!("{ARTIFACT_URL_PREFIX}{filename}")
}

/// A job accepted by [`GenerationService::submit`].
#[derive(Debug)]
pub struct SubmittedJob {
    pub locator: JobLocator,
    /// Completion task; resolves once the record has left `generating` (or
    /// failed to).
    pub completion: JoinHandle<()>,
}

#[derive(Clone)]
pub struct GenerationService {
    synthesizer: Arc<SynthesizerHandle>,
    artifacts: Arc<dyn ArtifactStore>,
    jobs: Arc<dyn JobRepository>,
    record_unowned: bool,
}

impl std::fmt::Debug for GenerationService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GenerationService")
            .field("synthesizer", &self.synthesizer)
            .field("record_unowned", &self.record_unowned)
            .finish_non_exhaustive()
    }
}

impl GenerationService {
    pub fn new(
        synthesizer: Arc<SynthesizerHandle>,
        artifacts: Arc<dyn ArtifactStore>,
        jobs: Arc<dyn JobRepository>,
    ) -> Self {
        Self { synthesizer, artifacts, jobs, record_unowned: false }
    }

    /// Also record images generated without a user in the unowned collection.
    pub fn with_unowned_records(mut self, enabled: bool) -> Self {
        self.record_unowned = enabled;
        self
    }

    pub fn synthesizer(&self) -> &SynthesizerHandle {
        &self.synthesizer
    }

    pub fn jobs(&self) -> &Arc<dyn JobRepository> {
        &self.jobs
    }

    pub fn artifacts(&self) -> &Arc<dyn ArtifactStore> {
        &self.artifacts
    }

    /// Render, store and (best effort) record one image.
    ///
    /// Only synthesis and the artifact write can fail the call. A database
    /// failure is reported in [`GenerationResult::persistence`].
    pub async fn generate(
        &self,
        request: GenerationRequest,
    ) -> Result<GenerationResult, GenerationError> {
        request.parameters.validate()?;

        let (filename, image_base64) = self.render(&request).await?;

        let persistence = self.persist(&request, &image_base64, &filename).await;
        info!(
            token_id = %request.token_id,
            %filename,
            recorded = persistence.is_recorded(),
            "image generated"
        );

        Ok(GenerationResult {
            image_url: artifact_url(&filename),
            filename,
            image_base64,
            token_id: request.token_id,
            prompt: request.prompt,
            parameters: request.parameters,
            persistence,
        })
    }

    /// Record a `generating` job and complete it in the background.
    ///
    /// Fails without starting anything when the request is invalid, has no
    /// user, or the user already has a job in flight for the token.
    pub async fn submit(&self, request: GenerationRequest) -> Result<SubmittedJob, GenerationError> {
        request.parameters.validate()?;
        let user_id = request
            .owner()
            .ok_or_else(|| GenerationError::InvalidRequest("userId is required".to_owned()))?
            .to_owned();

        let locator = self.jobs.insert_generating(request.new_record(&user_id)).await?;
        info!(
            %user_id,
            token_id = %request.token_id,
            record_index = locator.record_index,
            "generation job submitted"
        );

        let service = self.clone();
        let completion = tokio::spawn(async move {
            service.complete(&user_id, request).await;
        });

        Ok(SubmittedJob { locator, completion })
    }

    async fn render(&self, request: &GenerationRequest) -> Result<(String, String), GenerationError> {
        let bytes = self
            .synthesizer
            .synthesize(&request.prompt, &request.parameters)
            .await?;
        let filename = self.artifacts.store(&request.token_id, &bytes).await?;
        debug!(%filename, bytes = bytes.len(), "artifact written");
        Ok((filename, STANDARD.encode(&bytes)))
    }

    async fn persist(
        &self,
        request: &GenerationRequest,
        image_base64: &str,
        filename: &str,
    ) -> PersistOutcome {
        let written = match request.owner() {
            Some(user_id) => self
                .jobs
                .insert_completed(request.new_record(user_id), image_base64, Some(filename))
                .await
                .map(PersistOutcome::Recorded),
            None if self.record_unowned => self
                .jobs
                .insert_unowned(&request.token_id, image_base64, &request.prompt, &request.parameters)
                .await
                .map(PersistOutcome::RecordedUnowned),
            None => return PersistOutcome::Skipped,
        };

        written.unwrap_or_else(|e| {
            warn!(
                token_id = %request.token_id,
                %filename,
                error = %e,
                "job record not persisted; artifact remains available"
            );
            PersistOutcome::Failed(DatabasePersistError(e))
        })
    }

    /// Background half of [`GenerationService::submit`].
    async fn complete(&self, user_id: &str, request: GenerationRequest) {
        let token_id = &request.token_id;
        match self.render(&request).await {
            Ok((filename, image_base64)) => {
                match self
                    .jobs
                    .patch_to_completed(user_id, token_id, &image_base64, Some(&filename))
                    .await
                {
                    Ok(true) => info!(%user_id, %token_id, %filename, "generation job completed"),
                    Ok(false) => warn!(
                        %user_id,
                        %token_id,
                        %filename,
                        "generation job was no longer generating; artifact left unrecorded"
                    ),
                    // The record stays `generating`; reconciliation can pick up the file.
                    Err(e) => error!(
                        %user_id,
                        %token_id,
                        %filename,
                        error = %e,
                        "failed to record completed job"
                    ),
                }
            }
            Err(e) => {
                warn!(%user_id, %token_id, error = %e, "generation job failed");
                if let Err(db) = self.jobs.mark_failed(user_id, token_id, &e.to_string()).await {
                    error!(%user_id, %token_id, error = %db, "failed to mark job as failed");
                }
            }
        }
    }
}

// ── Tests ──────────────────────────────────────────────────────────────────────
