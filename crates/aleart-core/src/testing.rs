//! In-memory doubles for the collaborators of the generation core.
//!
//! Compiled for this crate's tests and, with the `test-support` feature, for
//! downstream test suites.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};

use crate::artifact::{ArtifactCandidate, ArtifactStore, is_artifact_of};
use crate::error::{ArtifactError, StoreError, SynthesisError};
use crate::store::{JobLocator, JobRepository, NewJobRecord};
use crate::synth::{Synthesizer, SynthesizerInfo};
use crate::types::{GenerationParameters, JobRecord, TokenId};

/// Placeholder image bytes carrying a PNG signature.
pub const TINY_PNG: &[u8] = &[
    0x89, 0x50, 0x4e, 0x47, 0x0d, 0x0a, 0x1a, 0x0a, 0x00, 0x00, 0x00, 0x0d, 0x49, 0x48, 0x44, 0x52,
    0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x01, 0x08, 0x06, 0x00, 0x00, 0x00, 0x1f, 0x15, 0xc4,
    0x89, 0x00, 0x00, 0x00, 0x0d, 0x49, 0x44, 0x41, 0x54, 0x78, 0x9c, 0x63, 0x00, 0x01, 0x00, 0x00,
    0x05, 0x00, 0x01, 0x0d, 0x0a, 0x2d, 0xb4, 0x00, 0x00, 0x00, 0x00, 0x49, 0x45, 0x4e, 0x44, 0xae,
    0x42, 0x60, 0x82,
];

// ── StaticSynthesizer ─────────────────────────────────────────────────────────

/// Synthesizer that returns the same bytes for every prompt.
#[derive(Debug)]
pub struct StaticSynthesizer {
    image: Vec<u8>,
    failure: Option<String>,
    accelerator: bool,
    load_delay: Duration,
    synthesis_delay: Duration,
    failing_loads: AtomicUsize,
    loads: AtomicUsize,
    syntheses: AtomicUsize,
}

impl StaticSynthesizer {
    pub fn new(image: Vec<u8>) -> Self {
        Self {
            image,
            failure: None,
            accelerator: false,
            load_delay: Duration::ZERO,
            synthesis_delay: Duration::ZERO,
            failing_loads: AtomicUsize::new(0),
            loads: AtomicUsize::new(0),
            syntheses: AtomicUsize::new(0),
        }
    }

    /// Loads fine, then fails every synthesis with `message`.
    pub fn failing(message: &str) -> Self {
        Self { failure: Some(message.to_owned()), ..Self::new(Vec::new()) }
    }

    /// Report a GPU, both when probed and once loaded.
    pub fn with_accelerator(mut self, available: bool) -> Self {
        self.accelerator = available;
        self
    }

    pub fn with_load_delay(mut self, delay: Duration) -> Self {
        self.load_delay = delay;
        self
    }

    pub fn with_synthesis_delay(mut self, delay: Duration) -> Self {
        self.synthesis_delay = delay;
        self
    }

    /// Fail the first `n` loads.
    pub fn failing_loads(self, n: usize) -> Self {
        self.failing_loads.store(n, Ordering::SeqCst);
        self
    }

    pub fn load_count(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }

    pub fn synthesize_count(&self) -> usize {
        self.syntheses.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Synthesizer for StaticSynthesizer {
    async fn load(&self) -> Result<SynthesizerInfo, SynthesisError> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        if !self.load_delay.is_zero() {
            tokio::time::sleep(self.load_delay).await;
        }
        let should_fail = self
            .failing_loads
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if should_fail {
            return Err(SynthesisError::Init("model weights missing".to_owned()));
        }
        Ok(SynthesizerInfo { model: "static".to_owned(), accelerator_available: self.accelerator })
    }

    async fn accelerator_available(&self) -> bool {
        self.accelerator
    }

    async fn synthesize(
        &self,
        _prompt: &str,
        _params: &GenerationParameters,
    ) -> Result<Vec<u8>, SynthesisError> {
        self.syntheses.fetch_add(1, Ordering::SeqCst);
        if !self.synthesis_delay.is_zero() {
            tokio::time::sleep(self.synthesis_delay).await;
        }
        match &self.failure {
            Some(message) => Err(SynthesisError::Backend(message.clone())),
            None => Ok(self.image.clone()),
        }
    }
}

// ── FailingJobRepository ──────────────────────────────────────────────────────

/// Repository whose every call fails as if the database were gone.
#[derive(Debug, Default)]
pub struct FailingJobRepository;

fn unavailable() -> StoreError {
    StoreError::Database(sqlx::Error::PoolClosed)
}

#[async_trait]
impl JobRepository for FailingJobRepository {
    async fn insert_completed(
        &self,
        _record: NewJobRecord,
        _image_base64: &str,
        _artifact: Option<&str>,
    ) -> Result<JobLocator, StoreError> {
        Err(unavailable())
    }

    async fn insert_generating(&self, _record: NewJobRecord) -> Result<JobLocator, StoreError> {
        Err(unavailable())
    }

    async fn insert_unowned(
        &self,
        _token_id: &TokenId,
        _image_base64: &str,
        _prompt: &str,
        _parameters: &GenerationParameters,
    ) -> Result<String, StoreError> {
        Err(unavailable())
    }

    async fn find_generating(&self, _token_id: &TokenId) -> Result<Vec<JobLocator>, StoreError> {
        Err(unavailable())
    }

    async fn generating_tokens(&self) -> Result<Vec<TokenId>, StoreError> {
        Err(unavailable())
    }

    async fn patch_to_completed(
        &self,
        _user_id: &str,
        _token_id: &TokenId,
        _image_base64: &str,
        _artifact: Option<&str>,
    ) -> Result<bool, StoreError> {
        Err(unavailable())
    }

    async fn mark_failed(
        &self,
        _user_id: &str,
        _token_id: &TokenId,
        _error: &str,
    ) -> Result<bool, StoreError> {
        Err(unavailable())
    }

    async fn list_user_records(
        &self,
        _user_id: &str,
        _token_id: Option<&TokenId>,
    ) -> Result<Vec<JobRecord>, StoreError> {
        Err(unavailable())
    }
}

// ── FixedArtifactStore ────────────────────────────────────────────────────────

/// Artifact store with caller-chosen creation timestamps.
///
/// Candidates are listed in insertion order, not by timestamp, so callers
/// that rely on ordering instead of picking the maximum are caught out.
#[derive(Debug, Default)]
pub struct FixedArtifactStore {
    files: Mutex<Vec<(ArtifactCandidate, Option<Vec<u8>>)>>,
}

impl FixedArtifactStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a file created `created_secs` seconds after the Unix epoch.
    pub fn with_file(self, filename: &str, created_secs: i64, bytes: &[u8]) -> Self {
        let created_at = Utc.timestamp_opt(created_secs, 0).single().unwrap_or_default();
        self.push(filename.to_owned(), created_at, Some(bytes.to_vec()));
        self
    }

    /// Add a file that is listed but cannot be read, as when it is deleted
    /// between listing and reading.
    pub fn with_unreadable_file(self, filename: &str, created_secs: i64) -> Self {
        let created_at = Utc.timestamp_opt(created_secs, 0).single().unwrap_or_default();
        self.push(filename.to_owned(), created_at, None);
        self
    }

    fn push(&self, filename: String, created_at: DateTime<Utc>, bytes: Option<Vec<u8>>) {
        if let Ok(mut files) = self.files.lock() {
            files.push((ArtifactCandidate { filename, created_at }, bytes));
        }
    }

    fn snapshot(&self) -> HashMap<String, Option<Vec<u8>>> {
        self.files
            .lock()
            .map(|files| files.iter().map(|(c, b)| (c.filename.clone(), b.clone())).collect())
            .unwrap_or_default()
    }
}

#[async_trait]
impl ArtifactStore for FixedArtifactStore {
    async fn store(&self, token_id: &TokenId, bytes: &[u8]) -> Result<String, ArtifactError> {
        let n = self.files.lock().map(|f| f.len()).unwrap_or_default();
        let filename = format!("art_token_{}_{n:08x}.png", token_id.file_stem());
        self.push(filename.clone(), Utc::now(), Some(bytes.to_vec()));
        Ok(filename)
    }

    async fn list_candidates(
        &self,
        token_id: &TokenId,
    ) -> Result<Vec<ArtifactCandidate>, ArtifactError> {
        Ok(self
            .files
            .lock()
            .map(|files| {
                files
                    .iter()
                    .filter(|(c, _)| is_artifact_of(&c.filename, token_id))
                    .map(|(c, _)| c.clone())
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn read(&self, filename: &str) -> Result<Vec<u8>, ArtifactError> {
        self.snapshot()
            .remove(filename)
            .flatten()
            .ok_or_else(|| ArtifactError::NotFound(filename.to_owned()))
    }
}
