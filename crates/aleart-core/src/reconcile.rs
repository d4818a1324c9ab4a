//! Repair of job records stuck in `generating`.
//!
//! For every `generating` record of a token the sweep picks the most recently
//! created artifact file of that token and completes the record with it. The
//! association is by filename prefix only: with two jobs of one token in
//! flight, a record can be completed with the other job's image.
//!
//! Safe to re-run and to run concurrently: completed records are never
//! listed, and the conditional patch lets at most one writer win.

use std::fmt;
use std::sync::Arc;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use serde::Serialize;
use tracing::{info, warn};

use crate::artifact::{ArtifactStore, latest_candidate};
use crate::error::StoreError;
use crate::store::{JobLocator, JobRepository};
use crate::types::TokenId;

/// Where one `generating` record ended up after a sweep.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ReconcileOutcome {
    /// Completed with the bytes of `filename`.
    Patched { filename: String },
    /// No artifact of the token exists yet; the record is untouched.
    NoCandidateFile,
    /// The record was no longer `generating` when the patch was applied.
    PatchNoOp { filename: String },
    /// Reading the artifact or writing the record failed; the record is untouched.
    Failed { reason: String },
}

impl fmt::Display for ReconcileOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReconcileOutcome::Patched { filename } => write!(f, "patched with {filename}"),
            ReconcileOutcome::NoCandidateFile => f.write_str("no candidate file"),
            ReconcileOutcome::PatchNoOp { filename } => {
                write!(f, "patch with {filename} modified nothing")
            }
            ReconcileOutcome::Failed { reason } => write!(f, "failed: {reason}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReconcileEntry {
    pub user_id: String,
    pub record_index: u32,
    #[serde(flatten)]
    pub outcome: ReconcileOutcome,
}

/// Result of one sweep over a token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    pub token_id: TokenId,
    pub entries: Vec<ReconcileEntry>,
}

impl ReconcileReport {
    fn count(&self, pred: impl Fn(&ReconcileOutcome) -> bool) -> usize {
        self.entries.iter().filter(|e| pred(&e.outcome)).count()
    }

    pub fn patched(&self) -> usize {
        self.count(|o| matches!(o, ReconcileOutcome::Patched { .. }))
    }

    pub fn no_candidate(&self) -> usize {
        self.count(|o| matches!(o, ReconcileOutcome::NoCandidateFile))
    }

    pub fn no_op(&self) -> usize {
        self.count(|o| matches!(o, ReconcileOutcome::PatchNoOp { .. }))
    }

    pub fn failed(&self) -> usize {
        self.count(|o| matches!(o, ReconcileOutcome::Failed { .. }))
    }
}

#[derive(Clone)]
pub struct ReconciliationJob {
    artifacts: Arc<dyn ArtifactStore>,
    jobs: Arc<dyn JobRepository>,
}

impl ReconciliationJob {
    pub fn new(artifacts: Arc<dyn ArtifactStore>, jobs: Arc<dyn JobRepository>) -> Self {
        Self { artifacts, jobs }
    }

    /// Reconcile every `generating` record of `token_id`.
    ///
    /// Only the initial query can fail the sweep; per-record problems are
    /// reported in the returned entries and the sweep moves on.
    pub async fn run(&self, token_id: &TokenId) -> Result<ReconcileReport, StoreError> {
        let pending = self.jobs.find_generating(token_id).await?;
        info!(%token_id, pending = pending.len(), "reconciling generating records");

        let mut entries = Vec::with_capacity(pending.len());
        for locator in pending {
            let outcome = self.reconcile_one(token_id, &locator).await;
            match &outcome {
                ReconcileOutcome::Patched { filename } => info!(
                    user_id = %locator.user_id,
                    record_index = locator.record_index,
                    %filename,
                    "record completed from artifact"
                ),
                ReconcileOutcome::NoCandidateFile => info!(
                    user_id = %locator.user_id,
                    record_index = locator.record_index,
                    "no artifact yet; record left generating"
                ),
                ReconcileOutcome::PatchNoOp { filename } => warn!(
                    user_id = %locator.user_id,
                    record_index = locator.record_index,
                    %filename,
                    "patch modified nothing; record completed or removed concurrently"
                ),
                ReconcileOutcome::Failed { reason } => warn!(
                    user_id = %locator.user_id,
                    record_index = locator.record_index,
                    %reason,
                    "record not reconciled"
                ),
            }
            entries.push(ReconcileEntry {
                user_id: locator.user_id,
                record_index: locator.record_index,
                outcome,
            });
        }

        let report = ReconcileReport { token_id: token_id.clone(), entries };
        info!(
            %token_id,
            patched = report.patched(),
            no_candidate = report.no_candidate(),
            no_op = report.no_op(),
            failed = report.failed(),
            "reconciliation finished"
        );
        Ok(report)
    }

    /// Reconcile every token that currently has a `generating` record.
    pub async fn run_all(&self) -> Result<Vec<ReconcileReport>, StoreError> {
        let tokens = self.jobs.generating_tokens().await?;
        let mut reports = Vec::with_capacity(tokens.len());
        for token_id in &tokens {
            reports.push(self.run(token_id).await?);
        }
        Ok(reports)
    }

    async fn reconcile_one(&self, token_id: &TokenId, locator: &JobLocator) -> ReconcileOutcome {
        let candidates = match self.artifacts.list_candidates(token_id).await {
            Ok(c) => c,
            Err(e) => return ReconcileOutcome::Failed { reason: e.to_string() },
        };
        let Some(latest) = latest_candidate(&candidates) else {
            return ReconcileOutcome::NoCandidateFile;
        };
        let filename = latest.filename.clone();

        let bytes = match self.artifacts.read(&filename).await {
            Ok(b) => b,
            Err(e) => return ReconcileOutcome::Failed { reason: e.to_string() },
        };

        match self
            .jobs
            .patch_to_completed(&locator.user_id, token_id, &STANDARD.encode(&bytes), Some(&filename))
            .await
        {
            Ok(true) => ReconcileOutcome::Patched { filename },
            Ok(false) => ReconcileOutcome::PatchNoOp { filename },
            Err(e) => ReconcileOutcome::Failed { reason: e.to_string() },
        }
    }
}

// ── Tests ──────────────────────────────────────────────────────────────────────
