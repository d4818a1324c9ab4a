//! Job-record repository.
//!
//! [`JobRepository`] is the interface over per-user lists of job records. The
//! default implementation is [`sqlite::SqliteJobStore`]; another database can
//! be swapped in by implementing the trait, without touching callers.
//!
//! Every state change out of `generating` is a single conditional update that
//! matches only records still `generating`, so concurrent writers cannot both
//! complete the same record.

pub mod sqlite;

use async_trait::async_trait;

use crate::error::StoreError;
use crate::types::{GenerationParameters, JobRecord, TokenId};

/// Address of a record: its owner and its index in the owner's list.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct JobLocator {
    pub user_id: String,
    pub record_index: u32,
}

/// Fields of a record fixed at creation time.
#[derive(Debug, Clone)]
pub struct NewJobRecord {
    pub user_id: String,
    pub token_id: TokenId,
    pub prompt: String,
    pub parameters: GenerationParameters,
}

#[async_trait]
pub trait JobRepository: Send + Sync + 'static {
    /// Append a `completed` record to the user's list, creating the user if needed.
    async fn insert_completed(
        &self,
        record: NewJobRecord,
        image_base64: &str,
        artifact: Option<&str>,
    ) -> Result<JobLocator, StoreError>;

    /// Append a `generating` record. Fails with [`StoreError::AlreadyGenerating`]
    /// when the user already has one for this token.
    async fn insert_generating(&self, record: NewJobRecord) -> Result<JobLocator, StoreError>;

    /// Store an image document that has no owning user. Returns its id.
    async fn insert_unowned(
        &self,
        token_id: &TokenId,
        image_base64: &str,
        prompt: &str,
        parameters: &GenerationParameters,
    ) -> Result<String, StoreError>;

    /// Every `generating` record of `token_id`, across all users.
    async fn find_generating(&self, token_id: &TokenId) -> Result<Vec<JobLocator>, StoreError>;

    /// Tokens that currently have at least one `generating` record.
    async fn generating_tokens(&self) -> Result<Vec<TokenId>, StoreError>;

    /// Complete the user's `generating` record for `token_id`.
    ///
    /// Returns `false` when no record was modified (none generating any more).
    async fn patch_to_completed(
        &self,
        user_id: &str,
        token_id: &TokenId,
        image_base64: &str,
        artifact: Option<&str>,
    ) -> Result<bool, StoreError>;

    /// Fail the user's `generating` record for `token_id`. Same matching rule
    /// as [`JobRepository::patch_to_completed`].
    async fn mark_failed(
        &self,
        user_id: &str,
        token_id: &TokenId,
        error: &str,
    ) -> Result<bool, StoreError>;

    /// The user's records, newest first, optionally limited to one token.
    async fn list_user_records(
        &self,
        user_id: &str,
        token_id: Option<&TokenId>,
    ) -> Result<Vec<JobRecord>, StoreError>;
}
