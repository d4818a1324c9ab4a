//! SQLite implementation of [`JobRepository`].
//!
//! Uses [`sqlx`] with the `sqlite` feature. Migrations are embedded at
//! compile time from `./migrations` and run by [`SqliteJobStore::connect`].
//!
//! The runtime-checked `sqlx::query` form is used so no `DATABASE_URL` is
//! needed at compile time.

use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::{Sqlite, Transaction};
use tracing::warn;
use uuid::Uuid;

use super::{JobLocator, JobRepository, NewJobRecord};
use crate::error::StoreError;
use crate::types::{GenerationParameters, JobRecord, JobStatus, TokenId};

const RECORD_COLUMNS: &str = "user_id, position, token_id, status, image_data, artifact, \
                              prompt, parameters, error_msg, created_at, updated_at";

type RecordRow = (
    String,
    i64,
    String,
    String,
    Option<String>,
    Option<String>,
    String,
    String,
    Option<String>,
    String,
    String,
);

/// SQLite-backed job-record store.
#[derive(Clone, Debug)]
pub struct SqliteJobStore {
    pool: SqlitePool,
}

impl SqliteJobStore {
    /// Open (or create) the database at `url` and run pending migrations.
    ///
    /// `url` is a sqlx SQLite URL, e.g. `"sqlite://aleart.db"` or
    /// `"sqlite::memory:"` for tests.
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str(url)?
            .create_if_missing(true)
            .foreign_keys(true);

        // Each connection to `:memory:` is its own database; keep exactly one alive.
        let pool_options = if url.contains(":memory:") {
            SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            SqlitePoolOptions::new().max_connections(8)
        };

        let pool = pool_options.connect_with(options).await?;
        sqlx::migrate!("./migrations").run(&pool).await?;
        Ok(Self { pool })
    }

    async fn upsert_user(
        tx: &mut Transaction<'_, Sqlite>,
        user_id: &str,
        now: &str,
    ) -> Result<(), StoreError> {
        sqlx::query("INSERT INTO users (id, created_at) VALUES (?1, ?2) ON CONFLICT(id) DO NOTHING")
            .bind(user_id)
            .bind(now)
            .execute(&mut **tx)
            .await?;
        Ok(())
    }

    async fn append_record(
        &self,
        record: &NewJobRecord,
        status: JobStatus,
        image_base64: Option<&str>,
        artifact: Option<&str>,
    ) -> Result<JobLocator, StoreError> {
        let now = Utc::now().to_rfc3339();
        let parameters = encode_parameters(&record.parameters)?;

        let mut tx = self.pool.begin().await?;
        Self::upsert_user(&mut tx, &record.user_id, &now).await?;

        let position: i64 = sqlx::query_scalar(
            "INSERT INTO generated_images \
                 (user_id, position, token_id, status, image_data, artifact, prompt, parameters, created_at, updated_at) \
             SELECT ?1, COALESCE(MAX(position) + 1, 0), ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8 \
             FROM generated_images WHERE user_id = ?1 \
             RETURNING position",
        )
        .bind(&record.user_id)
        .bind(record.token_id.storage_key())
        .bind(status.as_ref())
        .bind(image_base64)
        .bind(artifact)
        .bind(&record.prompt)
        .bind(&parameters)
        .bind(&now)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(db) if db.is_unique_violation() => StoreError::AlreadyGenerating {
                user_id: record.user_id.clone(),
                token_id: record.token_id.clone(),
            },
            other => StoreError::Database(other),
        })?;

        tx.commit().await?;

        Ok(JobLocator {
            user_id: record.user_id.clone(),
            record_index: decode_position(position)?,
        })
    }

    /// Conditional transition out of `generating` for the user's first
    /// in-flight record of `token_id`.
    async fn finish_generating(
        &self,
        user_id: &str,
        token_id: &TokenId,
        status: JobStatus,
        image_base64: Option<&str>,
        artifact: Option<&str>,
        error: Option<&str>,
    ) -> Result<bool, StoreError> {
        let updated_at = Utc::now().to_rfc3339();
        let result = sqlx::query(
            "UPDATE generated_images \
             SET status = ?1, image_data = ?2, artifact = COALESCE(?3, artifact), error_msg = ?4, updated_at = ?5 \
             WHERE id = ( \
                 SELECT id FROM generated_images \
                 WHERE user_id = ?6 AND token_id = ?7 AND status = 'generating' \
                 ORDER BY position LIMIT 1 \
             ) AND status = 'generating'",
        )
        .bind(status.as_ref())
        .bind(image_base64)
        .bind(artifact)
        .bind(error)
        .bind(&updated_at)
        .bind(user_id)
        .bind(token_id.storage_key())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }
}

#[async_trait]
impl JobRepository for SqliteJobStore {
    async fn insert_completed(
        &self,
        record: NewJobRecord,
        image_base64: &str,
        artifact: Option<&str>,
    ) -> Result<JobLocator, StoreError> {
        self.append_record(&record, JobStatus::Completed, Some(image_base64), artifact)
            .await
    }

    async fn insert_generating(&self, record: NewJobRecord) -> Result<JobLocator, StoreError> {
        self.append_record(&record, JobStatus::Generating, None, None).await
    }

    async fn insert_unowned(
        &self,
        token_id: &TokenId,
        image_base64: &str,
        prompt: &str,
        parameters: &GenerationParameters,
    ) -> Result<String, StoreError> {
        let id = Uuid::new_v4().to_string();
        sqlx::query(
            "INSERT INTO unowned_images (id, token_id, image_data, prompt, parameters, status, created_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        )
        .bind(&id)
        .bind(token_id.storage_key())
        .bind(image_base64)
        .bind(prompt)
        .bind(encode_parameters(parameters)?)
        .bind(JobStatus::Completed.as_ref())
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(id)
    }

    async fn find_generating(&self, token_id: &TokenId) -> Result<Vec<JobLocator>, StoreError> {
        let rows: Vec<(String, i64)> = sqlx::query_as(
            "SELECT user_id, position FROM generated_images \
             WHERE token_id = ?1 AND status = 'generating' \
             ORDER BY user_id, position",
        )
        .bind(token_id.storage_key())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|(user_id, position)| {
                Ok(JobLocator { user_id, record_index: decode_position(position)? })
            })
            .collect()
    }

    async fn generating_tokens(&self) -> Result<Vec<TokenId>, StoreError> {
        let keys: Vec<(String,)> = sqlx::query_as(
            "SELECT DISTINCT token_id FROM generated_images WHERE status = 'generating' ORDER BY token_id",
        )
        .fetch_all(&self.pool)
        .await?;
        keys.iter().map(|(k,)| TokenId::from_storage_key(k)).collect()
    }

    async fn patch_to_completed(
        &self,
        user_id: &str,
        token_id: &TokenId,
        image_base64: &str,
        artifact: Option<&str>,
    ) -> Result<bool, StoreError> {
        self.finish_generating(
            user_id,
            token_id,
            JobStatus::Completed,
            Some(image_base64),
            artifact,
            None,
        )
        .await
    }

    async fn mark_failed(
        &self,
        user_id: &str,
        token_id: &TokenId,
        error: &str,
    ) -> Result<bool, StoreError> {
        self.finish_generating(user_id, token_id, JobStatus::Failed, None, None, Some(error))
            .await
    }

    async fn list_user_records(
        &self,
        user_id: &str,
        token_id: Option<&TokenId>,
    ) -> Result<Vec<JobRecord>, StoreError> {
        let rows: Vec<RecordRow> = if let Some(token) = token_id {
            sqlx::query_as(&format!(
                "SELECT {RECORD_COLUMNS} FROM generated_images \
                 WHERE user_id = ?1 AND token_id = ?2 ORDER BY position DESC"
            ))
            .bind(user_id)
            .bind(token.storage_key())
            .fetch_all(&self.pool)
            .await?
        } else {
            sqlx::query_as(&format!(
                "SELECT {RECORD_COLUMNS} FROM generated_images \
                 WHERE user_id = ?1 ORDER BY position DESC"
            ))
            .bind(user_id)
            .fetch_all(&self.pool)
            .await?
        };
        rows.into_iter().map(decode_record).collect()
    }
}

// ── private helpers ──────────────────────────────────────────────────────────

fn encode_parameters(parameters: &GenerationParameters) -> Result<String, StoreError> {
    serde_json::to_string(parameters)
        .map_err(|e| StoreError::Corrupt(format!("unencodable parameters: {e}")))
}

fn decode_position(position: i64) -> Result<u32, StoreError> {
    u32::try_from(position).map_err(|_| StoreError::Corrupt(format!("record position {position}")))
}

fn parse_timestamp(raw: &str, column: &str) -> DateTime<Utc> {
    raw.parse().unwrap_or_else(|e: chrono::ParseError| {
        warn!(%raw, %column, error = %e, "failed to parse job timestamp; using now");
        Utc::now()
    })
}

fn decode_record(row: RecordRow) -> Result<JobRecord, StoreError> {
    let (
        user_id,
        position,
        token_id,
        status,
        image_data,
        artifact,
        prompt,
        parameters,
        error,
        created_at,
        updated_at,
    ) = row;

    Ok(JobRecord {
        user_id,
        record_index: decode_position(position)?,
        token_id: TokenId::from_storage_key(&token_id)?,
        status: status
            .parse::<JobStatus>()
            .map_err(|_| StoreError::Corrupt(format!("unknown status {status:?}")))?,
        image_data,
        artifact,
        prompt,
        parameters: serde_json::from_str::<GenerationParameters>(&parameters)
            .map_err(|e| StoreError::Corrupt(format!("parameters: {e}")))?,
        error,
        created_at: parse_timestamp(&created_at, "created_at"),
        updated_at: parse_timestamp(&updated_at, "updated_at"),
    })
}

// ── Tests ──────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod test {
    use super::*;

    async fn store() -> SqliteJobStore {
        SqliteJobStore::connect("sqlite::memory:").await.unwrap()
    }

    fn new_record(user: &str, token: TokenId) -> NewJobRecord {
        NewJobRecord {
            user_id: user.to_owned(),
            token_id: token,
            prompt: "a lighthouse at dusk".to_owned(),
            parameters: GenerationParameters::default(),
        }
    }

    #[tokio::test]
    async fn completed_records_append_to_user_list() {
        let s = store().await;
        let a = s.insert_completed(new_record("u1", TokenId::Number(5)), "AAAA", Some("a.png")).await.unwrap();
        let b = s.insert_completed(new_record("u1", TokenId::Number(6)), "BBBB", None).await.unwrap();
        let c = s.insert_completed(new_record("u2", TokenId::Number(5)), "CCCC", None).await.unwrap();

        assert_eq!((a.record_index, b.record_index, c.record_index), (0, 1, 0));

        let records = s.list_user_records("u1", None).await.unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].token_id, TokenId::Number(6));
        assert_eq!(records[1].status, JobStatus::Completed);
        assert_eq!(records[1].image_data.as_deref(), Some("AAAA"));
        assert_eq!(records[1].artifact.as_deref(), Some("a.png"));
        assert_eq!(records[1].parameters, GenerationParameters::default());
    }

    #[tokio::test]
    async fn second_generating_record_for_same_token_is_rejected() {
        let s = store().await;
        s.insert_generating(new_record("u1", TokenId::Number(5))).await.unwrap();

        let err = s.insert_generating(new_record("u1", TokenId::Number(5))).await.unwrap_err();
        assert!(matches!(err, StoreError::AlreadyGenerating { .. }));

        // Other users and other tokens are unaffected.
        s.insert_generating(new_record("u2", TokenId::Number(5))).await.unwrap();
        s.insert_generating(new_record("u1", TokenId::Number(6))).await.unwrap();
    }

    #[tokio::test]
    async fn find_generating_spans_users_and_skips_finished() {
        let s = store().await;
        s.insert_generating(new_record("u1", TokenId::Number(5))).await.unwrap();
        s.insert_generating(new_record("u2", TokenId::Number(5))).await.unwrap();
        s.insert_completed(new_record("u3", TokenId::Number(5)), "done", None).await.unwrap();
        s.insert_generating(new_record("u3", TokenId::from("5"))).await.unwrap();

        let found = s.find_generating(&TokenId::Number(5)).await.unwrap();
        let users: Vec<_> = found.iter().map(|l| l.user_id.as_str()).collect();
        assert_eq!(users, ["u1", "u2"]);

        let tokens = s.generating_tokens().await.unwrap();
        assert_eq!(tokens.len(), 2);
        assert!(tokens.contains(&TokenId::Number(5)));
        assert!(tokens.contains(&TokenId::from("5")));
    }

    #[tokio::test]
    async fn patch_completes_exactly_once() {
        let s = store().await;
        s.insert_generating(new_record("u1", TokenId::Number(5))).await.unwrap();

        assert!(s.patch_to_completed("u1", &TokenId::Number(5), "IMG", Some("f.png")).await.unwrap());
        assert!(!s.patch_to_completed("u1", &TokenId::Number(5), "OTHER", None).await.unwrap());

        let records = s.list_user_records("u1", Some(&TokenId::Number(5))).await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].status, JobStatus::Completed);
        assert_eq!(records[0].image_data.as_deref(), Some("IMG"));
        assert_eq!(records[0].artifact.as_deref(), Some("f.png"));
        assert!(s.find_generating(&TokenId::Number(5)).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn patch_never_touches_completed_records() {
        let s = store().await;
        s.insert_completed(new_record("u1", TokenId::Number(5)), "ORIGINAL", None).await.unwrap();

        assert!(!s.patch_to_completed("u1", &TokenId::Number(5), "NEW", None).await.unwrap());
        let records = s.list_user_records("u1", None).await.unwrap();
        assert_eq!(records[0].image_data.as_deref(), Some("ORIGINAL"));
    }

    #[tokio::test]
    async fn racing_patches_modify_one_record() {
        let s = store().await;
        s.insert_generating(new_record("u1", TokenId::Number(5))).await.unwrap();

        let token = TokenId::Number(5);
        let (a, b) = tokio::join!(
            s.patch_to_completed("u1", &token, "A", None),
            s.patch_to_completed("u1", &token, "B", None),
        );
        let modified = [a.unwrap(), b.unwrap()].iter().filter(|m| **m).count();
        assert_eq!(modified, 1);
    }

    #[tokio::test]
    async fn failed_records_keep_no_image_and_free_the_token() {
        let s = store().await;
        s.insert_generating(new_record("u1", TokenId::Number(5))).await.unwrap();

        assert!(s.mark_failed("u1", &TokenId::Number(5), "CUDA out of memory").await.unwrap());
        assert!(!s.patch_to_completed("u1", &TokenId::Number(5), "late", None).await.unwrap());

        let records = s.list_user_records("u1", None).await.unwrap();
        assert_eq!(records[0].status, JobStatus::Failed);
        assert!(records[0].image_data.is_none());
        assert_eq!(records[0].error.as_deref(), Some("CUDA out of memory"));

        // A new attempt may start once the previous one failed.
        let retry = s.insert_generating(new_record("u1", TokenId::Number(5))).await.unwrap();
        assert_eq!(retry.record_index, 1);
    }

    #[tokio::test]
    async fn unowned_images_are_stored_separately() {
        let s = store().await;
        let id = s
            .insert_unowned(&TokenId::default(), "IMG", "p", &GenerationParameters::default())
            .await
            .unwrap();
        assert!(Uuid::parse_str(&id).is_ok());
        assert!(s.generating_tokens().await.unwrap().is_empty());
    }
}
