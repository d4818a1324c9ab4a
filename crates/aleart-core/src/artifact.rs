//! Generated image files on local storage.
//!
//! Every artifact of a token is named `art_token_<token>_<8 hex>.png`, so the
//! files of one token can be enumerated by prefix. Files are only ever
//! created, listed and read; nothing here deletes or rewrites them.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::ArtifactError;
use crate::types::TokenId;

pub const ARTIFACT_PREFIX: &str = "art_token_";
pub const ARTIFACT_EXTENSION: &str = ".png";
const SUFFIX_LEN: usize = 8;
const MAX_NAME_ATTEMPTS: usize = 8;

/// An artifact file that may belong to a token, with its creation time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactCandidate {
    pub filename: String,
    pub created_at: DateTime<Utc>,
}

/// Storage for generated image bytes.
#[async_trait]
pub trait ArtifactStore: Send + Sync + 'static {
    /// Write `bytes` under a fresh name for `token_id` and return the filename.
    /// Never overwrites an existing file.
    async fn store(&self, token_id: &TokenId, bytes: &[u8]) -> Result<String, ArtifactError>;

    /// All artifacts of `token_id`, oldest first.
    async fn list_candidates(
        &self,
        token_id: &TokenId,
    ) -> Result<Vec<ArtifactCandidate>, ArtifactError>;

    /// Read an artifact by filename.
    async fn read(&self, filename: &str) -> Result<Vec<u8>, ArtifactError>;
}

/// `art_token_<token>_`
pub fn artifact_prefix(token_id: &TokenId) -> String {
    format!("{ARTIFACT_PREFIX}{}_", token_id.file_stem())
}

/// Whether `filename` is an artifact of `token_id`: the token prefix followed
/// by exactly the random suffix and extension. Token `5` does not claim
/// `art_token_5_1_abcd1234.png`.
pub fn is_artifact_of(filename: &str, token_id: &TokenId) -> bool {
    filename
        .strip_prefix(&artifact_prefix(token_id))
        .and_then(|rest| rest.strip_suffix(ARTIFACT_EXTENSION))
        .is_some_and(|suffix| {
            suffix.len() == SUFFIX_LEN && suffix.chars().all(|c| c.is_ascii_hexdigit())
        })
}

/// The most recently created candidate. Equal timestamps resolve to the one
/// listed last.
pub fn latest_candidate(candidates: &[ArtifactCandidate]) -> Option<&ArtifactCandidate> {
    candidates.iter().max_by_key(|c| c.created_at)
}

fn new_filename(token_id: &TokenId) -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!(
        "{}{}{ARTIFACT_EXTENSION}",
        artifact_prefix(token_id),
        &suffix[..SUFFIX_LEN]
    )
}

/// A bare filename that cannot escape the storage directory.
fn is_plain_filename(filename: &str) -> bool {
    !filename.is_empty()
        && !filename.contains(['/', '\\'])
        && filename != "."
        && !filename.contains("..")
}

// ── LocalArtifactStore ────────────────────────────────────────────────────────

/// Artifact store backed by a single local directory.
#[derive(Debug, Clone)]
pub struct LocalArtifactStore {
    root: PathBuf,
}

impl LocalArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

#[async_trait]
impl ArtifactStore for LocalArtifactStore {
    async fn store(&self, token_id: &TokenId, bytes: &[u8]) -> Result<String, ArtifactError> {
        tokio::fs::create_dir_all(&self.root)
            .await
            .map_err(|source| ArtifactError::Write { path: self.root.clone(), source })?;

        let mut last_path = self.root.clone();
        for _ in 0..MAX_NAME_ATTEMPTS {
            let filename = new_filename(token_id);
            let path = self.root.join(&filename);
            let file = tokio::fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&path)
                .await;
            let mut file = match file {
                Ok(f) => f,
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                    debug!(%filename, "artifact name taken; drawing a new suffix");
                    last_path = path;
                    continue;
                }
                Err(source) => return Err(ArtifactError::Write { path, source }),
            };

            let written = async {
                file.write_all(bytes).await?;
                file.flush().await
            }
            .await;
            if let Err(source) = written {
                return Err(ArtifactError::Write { path, source });
            }

            debug!(%filename, bytes = bytes.len(), "artifact stored");
            return Ok(filename);
        }

        Err(ArtifactError::Write {
            path: last_path,
            source: std::io::Error::new(ErrorKind::AlreadyExists, "no free artifact name"),
        })
    }

    async fn list_candidates(
        &self,
        token_id: &TokenId,
    ) -> Result<Vec<ArtifactCandidate>, ArtifactError> {
        let io_err = |source: std::io::Error| ArtifactError::Io { path: self.root.clone(), source };

        let mut entries = match tokio::fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(io_err(e)),
        };

        let mut candidates = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(io_err)? {
            let Some(filename) = entry.file_name().to_str().map(str::to_owned) else {
                continue;
            };
            if !is_artifact_of(&filename, token_id) {
                continue;
            }
            let metadata = match entry.metadata().await {
                Ok(m) if m.is_file() => m,
                Ok(_) => continue,
                Err(e) => {
                    warn!(%filename, error = %e, "skipping unreadable artifact");
                    continue;
                }
            };
            // Birth time is not available on every filesystem.
            let Ok(created) = metadata.created().or_else(|_| metadata.modified()) else {
                warn!(%filename, "artifact has no timestamp; skipping");
                continue;
            };
            candidates.push(ArtifactCandidate {
                filename,
                created_at: DateTime::<Utc>::from(created),
            });
        }

        candidates.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.filename.cmp(&b.filename))
        });
        Ok(candidates)
    }

    async fn read(&self, filename: &str) -> Result<Vec<u8>, ArtifactError> {
        if !is_plain_filename(filename) {
            return Err(ArtifactError::NotFound(filename.to_owned()));
        }
        let path = self.root.join(filename);
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                Err(ArtifactError::NotFound(filename.to_owned()))
            }
            Err(source) => Err(ArtifactError::Io { path, source }),
        }
    }
}

// ── Tests ──────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod test {
    use super::*;
    use chrono::TimeZone;

    fn candidate(name: &str, secs: i64) -> ArtifactCandidate {
        ArtifactCandidate {
            filename: name.to_owned(),
            created_at: Utc.timestamp_opt(secs, 0).unwrap(),
        }
    }

    #[test]
    fn prefix_match_requires_exact_suffix() {
        let five = TokenId::Number(5);
        assert!(is_artifact_of("art_token_5_abcd1234.png", &five));
        assert!(!is_artifact_of("art_token_5_1_abcd1234.png", &five));
        assert!(!is_artifact_of("art_token_55_abcd1234.png", &five));
        assert!(!is_artifact_of("art_token_5_abcd1234.jpg", &five));
        assert!(!is_artifact_of("art_token_5_zzzz1234.png", &five));
    }

    #[test]
    fn latest_candidate_picks_max_timestamp() {
        let c = [candidate("a", 100), candidate("b", 300), candidate("c", 200)];
        assert_eq!(latest_candidate(&c).unwrap().filename, "b");
        assert!(latest_candidate(&[]).is_none());
    }

    #[test]
    fn latest_candidate_tie_resolves_to_last_listed() {
        let c = [candidate("a", 100), candidate("b", 300), candidate("c", 300)];
        assert_eq!(latest_candidate(&c).unwrap().filename, "c");
    }

    #[tokio::test]
    async fn store_creates_directory_and_unique_names() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalArtifactStore::new(dir.path().join("generated_images"));
        let token = TokenId::Number(7);

        let first = store.store(&token, b"one").await.unwrap();
        let second = store.store(&token, b"two").await.unwrap();

        assert_ne!(first, second);
        assert!(is_artifact_of(&first, &token));
        assert_eq!(store.read(&first).await.unwrap(), b"one");
        assert_eq!(store.read(&second).await.unwrap(), b"two");
    }

    #[tokio::test]
    async fn list_candidates_filters_by_token() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalArtifactStore::new(dir.path());
        let five = TokenId::Number(5);

        let mine = store.store(&five, b"x").await.unwrap();
        store.store(&TokenId::Number(51), b"y").await.unwrap();
        tokio::fs::write(dir.path().join("notes.txt"), b"z").await.unwrap();

        let listed = store.list_candidates(&five).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].filename, mine);
    }

    #[tokio::test]
    async fn list_candidates_on_missing_directory_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalArtifactStore::new(dir.path().join("absent"));
        assert!(store.list_candidates(&TokenId::Number(1)).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn read_missing_or_escaping_name_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalArtifactStore::new(dir.path());
        for name in ["art_token_1_00000000.png", "../secret", "a/b.png", ""] {
            assert!(
                matches!(store.read(name).await, Err(ArtifactError::NotFound(_))),
                "{name:?}"
            );
        }
    }
}
