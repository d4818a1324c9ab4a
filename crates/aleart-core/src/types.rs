//! Domain types shared by the store, the generation service and the HTTP layer.

use std::convert::Infallible;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::error::{GenerationError, StoreError};

pub const DEFAULT_STEPS: u32 = 20;
pub const DEFAULT_GUIDANCE_SCALE: f64 = 7.5;
pub const DEFAULT_DIMENSION: u32 = 512;
pub const UNKNOWN_TOKEN: &str = "unknown";

const MAX_STEPS: u32 = 150;
const MIN_DIMENSION: u32 = 64;
const MAX_DIMENSION: u32 = 2048;
const MAX_GUIDANCE_SCALE: f64 = 30.0;

// ── TokenId ───────────────────────────────────────────────────────────────────

/// Identifier of the external entity an image represents.
///
/// Clients send either a JSON integer or a string; the two are never
/// considered equal (`5` is not `"5"`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(untagged)]
pub enum TokenId {
    Number(i64),
    Text(String),
}

impl Default for TokenId {
    fn default() -> Self {
        TokenId::Text(UNKNOWN_TOKEN.to_owned())
    }
}

impl fmt::Display for TokenId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TokenId::Number(n) => write!(f, "{n}"),
            TokenId::Text(s) => f.write_str(s),
        }
    }
}

/// Parses the loose form used in query strings and on the command line:
/// anything that reads as an integer is a numeric token.
impl FromStr for TokenId {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        Ok(match trimmed.parse::<i64>() {
            Ok(n) => TokenId::Number(n),
            Err(_) => TokenId::Text(trimmed.to_owned()),
        })
    }
}

impl From<i64> for TokenId {
    fn from(n: i64) -> Self {
        TokenId::Number(n)
    }
}

impl From<&str> for TokenId {
    fn from(s: &str) -> Self {
        TokenId::Text(s.to_owned())
    }
}

impl TokenId {
    /// JSON encoding used as the database key.
    pub fn storage_key(&self) -> String {
        match self {
            TokenId::Number(n) => n.to_string(),
            TokenId::Text(s) => serde_json::Value::String(s.clone()).to_string(),
        }
    }

    pub fn from_storage_key(key: &str) -> Result<Self, StoreError> {
        serde_json::from_str(key)
            .map_err(|e| StoreError::Corrupt(format!("token id {key:?}: {e}")))
    }

    /// Filesystem-safe form used in artifact filenames.
    ///
    /// Not injective: `Number(5)` and `Text("5")` share a stem, as do `"a b"`
    /// and `"a_b"`.
    pub fn file_stem(&self) -> String {
        self.to_string()
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect()
    }
}

// ── JobStatus ─────────────────────────────────────────────────────────────────

/// Lifecycle state of a job record.
///
/// `generating → completed` or `generating → failed`; both are terminal.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    ToSchema,
    strum::Display,
    strum::EnumString,
    strum::AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum JobStatus {
    Generating,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

// ── GenerationParameters ──────────────────────────────────────────────────────

/// Sampling parameters recorded with every job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct GenerationParameters {
    pub steps: u32,
    /// Classifier-free guidance scale.
    #[serde(rename = "cfg_scale")]
    pub guidance_scale: f64,
    /// `None` lets the synthesizer pick a random seed.
    pub seed: Option<u64>,
    pub width: u32,
    pub height: u32,
}

impl Default for GenerationParameters {
    fn default() -> Self {
        Self {
            steps: DEFAULT_STEPS,
            guidance_scale: DEFAULT_GUIDANCE_SCALE,
            seed: None,
            width: DEFAULT_DIMENSION,
            height: DEFAULT_DIMENSION,
        }
    }
}

impl GenerationParameters {
    /// Reject combinations no synthesizer run should be spent on.
    pub fn validate(&self) -> Result<(), GenerationError> {
        if self.steps == 0 || self.steps > MAX_STEPS {
            return Err(GenerationError::InvalidRequest(format!(
                "steps must be between 1 and {MAX_STEPS} (got {})",
                self.steps
            )));
        }
        if !self.guidance_scale.is_finite()
            || !(0.0..=MAX_GUIDANCE_SCALE).contains(&self.guidance_scale)
        {
            return Err(GenerationError::InvalidRequest(format!(
                "cfg_scale must be between 0 and {MAX_GUIDANCE_SCALE} (got {})",
                self.guidance_scale
            )));
        }
        for (name, value) in [("width", self.width), ("height", self.height)] {
            if !(MIN_DIMENSION..=MAX_DIMENSION).contains(&value) || value % 8 != 0 {
                return Err(GenerationError::InvalidRequest(format!(
                    "{name} must be a multiple of 8 between {MIN_DIMENSION} and {MAX_DIMENSION} (got {value})"
                )));
            }
        }
        Ok(())
    }
}

// ── JobRecord ─────────────────────────────────────────────────────────────────

/// One element of a user's `generatedImages` list.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct JobRecord {
    pub user_id: String,
    /// Position of the record in the user's list.
    pub record_index: u32,
    pub token_id: TokenId,
    pub status: JobStatus,
    /// Base64 image bytes; present iff `status == completed`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_data: Option<String>,
    /// Filename of the embedded artifact, when known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artifact: Option<String>,
    pub prompt: String,
    pub parameters: GenerationParameters,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// ── Tests ──────────────────────────────────────────────────────────────────────
