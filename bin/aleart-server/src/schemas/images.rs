use aleart_core::types::{DEFAULT_DIMENSION, DEFAULT_GUIDANCE_SCALE, DEFAULT_STEPS};
use aleart_core::{
    GenerationParameters, GenerationRequest, GenerationResult, JobRecord, JobStatus, TokenId,
    artifact_url, data_uri,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

/// Request body for `POST /generate-image` and `POST /generate-image-async`.
///
/// Every key is optional; `null` counts as absent.
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct GenerateImageRequest {
    /// Text description of the desired image (default `""`).
    #[serde(default)]
    pub prompt: Option<String>,
    /// Sampling steps (default `20`).
    #[serde(default)]
    pub steps: Option<u32>,
    /// Guidance scale (default `7.5`).
    #[serde(default)]
    pub cfg_scale: Option<f64>,
    /// Fixed seed; random when absent.
    #[serde(default)]
    pub seed: Option<u64>,
    /// Image width in pixels (default `512`).
    #[serde(default)]
    pub width: Option<u32>,
    /// Image height in pixels (default `512`).
    #[serde(default)]
    pub height: Option<u32>,
    /// Integer or string identifier of the external entity (default `"unknown"`).
    #[serde(default, rename = "tokenId")]
    pub token_id: Option<TokenId>,
    /// Owning user; blank counts as absent.
    #[serde(default, rename = "userId")]
    pub user_id: Option<String>,
}

impl From<GenerateImageRequest> for GenerationRequest {
    fn from(req: GenerateImageRequest) -> Self {
        GenerationRequest {
            prompt: req.prompt.unwrap_or_default(),
            parameters: GenerationParameters {
                steps: req.steps.unwrap_or(DEFAULT_STEPS),
                guidance_scale: req.cfg_scale.unwrap_or(DEFAULT_GUIDANCE_SCALE),
                seed: req.seed,
                width: req.width.unwrap_or(DEFAULT_DIMENSION),
                height: req.height.unwrap_or(DEFAULT_DIMENSION),
            },
            token_id: req.token_id.unwrap_or_default(),
            user_id: req.user_id,
        }
    }
}

/// Response body of `POST /generate-image`.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct GenerateImageResponse {
    pub success: bool,
    /// Relative URL of the stored file, `/generated_images/<filename>`.
    pub image_url: String,
    /// The image as a `data:image/png;base64,` URI.
    pub image_base64: String,
    pub token_id: TokenId,
    pub prompt: String,
    pub parameters: GenerationParameters,
}

impl From<GenerationResult> for GenerateImageResponse {
    fn from(result: GenerationResult) -> Self {
        Self {
            success: true,
            image_base64: result.data_uri(),
            image_url: result.image_url,
            token_id: result.token_id,
            prompt: result.prompt,
            parameters: result.parameters,
        }
    }
}

/// Response body of `POST /generate-image-async` (HTTP 202).
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SubmitImageResponse {
    pub success: bool,
    pub status: JobStatus,
    pub user_id: String,
    pub token_id: TokenId,
    /// Position of the new record in the user's list.
    pub record_index: u32,
}

/// Query of `GET /images`.
#[derive(Debug, Clone, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct ImagesQuery {
    #[serde(rename = "userId")]
    pub user_id: String,
    /// Restrict to one token; integer-looking values match integer tokens.
    #[serde(default, rename = "tokenId")]
    pub token_id: Option<String>,
}

/// One job record as returned by `GET /images`.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ImageRecordView {
    pub record_index: u32,
    pub token_id: TokenId,
    pub status: JobStatus,
    /// `data:image/png;base64,` URI, present once completed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_data: Option<String>,
    /// URL of the embedded artifact, when known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    pub prompt: String,
    pub parameters: GenerationParameters,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<JobRecord> for ImageRecordView {
    fn from(record: JobRecord) -> Self {
        Self {
            record_index: record.record_index,
            token_id: record.token_id,
            status: record.status,
            image_data: record.image_data.as_deref().map(data_uri),
            image_url: record.artifact.as_deref().map(artifact_url),
            prompt: record.prompt,
            parameters: record.parameters,
            error: record.error,
            created_at: record.created_at,
            updated_at: record.updated_at,
        }
    }
}

/// Response body of `GET /images`.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ImagesResponse {
    pub success: bool,
    pub user_id: String,
    /// Newest first.
    pub images: Vec<ImageRecordView>,
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn empty_body_resolves_to_defaults() {
        let req: GenerationRequest = serde_json::from_str::<GenerateImageRequest>("{}")
            .unwrap()
            .into();
        assert_eq!(req.prompt, "");
        assert_eq!(req.parameters, GenerationParameters::default());
        assert_eq!(req.token_id, TokenId::Text("unknown".into()));
        assert!(req.owner().is_none());
    }

    #[test]
    fn null_fields_count_as_absent() {
        let body = r#"{"prompt":"fox","steps":null,"seed":null,"tokenId":7,"userId":null}"#;
        let req: GenerationRequest = serde_json::from_str::<GenerateImageRequest>(body)
            .unwrap()
            .into();
        assert_eq!(req.parameters.steps, 20);
        assert_eq!(req.parameters.seed, None);
        assert_eq!(req.token_id, TokenId::Number(7));
    }

    #[test]
    fn seed_zero_is_kept() {
        let req: GenerationRequest =
            serde_json::from_str::<GenerateImageRequest>(r#"{"seed":0,"cfg_scale":3.5}"#)
                .unwrap()
                .into();
        assert_eq!(req.parameters.seed, Some(0));
        assert_eq!(req.parameters.guidance_scale, 3.5);
    }
}
