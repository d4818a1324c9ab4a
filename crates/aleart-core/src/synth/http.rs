//! [`Synthesizer`] backed by an AUTOMATIC1111-compatible Stable Diffusion web API.

use std::time::Duration;

use async_trait::async_trait;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use super::{Synthesizer, SynthesizerInfo};
use crate::error::SynthesisError;
use crate::types::GenerationParameters;

#[derive(Debug, Serialize)]
struct Txt2ImgRequest<'a> {
    prompt: &'a str,
    steps: u32,
    cfg_scale: f64,
    /// `-1` asks the sampler for a random seed.
    seed: i64,
    width: u32,
    height: u32,
    batch_size: u32,
    n_iter: u32,
}

#[derive(Debug, Deserialize)]
struct Txt2ImgResponse {
    #[serde(default)]
    images: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct SdModel {
    title: String,
    model_name: String,
}

/// HTTP client for a local diffusion web service.
#[derive(Debug, Clone)]
pub struct HttpSynthesizer {
    client: reqwest::Client,
    base_url: String,
    /// Checkpoint to select on load; the service's current one when `None`.
    model: Option<String>,
}

impl HttpSynthesizer {
    pub fn new(base_url: impl Into<String>, model: Option<String>) -> Result<Self, SynthesisError> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_owned(),
            model,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    async fn error_for_status(response: reqwest::Response) -> Result<reqwest::Response, String> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(format!("HTTP {status}: {body}"))
    }

    /// CUDA availability as reported by the service; `false` when unknown.
    async fn probe_memory(&self) -> bool {
        let response = match self.client.get(self.url("/sdapi/v1/memory")).send().await {
            Ok(r) => r,
            Err(e) => {
                warn!(error = %e, "memory probe failed; assuming no accelerator");
                return false;
            }
        };
        match response.json::<Value>().await {
            Ok(v) => v["cuda"]["system"].is_object() && v["cuda"]["error"].is_null(),
            Err(e) => {
                warn!(error = %e, "unreadable memory probe; assuming no accelerator");
                false
            }
        }
    }
}

#[async_trait]
impl Synthesizer for HttpSynthesizer {
    async fn load(&self) -> Result<SynthesizerInfo, SynthesisError> {
        let response = self
            .client
            .get(self.url("/sdapi/v1/sd-models"))
            .send()
            .await
            .map_err(|e| SynthesisError::Init(format!("diffusion service unreachable: {e}")))?;
        let models: Vec<SdModel> = Self::error_for_status(response)
            .await
            .map_err(SynthesisError::Init)?
            .json()
            .await?;

        let model = match &self.model {
            Some(wanted) => {
                let found = models
                    .iter()
                    .find(|m| &m.title == wanted || &m.model_name == wanted)
                    .ok_or_else(|| SynthesisError::Init(format!("checkpoint {wanted} not available")))?;
                info!(checkpoint = %found.title, "selecting checkpoint");
                let response = self
                    .client
                    .post(self.url("/sdapi/v1/options"))
                    .json(&serde_json::json!({ "sd_model_checkpoint": found.title }))
                    .send()
                    .await?;
                Self::error_for_status(response)
                    .await
                    .map_err(SynthesisError::Init)?;
                found.title.clone()
            }
            None => models
                .first()
                .map(|m| m.title.clone())
                .unwrap_or_else(|| "default".to_owned()),
        };

        Ok(SynthesizerInfo {
            model,
            accelerator_available: self.probe_memory().await,
        })
    }

    async fn accelerator_available(&self) -> bool {
        self.probe_memory().await
    }

    async fn synthesize(
        &self,
        prompt: &str,
        params: &GenerationParameters,
    ) -> Result<Vec<u8>, SynthesisError> {
        let seed = match params.seed {
            Some(s) => i64::try_from(s)
                .map_err(|_| SynthesisError::InvalidParameters(format!("seed {s} is out of range")))?,
            None => -1,
        };
        let body = Txt2ImgRequest {
            prompt,
            steps: params.steps,
            cfg_scale: params.guidance_scale,
            seed,
            width: params.width,
            height: params.height,
            batch_size: 1,
            n_iter: 1,
        };

        debug!(steps = body.steps, seed = body.seed, "txt2img request");
        let response = self
            .client
            .post(self.url("/sdapi/v1/txt2img"))
            .json(&body)
            .send()
            .await?;
        let result: Txt2ImgResponse = Self::error_for_status(response)
            .await
            .map_err(SynthesisError::Backend)?
            .json()
            .await?;

        let encoded = result.images.into_iter().next().ok_or(SynthesisError::EmptyResult)?;
        // Some builds prefix the payload with a data URI header.
        let encoded = encoded
            .split_once(',')
            .filter(|(head, _)| head.starts_with("data:"))
            .map_or(encoded.as_str(), |(_, data)| data);

        base64::engine::general_purpose::STANDARD
            .decode(encoded)
            .map_err(|e| SynthesisError::Backend(format!("undecodable image payload: {e}")))
    }
}
