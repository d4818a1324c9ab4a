//! The external image synthesizer.
//!
//! [`Synthesizer`] is the opaque collaborator (`prompt + parameters → PNG
//! bytes`). [`SynthesizerHandle`] is the process-wide service object handed to
//! the generation service: it loads the model exactly once, however many
//! requests race to be first, and bounds every synthesis with a timeout.

pub mod http;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::OnceCell;
use tracing::{info, warn};

use crate::error::SynthesisError;
use crate::types::GenerationParameters;

/// Upper bound on an accelerator probe made while the model is unloaded.
const ACCELERATOR_PROBE_TIMEOUT: Duration = Duration::from_secs(2);

/// What the synthesizer reported once loaded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SynthesizerInfo {
    /// Model / checkpoint in use.
    pub model: String,
    /// Whether sampling runs on a GPU.
    pub accelerator_available: bool,
}

#[async_trait]
pub trait Synthesizer: Send + Sync + 'static {
    /// Load the model. Called at most once per successful initialisation.
    async fn load(&self) -> Result<SynthesizerInfo, SynthesisError>;

    /// Whether sampling can run on a GPU, checked without loading the model.
    async fn accelerator_available(&self) -> bool {
        false
    }

    /// Render one image and return its PNG bytes.
    async fn synthesize(
        &self,
        prompt: &str,
        params: &GenerationParameters,
    ) -> Result<Vec<u8>, SynthesisError>;
}

/// One-time-initialised, shared handle to a [`Synthesizer`].
pub struct SynthesizerHandle {
    inner: Arc<dyn Synthesizer>,
    ready: OnceCell<SynthesizerInfo>,
    timeout: Duration,
}

impl std::fmt::Debug for SynthesizerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SynthesizerHandle")
            .field("ready", &self.ready.get())
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl SynthesizerHandle {
    pub fn new(inner: Arc<dyn Synthesizer>, timeout: Duration) -> Self {
        Self { inner, ready: OnceCell::new(), timeout }
    }

    /// Load the model if nobody has yet.
    ///
    /// Concurrent callers wait for the single in-flight load, which is bounded
    /// by the handle's timeout. A failed or timed-out load leaves the handle
    /// unloaded so a later call can retry.
    pub async fn ensure_ready(&self) -> Result<&SynthesizerInfo, SynthesisError> {
        self.ready
            .get_or_try_init(|| async {
                info!("loading synthesizer model");
                let loaded = tokio::time::timeout(self.timeout, self.inner.load())
                    .await
                    .unwrap_or(Err(SynthesisError::Timeout(self.timeout)));
                match &loaded {
                    Ok(i) => info!(
                        model = %i.model,
                        accelerator = i.accelerator_available,
                        "synthesizer ready"
                    ),
                    Err(e) => warn!(error = %e, "synthesizer failed to load"),
                }
                loaded
            })
            .await
    }

    pub fn is_loaded(&self) -> bool {
        self.ready.initialized()
    }

    pub fn info(&self) -> Option<&SynthesizerInfo> {
        self.ready.get()
    }

    /// GPU availability: what the load reported, or a short live probe while
    /// the model is unloaded. `false` when the probe does not answer in time.
    pub async fn accelerator_available(&self) -> bool {
        if let Some(info) = self.ready.get() {
            return info.accelerator_available;
        }
        tokio::time::timeout(ACCELERATOR_PROBE_TIMEOUT, self.inner.accelerator_available())
            .await
            .unwrap_or(false)
    }

    /// Render an image, loading the model first if needed.
    ///
    /// Synthesis runs on its own task: on timeout the caller gets
    /// [`SynthesisError::Timeout`] and the render is left to finish.
    pub async fn synthesize(
        &self,
        prompt: &str,
        params: &GenerationParameters,
    ) -> Result<Vec<u8>, SynthesisError> {
        self.ensure_ready().await?;

        let inner = Arc::clone(&self.inner);
        let prompt = prompt.to_owned();
        let params = params.clone();
        let task = tokio::spawn(async move { inner.synthesize(&prompt, &params).await });

        match tokio::time::timeout(self.timeout, task).await {
            Ok(Ok(result)) => result,
            Ok(Err(join_err)) => Err(SynthesisError::Backend(format!(
                "synthesis task aborted: {join_err}"
            ))),
            Err(_) => {
                warn!(timeout_secs = self.timeout.as_secs(), "synthesis timed out");
                Err(SynthesisError::Timeout(self.timeout))
            }
        }
    }
}

// ── Tests ──────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod test {
    use super::*;
    use crate::testing::StaticSynthesizer;

    #[tokio::test]
    async fn concurrent_first_requests_load_once() {
        let synth = Arc::new(StaticSynthesizer::new(b"png".to_vec()).with_load_delay(Duration::from_millis(50)));
        let handle = Arc::new(SynthesizerHandle::new(synth.clone(), Duration::from_secs(5)));

        let mut joins = Vec::new();
        for _ in 0..8 {
            let h = Arc::clone(&handle);
            joins.push(tokio::spawn(async move {
                h.synthesize("a cat", &GenerationParameters::default()).await
            }));
        }
        for j in joins {
            assert_eq!(j.await.unwrap().unwrap(), b"png");
        }

        assert_eq!(synth.load_count(), 1);
        assert_eq!(synth.synthesize_count(), 8);
        assert!(handle.is_loaded());
    }

    #[tokio::test]
    async fn failed_load_is_retried() {
        let synth = Arc::new(StaticSynthesizer::new(b"png".to_vec()).failing_loads(1));
        let handle = SynthesizerHandle::new(synth.clone(), Duration::from_secs(5));

        assert!(matches!(handle.ensure_ready().await, Err(SynthesisError::Init(_))));
        assert!(!handle.is_loaded());
        assert!(handle.ensure_ready().await.is_ok());
        assert_eq!(synth.load_count(), 2);
    }

    #[tokio::test]
    async fn slow_synthesis_times_out() {
        let synth = Arc::new(
            StaticSynthesizer::new(b"png".to_vec()).with_synthesis_delay(Duration::from_secs(5)),
        );
        let handle = SynthesizerHandle::new(synth, Duration::from_millis(20));

        let err = handle
            .synthesize("slow", &GenerationParameters::default())
            .await
            .unwrap_err();
        assert!(matches!(err, SynthesisError::Timeout(_)));
    }

    #[tokio::test]
    async fn slow_load_times_out_and_can_retry() {
        let synth = Arc::new(
            StaticSynthesizer::new(b"png".to_vec()).with_load_delay(Duration::from_secs(3)),
        );
        let handle = SynthesizerHandle::new(synth.clone(), Duration::from_millis(50));

        let started = std::time::Instant::now();
        let err = handle
            .synthesize("slow load", &GenerationParameters::default())
            .await
            .unwrap_err();
        assert!(matches!(err, SynthesisError::Timeout(_)));
        assert!(started.elapsed() < Duration::from_secs(2));
        assert!(!handle.is_loaded());
        assert_eq!(synth.synthesize_count(), 0);

        assert!(matches!(handle.ensure_ready().await, Err(SynthesisError::Timeout(_))));
        assert_eq!(synth.load_count(), 2);
    }

    #[tokio::test]
    async fn accelerator_is_probed_without_loading() {
        let synth = Arc::new(StaticSynthesizer::new(b"png".to_vec()).with_accelerator(true));
        let handle = SynthesizerHandle::new(synth.clone(), Duration::from_secs(5));

        assert!(handle.accelerator_available().await);
        assert!(!handle.is_loaded());
        assert_eq!(synth.load_count(), 0);

        handle.ensure_ready().await.unwrap();
        assert!(handle.accelerator_available().await);
    }

    #[tokio::test]
    async fn synthesis_errors_propagate() {
        let synth = Arc::new(StaticSynthesizer::failing("CUDA out of memory"));
        let handle = SynthesizerHandle::new(synth, Duration::from_secs(5));

        let err = handle
            .synthesize("x", &GenerationParameters::default())
            .await
            .unwrap_err();
        assert!(matches!(err, SynthesisError::Backend(m) if m.contains("out of memory")));
    }
}
