//! Shared application state injected into every Axum handler.

use std::sync::Arc;

use aleart_core::{ArtifactStore, GenerationService, JobRepository, SynthesizerHandle};

use crate::config::Config;

/// State shared across all HTTP handlers.
#[derive(Clone, Debug)]
pub struct AppState {
    /// Server configuration (env-derived).
    pub config: Arc<Config>,
    /// Generation orchestration; owns the synthesizer, artifact and job handles.
    pub generation: GenerationService,
}

impl AppState {
    pub fn new(config: Config, generation: GenerationService) -> Self {
        Self { config: Arc::new(config), generation }
    }

    pub fn synthesizer(&self) -> &SynthesizerHandle {
        self.generation.synthesizer()
    }

    pub fn artifacts(&self) -> &Arc<dyn ArtifactStore> {
        self.generation.artifacts()
    }

    pub fn jobs(&self) -> &Arc<dyn JobRepository> {
        self.generation.jobs()
    }
}
