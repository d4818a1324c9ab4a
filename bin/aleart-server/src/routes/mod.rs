//! Axum router construction.
//!
//! [`build`] assembles the complete application router, including:
//! - Middleware layers (CORS, per-request trace-ID injection)
//! - Optional Swagger UI / OpenAPI document endpoint (disable with `ALEART_ENABLE_SWAGGER=false`)
//! - Index and health routes
//! - Image generation, status and artifact file routes

pub mod doc;
mod files;
mod health;
mod images;
mod index;

use std::sync::Arc;

use axum::{Router, middleware};
use tower::ServiceBuilder;
use utoipa_swagger_ui::SwaggerUi;

use crate::middleware::{cors, trace};
use crate::state::AppState;

/// Build the complete Axum [`Router`] for the application.
pub fn build(state: Arc<AppState>) -> Router {
    let mut app = Router::new()
        .merge(index::router())
        .merge(health::router())
        .merge(images::router())
        .merge(files::router());

    if state.config.enable_swagger {
        app = app.merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", doc::get_docs()));
    }

    app
        // Outermost layers execute first on the way in.
        .layer(ServiceBuilder::new().layer(cors::cors_layer(&state)))
        .layer(middleware::from_fn(trace::trace_middleware))
        .with_state(state)
}

#[cfg(test)]
pub(crate) mod testing {
    use std::path::Path;
    use std::sync::Arc;
    use std::time::Duration;

    use aleart_core::testing::StaticSynthesizer;
    use aleart_core::{
        GenerationService, JobRepository, LocalArtifactStore, SqliteJobStore, SynthesizerHandle,
    };
    use axum::Router;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    use crate::config::Config;
    use crate::state::AppState;

    pub async fn sqlite() -> Arc<dyn JobRepository> {
        Arc::new(SqliteJobStore::connect("sqlite::memory:").await.unwrap())
    }

    /// Router over a real artifact directory, the given repository and synthesizer.
    pub fn app(dir: &Path, jobs: Arc<dyn JobRepository>, synth: StaticSynthesizer) -> Router {
        let mut config = Config::from_lookup(|_| None);
        config.artifact_dir = dir.to_path_buf();
        config.enable_swagger = false;

        let handle = Arc::new(SynthesizerHandle::new(Arc::new(synth), Duration::from_secs(5)));
        let generation =
            GenerationService::new(handle, Arc::new(LocalArtifactStore::new(dir)), jobs);
        super::build(Arc::new(AppState::new(config, generation)))
    }

    pub async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Vec<u8>) {
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        (status, bytes.to_vec())
    }

    pub async fn get_json(app: &Router, uri: &str) -> (StatusCode, serde_json::Value) {
        let request = Request::get(uri).body(Body::empty()).unwrap();
        let (status, bytes) = send(app, request).await;
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    pub async fn post_json(
        app: &Router,
        uri: &str,
        body: serde_json::Value,
    ) -> (StatusCode, serde_json::Value) {
        let request = Request::post(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap();
        let (status, bytes) = send(app, request).await;
        (status, serde_json::from_slice(&bytes).unwrap())
    }
}
