use std::sync::Arc;

use axum::routing::get;
use axum::{Json, Router};
use serde_json::{Value, json};
use utoipa::OpenApi;

use crate::state::AppState;

#[derive(OpenApi)]
#[openapi(paths(get_index))]
pub struct IndexApi;

pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/", get(get_index))
}

/// Service name and the endpoints it serves.
#[utoipa::path(
    get,
    path = "/",
    tag = "health",
    responses((status = 200, description = "Service index", body = Value))
)]
pub async fn get_index() -> Json<Value> {
    Json(json!({
        "message": "aleart image generation API",
        "version": env!("CARGO_PKG_VERSION"),
        "endpoints": [
            "/generate-image",
            "/generate-image-async",
            "/images",
            "/health",
            "/generated_images/<filename>",
        ],
    }))
}

#[cfg(test)]
mod test {
    use super::*;

    #[tokio::test]
    async fn index_lists_generation_endpoint() {
        let Json(body) = get_index().await;
        let endpoints = body["endpoints"].as_array().unwrap();
        assert!(endpoints.iter().any(|e| e == "/generate-image"));
    }
}
