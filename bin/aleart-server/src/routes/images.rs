//! Image generation and job status routes.
//!
//! - `POST /generate-image`: synthesize inline and return the image.
//! - `POST /generate-image-async`: record a `generating` job, finish it in the background.
//! - `GET /images?userId=&tokenId=`: poll a user's job records.

use std::sync::Arc;

use aleart_core::{GenerationRequest, JobStatus, TokenId};
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use tracing::{debug, info};
use utoipa::OpenApi;

use crate::error::ServerError;
use crate::schemas::images::{
    GenerateImageRequest, GenerateImageResponse, ImageRecordView, ImagesQuery, ImagesResponse,
    SubmitImageResponse,
};
use crate::state::AppState;

#[derive(OpenApi)]
#[openapi(paths(generate_image, submit_image, list_images))]
pub struct ImagesApi;

/// Register image routes.
pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/generate-image", post(generate_image))
        .route("/generate-image-async", post(submit_image))
        .route("/images", get(list_images))
}

fn parse_body(
    payload: Result<Json<GenerateImageRequest>, JsonRejection>,
) -> Result<GenerationRequest, ServerError> {
    let Json(req) = payload.map_err(|e| ServerError::BadRequest(e.body_text()))?;
    Ok(req.into())
}

/// Generate one image synchronously.
///
/// A failure to record the job does not fail the request: the image is
/// still returned and served from `imageUrl`.
#[utoipa::path(
    post,
    path = "/generate-image",
    tag = "images",
    request_body = GenerateImageRequest,
    responses(
        (status = 200, description = "Generated image", body = GenerateImageResponse),
        (status = 400, description = "Invalid parameters"),
        (status = 500, description = "Synthesis or storage failure"),
        (status = 503, description = "Synthesizer unavailable"),
    )
)]
pub async fn generate_image(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<GenerateImageRequest>, JsonRejection>,
) -> Result<Json<GenerateImageResponse>, ServerError> {
    let request = parse_body(payload)?;
    debug!(token_id = %request.token_id, prompt = %request.prompt, "image generation request");

    let result = state.generation.generate(request).await?;
    Ok(Json(result.into()))
}

/// Submit a generation job and return immediately.
///
/// Poll `GET /images` for the record to leave `generating`.
#[utoipa::path(
    post,
    path = "/generate-image-async",
    tag = "images",
    request_body = GenerateImageRequest,
    responses(
        (status = 202, description = "Job accepted", body = SubmitImageResponse),
        (status = 400, description = "Invalid parameters or missing userId"),
        (status = 409, description = "A job for this token is already in progress"),
    )
)]
pub async fn submit_image(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<GenerateImageRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<SubmitImageResponse>), ServerError> {
    let request = parse_body(payload)?;
    let token_id = request.token_id.clone();

    let job = state.generation.submit(request).await?;
    info!(user_id = %job.locator.user_id, %token_id, "generation job accepted");

    Ok((
        StatusCode::ACCEPTED,
        Json(SubmitImageResponse {
            success: true,
            status: JobStatus::Generating,
            user_id: job.locator.user_id,
            token_id,
            record_index: job.locator.record_index,
        }),
    ))
}

/// A user's job records, newest first, optionally for one token.
#[utoipa::path(
    get,
    path = "/images",
    tag = "images",
    params(ImagesQuery),
    responses(
        (status = 200, description = "Job records", body = ImagesResponse),
        (status = 400, description = "Missing userId"),
    )
)]
pub async fn list_images(
    State(state): State<Arc<AppState>>,
    query: Result<Query<ImagesQuery>, QueryRejection>,
) -> Result<Json<ImagesResponse>, ServerError> {
    let Query(query) = query.map_err(|e| ServerError::BadRequest(e.body_text()))?;
    let user_id = query.user_id.trim();
    if user_id.is_empty() {
        return Err(ServerError::BadRequest("userId is required".to_owned()));
    }
    let token_id = query
        .token_id
        .as_deref()
        .filter(|t| !t.trim().is_empty())
        .map(|t| {
            let Ok(token) = t.parse::<TokenId>();
            token
        });

    let records = state.jobs().list_user_records(user_id, token_id.as_ref()).await?;
    Ok(Json(ImagesResponse {
        success: true,
        user_id: user_id.to_owned(),
        images: records.into_iter().map(ImageRecordView::from).collect(),
    }))
}

// ── Tests ──────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod test {
    use std::time::Duration;

    use aleart_core::testing::{FailingJobRepository, StaticSynthesizer, TINY_PNG};
    use axum::body::Body;
    use axum::http::Request;
    use base64::Engine as _;
    use base64::engine::general_purpose::STANDARD;
    use serde_json::json;

    use super::*;
    use crate::routes::testing::{app, get_json, post_json, send, sqlite};

    #[tokio::test]
    async fn generate_returns_image_and_serves_it() {
        let dir = tempfile::tempdir().unwrap();
        let app = app(dir.path(), sqlite().await, StaticSynthesizer::new(TINY_PNG.to_vec()));

        let (status, body) = post_json(
            &app,
            "/generate-image",
            json!({"prompt": "a castle", "tokenId": 5, "userId": "u1", "seed": 7}),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);
        assert_eq!(body["tokenId"], 5);
        assert_eq!(body["prompt"], "a castle");
        assert_eq!(body["parameters"]["steps"], 20);
        assert_eq!(body["parameters"]["cfg_scale"], 7.5);
        assert_eq!(body["parameters"]["seed"], 7);

        let url = body["imageUrl"].as_str().unwrap();
        assert!(url.starts_with("/generated_images/art_token_5_"));
        let inline = body["imageBase64"].as_str().unwrap();
        let payload = inline.strip_prefix("data:image/png;base64,").unwrap();
        assert_eq!(STANDARD.decode(payload).unwrap(), TINY_PNG);

        let (status, served) = send(&app, Request::get(url).body(Body::empty()).unwrap()).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(served, TINY_PNG);

        let (_, listed) = get_json(&app, "/images?userId=u1&tokenId=5").await;
        assert_eq!(listed["images"][0]["status"], "completed");
        assert_eq!(listed["images"][0]["imageData"], inline);
    }

    #[tokio::test]
    async fn database_failure_still_succeeds() {
        let dir = tempfile::tempdir().unwrap();
        let app = app(
            dir.path(),
            Arc::new(FailingJobRepository),
            StaticSynthesizer::new(TINY_PNG.to_vec()),
        );

        let (status, body) =
            post_json(&app, "/generate-image", json!({"tokenId": 9, "userId": "u1"})).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);

        let url = body["imageUrl"].as_str().unwrap();
        let (status, served) = send(&app, Request::get(url).body(Body::empty()).unwrap()).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(served, TINY_PNG);
    }

    #[tokio::test]
    async fn synthesis_failure_is_a_500() {
        let dir = tempfile::tempdir().unwrap();
        let app = app(dir.path(), sqlite().await, StaticSynthesizer::failing("CUDA out of memory"));

        let (status, body) = post_json(&app, "/generate-image", json!({"prompt": "x"})).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["success"], false);
        assert!(body["error"].as_str().unwrap().contains("CUDA out of memory"));
    }

    #[tokio::test]
    async fn invalid_parameters_are_a_400() {
        let dir = tempfile::tempdir().unwrap();
        let app = app(dir.path(), sqlite().await, StaticSynthesizer::new(TINY_PNG.to_vec()));

        let (status, body) = post_json(&app, "/generate-image", json!({"width": 500})).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["success"], false);

        let request = Request::post("/generate-image")
            .header("content-type", "application/json")
            .body(Body::from("{not json"))
            .unwrap();
        let (status, _) = send(&app, request).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn async_submission_completes_and_is_visible() {
        let dir = tempfile::tempdir().unwrap();
        let app = app(dir.path(), sqlite().await, StaticSynthesizer::new(TINY_PNG.to_vec()));

        let (status, body) = post_json(
            &app,
            "/generate-image-async",
            json!({"prompt": "a ship", "tokenId": "hero", "userId": "u2"}),
        )
        .await;
        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(body["status"], "generating");
        assert_eq!(body["recordIndex"], 0);

        let mut last = serde_json::Value::Null;
        for _ in 0..100 {
            let (_, listed) = get_json(&app, "/images?userId=u2&tokenId=hero").await;
            last = listed["images"][0].clone();
            if last["status"] == "completed" {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert_eq!(last["status"], "completed");
        assert!(last["imageData"].as_str().unwrap().starts_with("data:image/png;base64,"));
        assert!(last["imageUrl"].as_str().unwrap().starts_with("/generated_images/art_token_hero_"));
    }

    #[tokio::test]
    async fn async_submission_requires_user() {
        let dir = tempfile::tempdir().unwrap();
        let app = app(dir.path(), sqlite().await, StaticSynthesizer::new(TINY_PNG.to_vec()));

        let (status, body) =
            post_json(&app, "/generate-image-async", json!({"tokenId": 1, "userId": " "})).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["success"], false);
    }

    #[tokio::test]
    async fn listing_requires_user_id() {
        let dir = tempfile::tempdir().unwrap();
        let app = app(dir.path(), sqlite().await, StaticSynthesizer::new(TINY_PNG.to_vec()));

        let request = Request::get("/images").body(Body::empty()).unwrap();
        let (status, _) = send(&app, request).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, body) = get_json(&app, "/images?userId=nobody").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["images"], json!([]));
    }
}
