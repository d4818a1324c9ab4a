//! Artifact file serving.

use std::sync::Arc;

use axum::Router;
use axum::extract::{Path, State};
use axum::http::header;
use axum::response::IntoResponse;
use axum::routing::get;
use utoipa::OpenApi;

use crate::error::ServerError;
use crate::state::AppState;

#[derive(OpenApi)]
#[openapi(paths(get_generated_image))]
pub struct FilesApi;

pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/generated_images/{filename}", get(get_generated_image))
}

/// Raw PNG bytes of a stored artifact (`GET /generated_images/{filename}`).
#[utoipa::path(
    get,
    path = "/generated_images/{filename}",
    tag = "images",
    params(("filename" = String, Path, description = "Artifact filename")),
    responses(
        (status = 200, description = "PNG image bytes (`image/png`)"),
        (status = 404, description = "Image not found"),
    )
)]
pub async fn get_generated_image(
    State(state): State<Arc<AppState>>,
    Path(filename): Path<String>,
) -> Result<impl IntoResponse, ServerError> {
    let bytes = state.artifacts().read(&filename).await?;
    Ok(([(header::CONTENT_TYPE, "image/png")], bytes))
}
