use utoipa::OpenApi;

use crate::routes::{files, health, images, index};

#[derive(OpenApi)]
#[openapi(info(
    title = "aleart-server",
    description = "Token art image generation API",
    version = "0.1.0"
))]
pub struct ApiDoc;

pub fn get_docs() -> utoipa::openapi::OpenApi {
    let mut root = ApiDoc::openapi();
    root.merge(index::IndexApi::openapi());
    root.merge(health::HealthApi::openapi());
    root.merge(images::ImagesApi::openapi());
    root.merge(files::FilesApi::openapi());
    root
}
