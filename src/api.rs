// API routes and handlers
use actix_cors::Cors;
use actix_multipart::Multipart;
use actix_web::{get, post, web, HttpResponse};
use futures_util::StreamExt;
use serde::Serialize;
use std::sync::Arc;

use crate::error::{ApiError, ApiResult};
use crate::state::{AppState, ModelStatus};

const CLIP_LOADING: &str = "CLIP model is still loading. Please try again later.";
const TEXT_LOADING: &str = "Text model is still loading. Please try again later.";
const NO_IMAGE: &str = "No image uploaded";
const NO_TEXT: &str = "No text provided";
const IMAGE_FAILURE: &str = "An error occurred while processing the image. Please try again later.";
const TEXT_FAILURE: &str = "An error occurred while processing the text. Please try again later.";

/// Form field carrying the uploaded image.
pub const IMAGE_FIELD: &str = "image";

#[derive(Debug, Clone, Copy)]
pub struct ApiConfig {
    pub max_upload_bytes: usize,
}

#[derive(Serialize)]
struct HealthResponse {
    clip_model_loading: ModelStatus,
    text_model_status: ModelStatus,
}

/// Registers the shared state and every route on an app.
pub fn configure(
    state: Arc<AppState>,
    config: ApiConfig,
) -> impl FnOnce(&mut web::ServiceConfig) {
    move |cfg| {
        cfg.app_data(web::Data::from(state))
            .app_data(web::Data::new(config))
            .service(detect_image)
            .service(detect_text)
            .service(health);
    }
}

/// The browser frontend is served from another origin and sends credentials.
pub fn cors() -> Cors {
    Cors::default()
        .allow_any_origin()
        .allow_any_method()
        .allow_any_header()
        .supports_credentials()
}

#[post("/detect-image")]
pub async fn detect_image(
    state: web::Data<AppState>,
    config: web::Data<ApiConfig>,
    payload: Multipart,
) -> ApiResult<HttpResponse> {
    let model = state
        .image_model
        .get()
        .ok_or(ApiError::ModelLoading(CLIP_LOADING))?;

    let image = read_image_field(payload, config.max_upload_bytes)
        .await?
        .ok_or(ApiError::BadRequest(NO_IMAGE))?;
    log::debug!("classifying uploaded image ({} bytes)", image.len());

    let prediction = web::block(move || model.classify(&image))
        .await
        .map_err(|e| ApiError::internal(IMAGE_FAILURE, e))?
        .map_err(|e| ApiError::internal(IMAGE_FAILURE, e))?;
    Ok(HttpResponse::Ok().json(prediction))
}

#[post("/detect-text")]
pub async fn detect_text(state: web::Data<AppState>, body: web::Bytes) -> ApiResult<HttpResponse> {
    let model = state
        .text_model
        .get()
        .ok_or(ApiError::ModelLoading(TEXT_LOADING))?;

    let text = parse_text(&body).ok_or(ApiError::BadRequest(NO_TEXT))?;
    let prediction = web::block(move || model.classify(&text))
        .await
        .map_err(|e| ApiError::internal(TEXT_FAILURE, e))?
        .map_err(|e| ApiError::internal(TEXT_FAILURE, e))?;
    Ok(HttpResponse::Ok().json(prediction))
}

#[get("/health")]
pub async fn health(state: web::Data<AppState>) -> HttpResponse {
    HttpResponse::Ok().json(HealthResponse {
        clip_model_loading: state.image_model.status(),
        text_model_status: state.text_model.status(),
    })
}

/// Reads the bytes of the `image` form field, skipping any other fields.
///
/// A body that is not multipart at all yields `None`, like a form without the field.
async fn read_image_field(mut payload: Multipart, limit: usize) -> ApiResult<Option<Vec<u8>>> {
    while let Some(field) = payload.next().await {
        let mut field = match field {
            Ok(field) => field,
            Err(e) => {
                log::debug!("unreadable multipart body: {e}");
                return Ok(None);
            }
        };
        let wanted = field.name() == Some(IMAGE_FIELD);

        let mut bytes = Vec::new();
        while let Some(chunk) = field.next().await {
            let chunk = chunk.map_err(|e| {
                log::debug!("multipart field interrupted: {e}");
                ApiError::BadRequest(NO_IMAGE)
            })?;
            if !wanted {
                continue;
            }
            if bytes.len() + chunk.len() > limit {
                return Err(ApiError::UploadTooLarge { limit });
            }
            bytes.extend_from_slice(&chunk);
        }
        if wanted {
            return Ok(Some(bytes));
        }
    }
    Ok(None)
}

/// Extracts the `text` string from a JSON object body.
fn parse_text(body: &[u8]) -> Option<String> {
    let value: serde_json::Value = serde_json::from_slice(body).ok()?;
    value.get("text")?.as_str().map(str::to_owned)
}
