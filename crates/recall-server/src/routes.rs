//! HTTP surface: `POST /recognize` and `GET /summary/{person_id}`.
//!
//! Every response, errors included, is JSON and carries permissive CORS
//! headers so browser and device clients can call the endpoints directly.

use crate::matcher::{Image, Matcher};
use crate::store::Store;
use crate::summarizer::Summarizer;
use actix_multipart::Multipart;
use actix_web::http::{header, Method, StatusCode};
use actix_web::{middleware, web, HttpRequest, HttpResponse, ResponseError};
use futures::{StreamExt, TryStreamExt};
use serde::Serialize;
use thiserror::Error;

/// Upload size cap for recognition images.
pub const MAX_IMAGE_BYTES: usize = 10 * 1024 * 1024;

pub struct AppState {
    pub store: Store,
    pub matcher: Matcher,
    pub summarizer: Summarizer,
}

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Person ID is required")]
    MissingPersonId,

    #[error("Person not found")]
    PersonNotFound,

    #[error("Recognition failed")]
    Recognition(String),

    #[error("Failed to generate summary")]
    Summary(String),
}

impl ResponseError for ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::MissingPersonId => StatusCode::BAD_REQUEST,
            ApiError::PersonNotFound => StatusCode::NOT_FOUND,
            ApiError::Recognition(_) | ApiError::Summary(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let body = match self {
            ApiError::Recognition(message) | ApiError::Summary(message) => {
                serde_json::json!({ "error": self.to_string(), "message": message })
            }
            _ => serde_json::json!({ "error": self.to_string() }),
        };
        HttpResponse::build(self.status_code()).json(body)
    }
}

/// Summary response body.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SummaryResponse {
    name: String,
    relationship: String,
    photo_url: Option<String>,
    summary: String,
}

/// CORS headers added to every response.
pub fn cors_headers() -> middleware::DefaultHeaders {
    middleware::DefaultHeaders::new()
        .add((header::ACCESS_CONTROL_ALLOW_ORIGIN, "*"))
        .add((
            header::ACCESS_CONTROL_ALLOW_HEADERS,
            "authorization, x-client-info, apikey, content-type",
        ))
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::resource("/recognize")
            .route(web::post().to(recognize))
            .route(web::method(Method::OPTIONS).to(preflight))
            .default_service(web::to(method_not_allowed)),
    )
    .service(
        web::resource(["/summary", "/summary/"])
            .route(web::get().to(missing_person_id))
            .route(web::method(Method::OPTIONS).to(preflight))
            .default_service(web::to(method_not_allowed)),
    )
    .service(
        web::resource("/summary/{person_id}")
            .route(web::get().to(summary))
            .route(web::method(Method::OPTIONS).to(preflight))
            .default_service(web::to(method_not_allowed)),
    )
    .default_service(web::to(fallback));
}

async fn preflight() -> HttpResponse {
    HttpResponse::Ok().finish()
}

async fn fallback(req: HttpRequest) -> HttpResponse {
    if req.method() == Method::OPTIONS {
        return HttpResponse::Ok().finish();
    }
    HttpResponse::NotFound().json(serde_json::json!({ "error": "Not found" }))
}

async fn method_not_allowed() -> HttpResponse {
    HttpResponse::MethodNotAllowed().json(serde_json::json!({ "error": "Method not allowed" }))
}

async fn missing_person_id() -> Result<HttpResponse, ApiError> {
    Err(ApiError::MissingPersonId)
}

async fn recognize(
    state: web::Data<AppState>,
    req: HttpRequest,
    payload: web::Payload,
) -> Result<HttpResponse, ApiError> {
    tracing::debug!("recognize called");
    let image = read_image(&req, payload).await.map_err(|e| {
        tracing::error!(error = %e, "failed to read uploaded image");
        ApiError::Recognition(e)
    })?;

    let result = state.matcher.recognize(image).await.map_err(|e| {
        tracing::error!(error = %e, "recognition failed");
        ApiError::Recognition(e.to_string())
    })?;

    match result.person() {
        Some(person_id) => tracing::info!(person_id, confidence = ?result.confidence, "person recognized"),
        None => tracing::debug!("no face recognized"),
    }
    Ok(HttpResponse::Ok().json(result))
}

/// Pull the image out of a multipart `image` field or a raw body. An empty
/// upload is `None`.
async fn read_image(req: &HttpRequest, payload: web::Payload) -> Result<Option<Image>, String> {
    let content_type = req
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_string();

    if content_type.starts_with("multipart/form-data") {
        let mut form = Multipart::new(req.headers(), payload);
        while let Some(mut field) = form.try_next().await.map_err(|e| e.to_string())? {
            if field.name() != Some("image") {
                continue;
            }
            let mime = field
                .content_type()
                .map(|m| m.essence_str().to_string())
                .unwrap_or_else(|| "image/jpeg".to_string());
            let mut data = Vec::new();
            while let Some(chunk) = field.try_next().await.map_err(|e| e.to_string())? {
                append_limited(&mut data, &chunk)?;
            }
            return Ok((!data.is_empty()).then_some(Image { data, mime }));
        }
        return Ok(None);
    }

    let mut payload = payload;
    let mut data = Vec::new();
    while let Some(chunk) = payload.next().await {
        let chunk = chunk.map_err(|e| e.to_string())?;
        append_limited(&mut data, &chunk)?;
    }
    if data.is_empty() {
        return Ok(None);
    }
    let mime = match content_type.as_str() {
        "" | "application/octet-stream" => "image/jpeg".to_string(),
        other => other.to_string(),
    };
    Ok(Some(Image { data, mime }))
}

fn append_limited(data: &mut Vec<u8>, chunk: &[u8]) -> Result<(), String> {
    if data.len() + chunk.len() > MAX_IMAGE_BYTES {
        return Err(format!("image exceeds {MAX_IMAGE_BYTES} bytes"));
    }
    data.extend_from_slice(chunk);
    Ok(())
}

async fn summary(
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse, ApiError> {
    let person_id = path.into_inner();
    if person_id.trim().is_empty() {
        return Err(ApiError::MissingPersonId);
    }
    tracing::info!(person_id = %person_id, "generating summary");

    let ctx = state
        .store
        .person_context(&person_id)
        .await
        .map_err(|e| {
            tracing::error!(person_id = %person_id, error = %e, "failed to load person");
            ApiError::Summary(e.to_string())
        })?
        .ok_or(ApiError::PersonNotFound)?;

    let summary = state.summarizer.summarize(&ctx).await;

    Ok(HttpResponse::Ok().json(SummaryResponse {
        name: ctx.person.name,
        relationship: ctx.person.relationship,
        photo_url: ctx.person.photo_url,
        summary,
    }))
}
