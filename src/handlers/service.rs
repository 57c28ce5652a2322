//! Service information endpoints used by the browser client on load.

use crate::error::AppError;
use crate::state::AppState;
use crate::translation::languages::SUPPORTED_LANGUAGES;
use actix_web::{web, HttpRequest, HttpResponse};
use serde_json::json;

/// `GET /`
pub async fn service_info(state: web::Data<AppState>) -> HttpResponse {
    HttpResponse::Ok().json(json!({
        "status": "healthy",
        "service": "UN Translator API",
        "model": state.get_config().upstream.model_id
    }))
}

/// `GET /languages`: the tags the interpreter prompt knows by name.
pub async fn list_languages() -> HttpResponse {
    let languages: serde_json::Map<String, serde_json::Value> = SUPPORTED_LANGUAGES
        .iter()
        .map(|(tag, name)| (tag.to_string(), json!(name)))
        .collect();

    HttpResponse::Ok().json(json!({ "languages": languages }))
}

/// Fallback for unmatched routes.
pub async fn not_found(req: HttpRequest) -> Result<HttpResponse, AppError> {
    Err(AppError::NotFound(format!("No route for {} {}", req.method(), req.path())))
}
