use std::sync::Arc;

use axum::{Json, extract::Extension, response::IntoResponse};

use inferq_infra::InferenceService;

use crate::app::{dto, errors};

pub async fn root() -> Json<dto::MessageResponse> {
    Json(dto::MessageResponse {
        message: "Welcome to the inferq inference service",
    })
}

pub async fn health() -> Json<dto::HealthResponse> {
    Json(dto::HealthResponse { status: "healthy" })
}

pub async fn stats(Extension(service): Extension<Arc<InferenceService>>) -> axum::response::Response {
    match service.stats() {
        Ok(stats) => Json(stats).into_response(),
        Err(e) => errors::service_error_to_response(e),
    }
}
