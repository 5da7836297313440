//! HTTP API application wiring (Axum router + service state).
//!
//! - `routes/`: HTTP handlers (one file per area)
//! - `dto.rs`: request/response DTOs and boundary validation
//! - `errors.rs`: consistent error responses

use std::sync::Arc;

use axum::{Extension, Router, extract::DefaultBodyLimit, routing::get};
use tower::ServiceBuilder;

use inferq_infra::InferenceService;

pub mod dto;
pub mod errors;
pub mod routes;

/// Largest accepted upload.
pub const MAX_UPLOAD_BYTES: usize = 32 * 1024 * 1024;

/// Build the full HTTP router (public entrypoint used by `main.rs`).
///
/// The caller owns the worker lifecycle; this only wires handlers to `service`.
pub fn build_app(service: Arc<InferenceService>) -> Router {
    Router::new()
        .route("/", get(routes::system::root))
        .route("/health", get(routes::system::health))
        .nest("/api/v1", routes::router())
        .layer(
            ServiceBuilder::new()
                .layer(Extension(service))
                .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES)),
        )
}
