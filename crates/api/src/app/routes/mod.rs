use axum::{
    Router,
    routing::{get, post},
};

pub mod inference;
pub mod system;

/// Router for everything under `/api/v1`.
pub fn router() -> Router {
    Router::new()
        .route("/models", get(inference::list_models))
        .route("/inference/:model_name", post(inference::submit_inference))
        .route("/result/:job_id", get(inference::get_result))
        .route("/jobs", get(inference::list_jobs))
        .route("/stats", get(system::stats))
}
