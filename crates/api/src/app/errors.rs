use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde_json::json;

use inferq_infra::ServiceError;

pub fn service_error_to_response(err: ServiceError) -> axum::response::Response {
    match err {
        ServiceError::ModelNotFound { name, available } => (
            StatusCode::NOT_FOUND,
            axum::Json(json!({
                "error": "model_not_found",
                "message": format!("model '{name}' not found"),
                "available": available,
            })),
        )
            .into_response(),
        ServiceError::JobNotFound(id) => {
            json_error(StatusCode::NOT_FOUND, "job_not_found", format!("job {id} not found"))
        }
        ServiceError::InvalidModelName(e) => {
            json_error(StatusCode::BAD_REQUEST, "invalid_model_name", e.to_string())
        }
        ServiceError::QueueClosed(e) => {
            json_error(StatusCode::SERVICE_UNAVAILABLE, "queue_closed", e.to_string())
        }
        err @ (ServiceError::Store(_) | ServiceError::Models(_)) => {
            tracing::error!(error = %err, "request failed");
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "internal_error", err.to_string())
        }
    }
}

pub fn json_error(
    status: StatusCode,
    code: &'static str,
    message: impl Into<String>,
) -> axum::response::Response {
    (
        status,
        axum::Json(json!({
            "error": code,
            "message": message.into(),
        })),
    )
        .into_response()
}
