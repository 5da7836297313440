use std::sync::Arc;

use axum::{
    Json,
    body::Bytes,
    extract::{Extension, Path, Query},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
};

use inferq_infra::InferenceService;
use inferq_infra::jobs::JobStatus;

use crate::app::{dto, errors};

pub async fn list_models(
    Extension(service): Extension<Arc<InferenceService>>,
) -> axum::response::Response {
    match service.list_models() {
        Ok(models) => Json(dto::ModelsResponse { models }).into_response(),
        Err(e) => errors::service_error_to_response(e),
    }
}

/// Queue the request body (raw CSV) for inference with `model_name`.
pub async fn submit_inference(
    Extension(service): Extension<Arc<InferenceService>>,
    Path(model_name): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> axum::response::Response {
    if let Err(resp) = dto::check_csv_content_type(&headers) {
        return resp;
    }
    if let Err(resp) = dto::check_csv_body(&body) {
        return resp;
    }

    let job_id = match service.submit(&model_name, &body[..]) {
        Ok(id) => id,
        Err(e) => return errors::service_error_to_response(e),
    };

    (
        StatusCode::ACCEPTED,
        Json(dto::SubmitResponse {
            job_id,
            status: JobStatus::Pending,
            model: model_name,
            message: "CSV uploaded and queued for processing, use job_id to retrieve results"
                .to_string(),
        }),
    )
        .into_response()
}

pub async fn get_result(
    Extension(service): Extension<Arc<InferenceService>>,
    Path(job_id): Path<String>,
) -> axum::response::Response {
    let job_id = match dto::parse_job_id(&job_id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };

    match service.job(job_id) {
        Ok(job) => Json(job).into_response(),
        Err(e) => errors::service_error_to_response(e),
    }
}

pub async fn list_jobs(
    Extension(service): Extension<Arc<InferenceService>>,
    Query(query): Query<dto::ListJobsQuery>,
) -> axum::response::Response {
    match service.jobs(query.status, query.limit()) {
        Ok(jobs) => Json(dto::JobsResponse { jobs }).into_response(),
        Err(e) => errors::service_error_to_response(e),
    }
}
