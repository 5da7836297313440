use axum::http::{HeaderMap, StatusCode, header};
use serde::{Deserialize, Serialize};

use inferq_core::JobId;
use inferq_infra::jobs::{Job, JobStatus};
use inferq_infra::ModelInfo;

use crate::app::errors;

// -------------------------
// Request DTOs
// -------------------------

#[derive(Debug, Default, Deserialize)]
pub struct ListJobsQuery {
    pub status: Option<JobStatus>,
    pub limit: Option<usize>,
}

impl ListJobsQuery {
    pub const DEFAULT_LIMIT: usize = 100;

    pub fn limit(&self) -> usize {
        self.limit.unwrap_or(Self::DEFAULT_LIMIT)
    }
}

// -------------------------
// Response DTOs
// -------------------------

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub message: &'static str,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
}

#[derive(Debug, Serialize)]
pub struct ModelsResponse {
    pub models: Vec<ModelInfo>,
}

#[derive(Debug, Serialize)]
pub struct SubmitResponse {
    pub job_id: JobId,
    pub status: JobStatus,
    pub model: String,
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct JobsResponse {
    pub jobs: Vec<Job>,
}

// -------------------------
// Boundary validation
// -------------------------

/// Content types accepted for uploads. A missing header is accepted too.
const CSV_CONTENT_TYPES: &[&str] = &[
    "text/csv",
    "application/csv",
    "text/plain",
    "application/octet-stream",
];

pub fn check_csv_content_type(headers: &HeaderMap) -> Result<(), axum::response::Response> {
    let Some(value) = headers.get(header::CONTENT_TYPE) else {
        return Ok(());
    };
    let mime = value
        .to_str()
        .unwrap_or_default()
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();

    if CSV_CONTENT_TYPES.contains(&mime.as_str()) {
        Ok(())
    } else {
        Err(errors::json_error(
            StatusCode::BAD_REQUEST,
            "invalid_content_type",
            format!("expected a CSV upload, got content type {mime:?}"),
        ))
    }
}

/// Uploads must be non-empty UTF-8 text.
pub fn check_csv_body(body: &[u8]) -> Result<(), axum::response::Response> {
    if body.is_empty() {
        return Err(errors::json_error(
            StatusCode::BAD_REQUEST,
            "empty_payload",
            "the uploaded CSV is empty",
        ));
    }
    if std::str::from_utf8(body).is_err() {
        return Err(errors::json_error(
            StatusCode::BAD_REQUEST,
            "invalid_encoding",
            "failed to decode CSV file, ensure it is UTF-8 encoded",
        ));
    }
    Ok(())
}

/// Malformed ids are reported like unknown ones.
pub fn parse_job_id(raw: &str) -> Result<JobId, axum::response::Response> {
    raw.parse().map_err(|_: inferq_core::DomainError| {
        errors::json_error(
            StatusCode::NOT_FOUND,
            "job_not_found",
            format!("job {raw} not found"),
        )
    })
}
