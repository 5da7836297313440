//! Job record and lifecycle transitions.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use inferq_ai::PredictionResult;
use inferq_core::{JobId, ModelName};

/// Job lifecycle status.
///
/// Transitions are strictly `Pending -> Processing -> (Completed | Failed)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Queued, waiting for the worker
    Pending,
    /// Dequeued and executing
    Processing,
    /// Finished with a result
    Completed,
    /// Finished with an error description
    Failed,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A lifecycle transition that the current status does not allow.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("job {job_id}: invalid transition {from} -> {to}")]
pub struct InvalidTransition {
    pub job_id: JobId,
    pub from: JobStatus,
    pub to: JobStatus,
}

/// Error text used when a failure carries no message of its own.
const GENERIC_FAILURE: &str = "job failed";

/// An inference job.
///
/// Fields are private so the status/result/error invariants can only change
/// through the `mark_*` transitions.
#[derive(Debug, Clone, Serialize)]
pub struct Job {
    #[serde(rename = "job_id")]
    id: JobId,
    model: ModelName,
    #[serde(skip)]
    payload: Arc<[u8]>,
    status: JobStatus,
    submitted_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
    result: Option<PredictionResult>,
    error: Option<String>,
}

impl Job {
    /// Create a new pending job.
    pub fn new(model: ModelName, payload: impl Into<Arc<[u8]>>) -> Self {
        Self {
            id: JobId::new(),
            model,
            payload: payload.into(),
            status: JobStatus::Pending,
            submitted_at: Utc::now(),
            started_at: None,
            completed_at: None,
            result: None,
            error: None,
        }
    }

    pub fn id(&self) -> JobId {
        self.id
    }

    pub fn model(&self) -> &ModelName {
        &self.model
    }

    pub fn payload(&self) -> &Arc<[u8]> {
        &self.payload
    }

    pub fn status(&self) -> JobStatus {
        self.status
    }

    pub fn submitted_at(&self) -> DateTime<Utc> {
        self.submitted_at
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }

    pub fn completed_at(&self) -> Option<DateTime<Utc>> {
        self.completed_at
    }

    pub fn result(&self) -> Option<&PredictionResult> {
        self.result.as_ref()
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    fn transition(&mut self, from: JobStatus, to: JobStatus) -> Result<(), InvalidTransition> {
        if self.status != from {
            return Err(InvalidTransition {
                job_id: self.id,
                from: self.status,
                to,
            });
        }
        self.status = to;
        Ok(())
    }

    /// Mark job as picked up by the worker.
    pub fn mark_processing(&mut self) -> Result<(), InvalidTransition> {
        self.transition(JobStatus::Pending, JobStatus::Processing)?;
        self.started_at = Some(Utc::now());
        Ok(())
    }

    /// Mark job as completed with `result`.
    pub fn mark_completed(&mut self, result: PredictionResult) -> Result<(), InvalidTransition> {
        self.transition(JobStatus::Processing, JobStatus::Completed)?;
        self.result = Some(result);
        self.completed_at = Some(Utc::now());
        Ok(())
    }

    /// Mark job as failed. An empty message is replaced with a generic one.
    pub fn mark_failed(&mut self, error: impl Into<String>) -> Result<(), InvalidTransition> {
        self.transition(JobStatus::Processing, JobStatus::Failed)?;
        let error = error.into();
        self.error = Some(if error.trim().is_empty() {
            GENERIC_FAILURE.to_string()
        } else {
            error
        });
        self.completed_at = Some(Utc::now());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job() -> Job {
        Job::new(ModelName::parse("m").unwrap(), b"emb_0\n".to_vec())
    }

    fn result() -> PredictionResult {
        PredictionResult {
            predicted_prices: vec![105.0],
            prediction_horizon: 1,
            current_price: 100.0,
        }
    }

    #[test]
    fn new_job_is_pending_and_empty() {
        let job = job();
        assert_eq!(job.status(), JobStatus::Pending);
        assert!(job.started_at().is_none());
        assert!(job.completed_at().is_none());
        assert!(job.result().is_none());
        assert!(job.error().is_none());
    }

    #[test]
    fn completed_lifecycle() {
        let mut job = job();
        job.mark_processing().unwrap();
        assert_eq!(job.status(), JobStatus::Processing);
        assert!(job.started_at().is_some());
        assert!(job.completed_at().is_none());

        job.mark_completed(result()).unwrap();
        assert_eq!(job.status(), JobStatus::Completed);
        assert!(job.status().is_terminal());
        assert_eq!(job.result(), Some(&result()));
        assert!(job.error().is_none());
        assert!(job.completed_at().unwrap() >= job.started_at().unwrap());
    }

    #[test]
    fn failed_lifecycle() {
        let mut job = job();
        job.mark_processing().unwrap();
        job.mark_failed("model not found: m").unwrap();

        assert_eq!(job.status(), JobStatus::Failed);
        assert_eq!(job.error(), Some("model not found: m"));
        assert!(job.result().is_none());
        assert!(job.completed_at().is_some());
    }

    #[test]
    fn failures_always_carry_a_message() {
        let mut job = job();
        job.mark_processing().unwrap();
        job.mark_failed("  ").unwrap();
        assert_eq!(job.error(), Some(GENERIC_FAILURE));
    }

    #[test]
    fn cannot_skip_processing() {
        let mut job = job();
        let err = job.mark_completed(result()).unwrap_err();
        assert_eq!(err.from, JobStatus::Pending);
        assert_eq!(err.to, JobStatus::Completed);
        assert!(job.mark_failed("x").is_err());
        assert_eq!(job.status(), JobStatus::Pending);
    }

    #[test]
    fn terminal_states_are_final() {
        let mut job = job();
        job.mark_processing().unwrap();
        job.mark_completed(result()).unwrap();
        let completed_at = job.completed_at();

        assert!(job.mark_processing().is_err());
        assert!(job.mark_failed("late").is_err());
        assert!(job.mark_completed(result()).is_err());
        assert_eq!(job.status(), JobStatus::Completed);
        assert_eq!(job.completed_at(), completed_at);
        assert!(job.error().is_none());
    }

    #[test]
    fn snapshot_serializes_with_lowercase_status() {
        let job = job();
        let value = serde_json::to_value(&job).unwrap();
        assert_eq!(value["status"], "pending");
        assert_eq!(value["model"], "m");
        assert_eq!(value["job_id"], job.id().to_string());
        assert!(value.get("payload").is_none());
        assert!(value["result"].is_null());
    }
}
