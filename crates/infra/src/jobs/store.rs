//! Job storage.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use inferq_core::{JobId, ModelName};

use super::types::{InvalidTransition, Job, JobStatus};

/// Job store abstraction.
///
/// Jobs are never deleted: the store grows for the life of the process.
pub trait JobStore: Send + Sync {
    /// Insert a new job.
    fn insert(&self, job: Job) -> Result<JobId, JobStoreError>;

    /// Get a snapshot of a job.
    fn get(&self, job_id: JobId) -> Result<Job, JobStoreError>;

    /// Apply a transition in place and return the updated snapshot.
    ///
    /// `apply` runs against a copy; nothing is stored if it fails.
    fn update(
        &self,
        job_id: JobId,
        apply: &mut dyn FnMut(&mut Job) -> Result<(), InvalidTransition>,
    ) -> Result<Job, JobStoreError>;

    /// List jobs, oldest submission first.
    fn list(&self, status: Option<JobStatus>, limit: usize) -> Result<Vec<Job>, JobStoreError>;

    /// Get job statistics.
    fn stats(&self) -> Result<JobStats, JobStoreError>;

    /// Create and insert a pending job.
    fn create(&self, model: ModelName, payload: Arc<[u8]>) -> Result<JobId, JobStoreError> {
        self.insert(Job::new(model, payload))
    }
}

/// Job store error.
#[derive(Debug, Clone, thiserror::Error)]
pub enum JobStoreError {
    #[error("job not found: {0}")]
    NotFound(JobId),
    #[error("job already exists: {0}")]
    AlreadyExists(JobId),
    #[error(transparent)]
    Transition(#[from] InvalidTransition),
}

/// Job counts per status.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct JobStats {
    pub pending: usize,
    pub processing: usize,
    pub completed: usize,
    pub failed: usize,
}

impl JobStats {
    pub fn total(&self) -> usize {
        self.pending + self.processing + self.completed + self.failed
    }
}

#[derive(Debug, Default)]
struct Jobs {
    by_id: HashMap<JobId, Job>,
    /// Insertion order, i.e. submission order.
    order: Vec<JobId>,
}

/// In-process job store.
#[derive(Debug, Default)]
pub struct InMemoryJobStore {
    inner: RwLock<Jobs>,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }
}

impl JobStore for InMemoryJobStore {
    fn insert(&self, job: Job) -> Result<JobId, JobStoreError> {
        let mut jobs = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        let id = job.id();
        if jobs.by_id.contains_key(&id) {
            return Err(JobStoreError::AlreadyExists(id));
        }
        jobs.by_id.insert(id, job);
        jobs.order.push(id);
        Ok(id)
    }

    fn get(&self, job_id: JobId) -> Result<Job, JobStoreError> {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .by_id
            .get(&job_id)
            .cloned()
            .ok_or(JobStoreError::NotFound(job_id))
    }

    fn update(
        &self,
        job_id: JobId,
        apply: &mut dyn FnMut(&mut Job) -> Result<(), InvalidTransition>,
    ) -> Result<Job, JobStoreError> {
        let mut jobs = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        let stored = jobs
            .by_id
            .get_mut(&job_id)
            .ok_or(JobStoreError::NotFound(job_id))?;

        let mut next = stored.clone();
        apply(&mut next)?;
        *stored = next.clone();
        Ok(next)
    }

    fn list(&self, status: Option<JobStatus>, limit: usize) -> Result<Vec<Job>, JobStoreError> {
        let jobs = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        Ok(jobs
            .order
            .iter()
            .filter_map(|id| jobs.by_id.get(id))
            .filter(|j| status.is_none_or(|s| j.status() == s))
            .take(limit)
            .cloned()
            .collect())
    }

    fn stats(&self) -> Result<JobStats, JobStoreError> {
        let jobs = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        let mut stats = JobStats::default();

        for job in jobs.by_id.values() {
            match job.status() {
                JobStatus::Pending => stats.pending += 1,
                JobStatus::Processing => stats.processing += 1,
                JobStatus::Completed => stats.completed += 1,
                JobStatus::Failed => stats.failed += 1,
            }
        }

        Ok(stats)
    }
}
