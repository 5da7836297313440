//! The service context: everything a request handler needs, built once at
//! process start and shared by handle.

use std::sync::Arc;

use serde::Serialize;
use tracing::info;

use inferq_ai::{
    AiError, DatasetParser, FsModelStore, ModelCache, ModelConfig, ModelStore,
};
use inferq_core::{DomainError, JobId, ModelName};

use crate::config::ServiceConfig;
use crate::jobs::{
    InMemoryJobStore, InferenceExecutor, Job, JobQueue, JobStats, JobStatus, JobStore,
    JobStoreError, JobWorker, QueueClosed, WorkerState, WorkerStats, job_queue,
};

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("model not found: {name}")]
    ModelNotFound { name: String, available: Vec<String> },

    #[error("job not found: {0}")]
    JobNotFound(JobId),

    #[error("invalid model name: {0}")]
    InvalidModelName(#[source] DomainError),

    #[error("job store error: {0}")]
    Store(#[source] JobStoreError),

    #[error(transparent)]
    Models(#[from] AiError),

    #[error(transparent)]
    QueueClosed(#[from] QueueClosed),
}

impl From<JobStoreError> for ServiceError {
    fn from(err: JobStoreError) -> Self {
        match err {
            JobStoreError::NotFound(id) => ServiceError::JobNotFound(id),
            other => ServiceError::Store(other),
        }
    }
}

/// A model as shown to clients.
#[derive(Debug, Clone, Serialize)]
pub struct ModelInfo {
    pub name: ModelName,
    pub path: String,
    pub config: ModelConfig,
    /// Whether the model is already resident in the cache.
    pub loaded: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct ServiceStats {
    pub jobs: JobStats,
    pub queue_depth: usize,
    pub worker_state: WorkerState,
    pub worker: WorkerStats,
    pub models_loaded: usize,
}

pub struct InferenceService {
    config: ServiceConfig,
    models: Arc<dyn ModelStore>,
    cache: Arc<ModelCache>,
    store: Arc<dyn JobStore>,
    queue: JobQueue,
    worker: JobWorker,
}

impl InferenceService {
    /// Service over `models` with an in-memory job store. The worker is not
    /// started.
    pub fn new(config: ServiceConfig, models: Arc<dyn ModelStore>) -> Self {
        Self::with_store(config, models, InMemoryJobStore::arc())
    }

    pub fn with_store(
        config: ServiceConfig,
        models: Arc<dyn ModelStore>,
        store: Arc<dyn JobStore>,
    ) -> Self {
        let cache = Arc::new(ModelCache::new(models.clone(), config.device));
        let executor = InferenceExecutor::new(
            cache.clone(),
            DatasetParser::new(config.dataset.clone()),
            config.window,
        );
        let (queue, receiver) = job_queue();
        let worker = JobWorker::new(config.worker.clone(), store.clone(), executor, receiver);

        Self {
            config,
            models,
            cache,
            store,
            queue,
            worker,
        }
    }

    /// Service over the checkpoint directory named in `config`.
    pub fn open(config: ServiceConfig) -> Result<Self, ServiceError> {
        let models = FsModelStore::open(config.models_dir.clone())?;
        info!(
            models_dir = %models.dir().display(),
            device = %config.device,
            "model store opened"
        );
        Ok(Self::new(config, Arc::new(models)))
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    /// Start the background worker. Must be called inside a tokio runtime.
    pub fn start_worker(&self) -> bool {
        self.worker.start()
    }

    pub async fn stop_worker(&self) {
        self.worker.stop().await;
    }

    pub fn worker_state(&self) -> WorkerState {
        self.worker.state()
    }

    /// Create a pending job for `model` and queue it. Returns immediately.
    ///
    /// Rejects invalid names and names the model store does not know.
    pub fn submit(&self, model: &str, payload: impl Into<Arc<[u8]>>) -> Result<JobId, ServiceError> {
        let name = ModelName::parse(model).map_err(ServiceError::InvalidModelName)?;
        if !self.models.contains(&name)? {
            let available = self
                .models
                .list()?
                .into_iter()
                .map(|m| m.name.to_string())
                .collect();
            return Err(ServiceError::ModelNotFound {
                name: name.to_string(),
                available,
            });
        }

        let job_id = self.store.create(name.clone(), payload.into())?;
        self.queue.enqueue(job_id)?;
        info!(job_id = %job_id, model = %name, "job submitted");
        Ok(job_id)
    }

    /// Current snapshot of a job.
    pub fn job(&self, job_id: JobId) -> Result<Job, ServiceError> {
        Ok(self.store.get(job_id)?)
    }

    /// Jobs in submission order, optionally filtered by status.
    pub fn jobs(&self, status: Option<JobStatus>, limit: usize) -> Result<Vec<Job>, ServiceError> {
        Ok(self.store.list(status, limit)?)
    }

    pub fn list_models(&self) -> Result<Vec<ModelInfo>, ServiceError> {
        Ok(self
            .models
            .list()?
            .into_iter()
            .map(|m| ModelInfo {
                loaded: self.cache.is_loaded(&m.name),
                name: m.name,
                path: m.path,
                config: m.config,
            })
            .collect())
    }

    pub fn stats(&self) -> Result<ServiceStats, ServiceError> {
        Ok(ServiceStats {
            jobs: self.store.stats()?,
            queue_depth: self.queue.depth(),
            worker_state: self.worker.state(),
            worker: self.worker.stats(),
            models_loaded: self.cache.len(),
        })
    }
}

impl std::fmt::Debug for InferenceService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InferenceService")
            .field("config", &self.config)
            .field("worker", &self.worker)
            .finish_non_exhaustive()
    }
}
