//! Inference job system.
//!
//! ## Components
//!
//! - `Job`: one submission tracked through `Pending -> Processing -> Completed | Failed`
//! - `JobStore`: job records by id (in-memory)
//! - `JobQueue` / `JobReceiver`: FIFO of job ids, submission to worker
//! - `InferenceExecutor`: model lookup, payload parsing and forecast for one job
//! - `JobWorker`: the single background consumer of the queue

pub mod executor;
pub mod queue;
pub mod store;
pub mod types;
pub mod worker;

pub use executor::InferenceExecutor;
pub use queue::{JobQueue, JobReceiver, QueueClosed, job_queue};
pub use store::{InMemoryJobStore, JobStats, JobStore, JobStoreError};
pub use types::{InvalidTransition, Job, JobStatus};
pub use worker::{
    JobWorker, SHUTDOWN_MESSAGE, UNEXPECTED_MESSAGE, WorkerConfig, WorkerError, WorkerState,
    WorkerStats,
};
