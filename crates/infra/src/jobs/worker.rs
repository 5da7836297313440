//! The background worker: one job at a time, in submission order.
//!
//! ## Lifecycle
//!
//! `Stopped -> Running -> StopRequested -> Stopped`. `start` and `stop` are
//! idempotent. On stop the in-flight job gets `shutdown_grace` to finish; past
//! that it is marked failed. Ids still queued stay pending and are picked up on
//! the next `start`, once the abandoned execution has returned.
//!
//! ## Failure isolation
//!
//! Inference runs on the blocking pool. An error becomes the job's error text,
//! a panic becomes a generic failure, and a store error pauses the loop for
//! `error_pause` before continuing. None of these stop the worker.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use inferq_ai::{AiError, PredictionResult};
use inferq_core::JobId;

use super::executor::InferenceExecutor;
use super::queue::JobReceiver;
use super::store::{JobStore, JobStoreError};

/// Error recorded on a job abandoned at shutdown.
pub const SHUTDOWN_MESSAGE: &str = "service shutting down";

/// Error recorded on a job whose execution panicked.
pub const UNEXPECTED_MESSAGE: &str = "unexpected error while processing job";

/// Worker configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Name for logging
    pub name: String,
    /// Pause after a loop error before taking the next job
    pub error_pause: Duration,
    /// How long `stop` waits for the in-flight job
    pub shutdown_grace: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            name: "inference-worker".to_string(),
            error_pause: Duration::from_secs(1),
            shutdown_grace: Duration::from_secs(30),
        }
    }
}

impl WorkerConfig {
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_error_pause(mut self, pause: Duration) -> Self {
        self.error_pause = pause;
        self
    }

    pub fn with_shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerState {
    Stopped,
    Running,
    StopRequested,
}

/// Worker runtime statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct WorkerStats {
    pub jobs_processed: u64,
    pub jobs_succeeded: u64,
    pub jobs_failed: u64,
    /// Panics and store errors. Ordinary job failures are not counted.
    pub unexpected_errors: u64,
}

#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    #[error(transparent)]
    Store(#[from] JobStoreError),
}

struct Shared {
    config: WorkerConfig,
    store: Arc<dyn JobStore>,
    executor: InferenceExecutor,
    receiver: tokio::sync::Mutex<JobReceiver>,
    stats: Mutex<WorkerStats>,
    /// Execution left running when a job outlived the shutdown grace
    abandoned: Mutex<Option<Execution>>,
}

type Execution = JoinHandle<Result<PredictionResult, AiError>>;

impl Shared {
    fn record(&self, f: impl FnOnce(&mut WorkerStats)) {
        f(&mut *self.stats.lock().unwrap_or_else(PoisonError::into_inner));
    }

    fn abandoned(&self) -> std::sync::MutexGuard<'_, Option<Execution>> {
        self.abandoned.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

enum Lifecycle {
    Stopped,
    Running {
        shutdown: watch::Sender<bool>,
        join: JoinHandle<()>,
    },
    StopRequested,
}

enum Flow {
    Continue,
    Stop,
}

/// Handle to the background worker.
pub struct JobWorker {
    shared: Arc<Shared>,
    lifecycle: Mutex<Lifecycle>,
}

impl JobWorker {
    pub fn new(
        config: WorkerConfig,
        store: Arc<dyn JobStore>,
        executor: InferenceExecutor,
        receiver: JobReceiver,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                config,
                store,
                executor,
                receiver: tokio::sync::Mutex::new(receiver),
                stats: Mutex::new(WorkerStats::default()),
                abandoned: Mutex::new(None),
            }),
            lifecycle: Mutex::new(Lifecycle::Stopped),
        }
    }

    /// Spawn the worker loop on the current tokio runtime.
    ///
    /// Returns `false` when a loop is already running or still stopping.
    pub fn start(&self) -> bool {
        let mut lifecycle = self.lifecycle.lock().unwrap_or_else(PoisonError::into_inner);
        match &*lifecycle {
            Lifecycle::Running { join, .. } if !join.is_finished() => return false,
            Lifecycle::StopRequested => {
                warn!(worker = %self.shared.config.name, "start ignored while stopping");
                return false;
            }
            _ => {}
        }

        let (shutdown, signal) = watch::channel(false);
        let join = tokio::spawn(run_loop(self.shared.clone(), signal));
        *lifecycle = Lifecycle::Running { shutdown, join };
        true
    }

    /// Request shutdown and wait for the loop to exit.
    ///
    /// A no-op unless the worker is running. Dropping the future before it
    /// completes still leaves the worker `Stopped`; a later `start` waits for
    /// the old loop to release the queue.
    pub async fn stop(&self) {
        let (shutdown, join) = {
            let mut lifecycle = self.lifecycle.lock().unwrap_or_else(PoisonError::into_inner);
            match std::mem::replace(&mut *lifecycle, Lifecycle::StopRequested) {
                Lifecycle::Running { shutdown, join } => (shutdown, join),
                other => {
                    *lifecycle = other;
                    return;
                }
            }
        };

        let _stopped = MarkStopped(&self.lifecycle);

        info!(worker = %self.shared.config.name, "worker stop requested");
        let _ = shutdown.send(true);
        if let Err(err) = join.await {
            error!(worker = %self.shared.config.name, error = %err, "worker task ended abnormally");
        }
    }

    pub fn state(&self) -> WorkerState {
        match &*self.lifecycle.lock().unwrap_or_else(PoisonError::into_inner) {
            Lifecycle::Running { join, .. } if join.is_finished() => WorkerState::Stopped,
            Lifecycle::Running { .. } => WorkerState::Running,
            Lifecycle::StopRequested => WorkerState::StopRequested,
            Lifecycle::Stopped => WorkerState::Stopped,
        }
    }

    pub fn stats(&self) -> WorkerStats {
        self.shared
            .stats
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

/// Resets the lifecycle to `Stopped` when `stop` finishes or is dropped.
struct MarkStopped<'a>(&'a Mutex<Lifecycle>);

impl Drop for MarkStopped<'_> {
    fn drop(&mut self) {
        *self.0.lock().unwrap_or_else(PoisonError::into_inner) = Lifecycle::Stopped;
    }
}

impl std::fmt::Debug for JobWorker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobWorker")
            .field("name", &self.shared.config.name)
            .field("state", &self.state())
            .finish()
    }
}

async fn run_loop(shared: Arc<Shared>, mut shutdown: watch::Receiver<bool>) {
    let name = shared.config.name.clone();
    let mut receiver = shared.receiver.lock().await;
    info!(worker = %name, "worker started");

    let abandoned = shared.abandoned().take();
    if let Some(mut execution) = abandoned {
        info!(worker = %name, "waiting for abandoned execution to return");
        tokio::select! {
            biased;
            _ = stop_requested(&mut shutdown) => {
                *shared.abandoned() = Some(execution);
                info!(worker = %name, "worker stopped");
                return;
            }
            _ = &mut execution => {}
        }
    }

    loop {
        let job_id = tokio::select! {
            biased;
            _ = stop_requested(&mut shutdown) => break,
            next = receiver.dequeue() => match next {
                Some(id) => id,
                None => {
                    warn!(worker = %name, "job queue closed");
                    break;
                }
            },
        };

        match process(&shared, job_id, &mut shutdown).await {
            Ok(Flow::Continue) => {}
            Ok(Flow::Stop) => break,
            Err(err) => {
                error!(worker = %name, job_id = %job_id, error = %err, "worker loop error");
                shared.record(|s| s.unexpected_errors += 1);
                tokio::select! {
                    biased;
                    _ = stop_requested(&mut shutdown) => break,
                    _ = tokio::time::sleep(shared.config.error_pause) => {}
                }
            }
        }
    }

    info!(worker = %name, "worker stopped");
}

/// Resolves once shutdown is signalled or the signalling side is gone.
async fn stop_requested(shutdown: &mut watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|stop| *stop).await;
}

async fn process(
    shared: &Arc<Shared>,
    job_id: JobId,
    shutdown: &mut watch::Receiver<bool>,
) -> Result<Flow, WorkerError> {
    let job = shared.store.update(job_id, &mut |j| j.mark_processing())?;
    debug!(
        worker = %shared.config.name,
        job_id = %job_id,
        model = %job.model(),
        "processing job"
    );

    let mut task = {
        let executor = shared.executor.clone();
        let model = job.model().clone();
        let payload = job.payload().clone();
        tokio::task::spawn_blocking(move || executor.run(&model, &payload))
    };

    let (joined, flow) = tokio::select! {
        biased;
        joined = &mut task => (joined, Flow::Continue),
        _ = stop_requested(shutdown) => {
            debug!(worker = %shared.config.name, job_id = %job_id, "draining in-flight job");
            match tokio::time::timeout(shared.config.shutdown_grace, &mut task).await {
                Ok(joined) => (joined, Flow::Stop),
                Err(_) => {
                    warn!(
                        worker = %shared.config.name,
                        job_id = %job_id,
                        grace_secs = shared.config.shutdown_grace.as_secs_f64(),
                        "in-flight job did not finish before shutdown"
                    );
                    *shared.abandoned() = Some(task);
                    finish(shared, job_id, Err(SHUTDOWN_MESSAGE.to_string()))?;
                    return Ok(Flow::Stop);
                }
            }
        }
    };

    let outcome = match joined {
        Ok(Ok(result)) => Ok(result),
        Ok(Err(err)) => Err(err.to_string()),
        Err(err) => {
            error!(worker = %shared.config.name, job_id = %job_id, error = %err, "job execution panicked");
            shared.record(|s| s.unexpected_errors += 1);
            Err(UNEXPECTED_MESSAGE.to_string())
        }
    };

    finish(shared, job_id, outcome)?;
    Ok(flow)
}

/// Write the terminal state and count it.
fn finish(
    shared: &Shared,
    job_id: JobId,
    outcome: Result<PredictionResult, String>,
) -> Result<(), WorkerError> {
    shared.store.update(job_id, &mut |j| match &outcome {
        Ok(result) => j.mark_completed(result.clone()),
        Err(error) => j.mark_failed(error.clone()),
    })?;

    shared.record(|s| {
        s.jobs_processed += 1;
        if outcome.is_ok() {
            s.jobs_succeeded += 1;
        } else {
            s.jobs_failed += 1;
        }
    });

    match &outcome {
        Ok(_) => info!(worker = %shared.config.name, job_id = %job_id, "job completed"),
        Err(error) => warn!(worker = %shared.config.name, job_id = %job_id, error = %error, "job failed"),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Instant;

    use inferq_ai::{
        AiError, DatasetParser, DatasetSchema, Device, ForecastModel, InMemoryModelStore,
        LinearWeights, ModelCache, ModelConfig,
    };
    use inferq_core::ModelName;

    use super::*;
    use crate::jobs::queue::{JobQueue, job_queue};
    use crate::jobs::store::InMemoryJobStore;
    use crate::jobs::types::{Job, JobStatus};

    const CSV: &str = "emb_0,emb_1,last_price\n0.1,0.2,100\n";

    struct Panics;

    impl ForecastModel for Panics {
        fn prepare(&mut self, _device: Device) -> Result<(), AiError> {
            Ok(())
        }

        fn predict_last(&self, _window: &[Vec<f32>]) -> Result<Vec<f64>, AiError> {
            panic!("forward pass exploded")
        }
    }

    struct Sleeps(Duration);

    impl ForecastModel for Sleeps {
        fn prepare(&mut self, _device: Device) -> Result<(), AiError> {
            Ok(())
        }

        fn predict_last(&self, _window: &[Vec<f32>]) -> Result<Vec<f64>, AiError> {
            std::thread::sleep(self.0);
            Ok(vec![0.0])
        }
    }

    /// Sleeps like `Sleeps` while tracking overlapping forward passes.
    struct Counted {
        sleep: Duration,
        overlap: Arc<Overlap>,
    }

    #[derive(Default)]
    struct Overlap {
        current: AtomicUsize,
        max: AtomicUsize,
    }

    impl ForecastModel for Counted {
        fn prepare(&mut self, _device: Device) -> Result<(), AiError> {
            Ok(())
        }

        fn predict_last(&self, _window: &[Vec<f32>]) -> Result<Vec<f64>, AiError> {
            let now = self.overlap.current.fetch_add(1, Ordering::SeqCst) + 1;
            self.overlap.max.fetch_max(now, Ordering::SeqCst);
            std::thread::sleep(self.sleep);
            self.overlap.current.fetch_sub(1, Ordering::SeqCst);
            Ok(vec![0.0])
        }
    }

    struct Harness {
        worker: JobWorker,
        store: Arc<InMemoryJobStore>,
        queue: JobQueue,
        overlap: Arc<Overlap>,
    }

    fn name(s: &str) -> ModelName {
        ModelName::parse(s).unwrap()
    }

    fn harness(config: WorkerConfig, sleep: Duration) -> Harness {
        let models = InMemoryModelStore::arc();
        let config_1 = ModelConfig::new(2, 1).with_seq_length(1);
        models
            .register_linear(name("linear"), config_1.clone(), LinearWeights::constant(2, vec![0.05]))
            .unwrap();
        models.register(name("panics"), config_1.clone(), || {
            Ok(Box::new(Panics) as Box<dyn ForecastModel>)
        });
        models.register(name("slow"), config_1.clone(), move || {
            Ok(Box::new(Sleeps(sleep)) as Box<dyn ForecastModel>)
        });
        let overlap = Arc::new(Overlap::default());
        let counted = overlap.clone();
        models.register(name("counted"), config_1, move || {
            Ok(Box::new(Counted {
                sleep,
                overlap: counted.clone(),
            }) as Box<dyn ForecastModel>)
        });

        let cache = Arc::new(ModelCache::new(models, Device::Cpu));
        let parser = DatasetParser::new(DatasetSchema::default().with_embedding_dim(2));
        let executor = InferenceExecutor::new(cache, parser, 20);

        let store = InMemoryJobStore::arc();
        let (queue, receiver) = job_queue();
        let worker = JobWorker::new(config, store.clone(), executor, receiver);
        Harness {
            worker,
            store,
            queue,
            overlap,
        }
    }

    fn quick() -> WorkerConfig {
        WorkerConfig::default()
            .with_error_pause(Duration::from_millis(20))
            .with_shutdown_grace(Duration::from_secs(5))
    }

    impl Harness {
        fn submit(&self, model: &str) -> JobId {
            let id = self
                .store
                .create(name(model), Arc::from(CSV.as_bytes()))
                .unwrap();
            self.queue.enqueue(id).unwrap();
            id
        }

        async fn wait_for(&self, id: JobId, done: impl Fn(&Job) -> bool) -> Job {
            let deadline = Instant::now() + Duration::from_secs(5);
            loop {
                let job = self.store.get(id).unwrap();
                if done(&job) {
                    return job;
                }
                assert!(Instant::now() < deadline, "timed out waiting on job {id}");
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        }

        async fn wait_terminal(&self, id: JobId) -> Job {
            self.wait_for(id, |j| j.status().is_terminal()).await
        }
    }

    #[tokio::test]
    async fn start_and_stop_are_idempotent() {
        let h = harness(quick(), Duration::ZERO);
        assert_eq!(h.worker.state(), WorkerState::Stopped);

        assert!(h.worker.start());
        assert!(!h.worker.start());
        assert_eq!(h.worker.state(), WorkerState::Running);

        h.worker.stop().await;
        assert_eq!(h.worker.state(), WorkerState::Stopped);
        h.worker.stop().await;
        assert_eq!(h.worker.state(), WorkerState::Stopped);
    }

    #[tokio::test]
    async fn jobs_run_one_at_a_time_in_submission_order() {
        let h = harness(quick(), Duration::from_millis(20));
        let ids: Vec<JobId> = ["slow", "linear", "slow", "linear"]
            .into_iter()
            .map(|m| h.submit(m))
            .collect();
        h.worker.start();

        let mut jobs = Vec::new();
        for id in &ids {
            jobs.push(h.wait_terminal(*id).await);
        }

        for pair in jobs.windows(2) {
            let prev_done = pair[0].completed_at().unwrap();
            let next_start = pair[1].started_at().unwrap();
            assert!(prev_done <= next_start, "jobs overlapped");
        }
        assert!(jobs.iter().all(|j| j.status() == JobStatus::Completed));
        assert_eq!(h.worker.stats().jobs_succeeded, 4);
        h.worker.stop().await;
    }

    #[tokio::test]
    async fn execution_errors_are_recorded_on_the_job() {
        let h = harness(quick(), Duration::ZERO);
        h.worker.start();

        let id = h.submit("ghost");
        let job = h.wait_terminal(id).await;
        assert_eq!(job.status(), JobStatus::Failed);
        assert_eq!(job.error(), Some("model not found: ghost"));
        assert!(job.result().is_none());

        let stats = h.worker.stats();
        assert_eq!(stats.jobs_failed, 1);
        assert_eq!(stats.unexpected_errors, 0);
        h.worker.stop().await;
    }

    #[tokio::test]
    async fn panicking_model_fails_the_job_and_the_worker_carries_on() {
        let h = harness(quick(), Duration::ZERO);
        h.worker.start();

        let bad = h.submit("panics");
        let good = h.submit("linear");

        let bad = h.wait_terminal(bad).await;
        assert_eq!(bad.status(), JobStatus::Failed);
        assert_eq!(bad.error(), Some(UNEXPECTED_MESSAGE));

        let good = h.wait_terminal(good).await;
        assert_eq!(good.status(), JobStatus::Completed);
        assert_eq!(h.worker.state(), WorkerState::Running);
        assert_eq!(h.worker.stats().unexpected_errors, 1);
        h.worker.stop().await;
    }

    #[tokio::test]
    async fn unknown_ids_pause_the_loop_without_stopping_it() {
        let h = harness(quick(), Duration::ZERO);
        h.worker.start();

        h.queue.enqueue(JobId::new()).unwrap();
        let id = h.submit("linear");

        assert_eq!(h.wait_terminal(id).await.status(), JobStatus::Completed);
        assert_eq!(h.worker.stats().unexpected_errors, 1);
        h.worker.stop().await;
    }

    #[tokio::test]
    async fn stop_drains_the_in_flight_job_and_leaves_the_rest_pending() {
        let h = harness(quick(), Duration::from_millis(200));
        let in_flight = h.submit("slow");
        let queued = h.submit("linear");
        h.worker.start();

        h.wait_for(in_flight, |j| j.status() == JobStatus::Processing).await;
        h.worker.stop().await;

        assert_eq!(h.store.get(in_flight).unwrap().status(), JobStatus::Completed);
        assert_eq!(h.store.get(queued).unwrap().status(), JobStatus::Pending);
        assert_eq!(h.queue.depth(), 1);

        assert!(h.worker.start());
        assert_eq!(h.wait_terminal(queued).await.status(), JobStatus::Completed);
        h.worker.stop().await;
    }

    #[tokio::test]
    async fn jobs_outliving_the_grace_period_are_failed() {
        let config = quick().with_shutdown_grace(Duration::from_millis(50));
        let h = harness(config, Duration::from_millis(600));
        let id = h.submit("slow");
        h.worker.start();

        h.wait_for(id, |j| j.status() == JobStatus::Processing).await;
        h.worker.stop().await;

        let job = h.store.get(id).unwrap();
        assert_eq!(job.status(), JobStatus::Failed);
        assert_eq!(job.error(), Some(SHUTDOWN_MESSAGE));
        assert_eq!(h.worker.state(), WorkerState::Stopped);
    }

    #[tokio::test]
    async fn restart_waits_for_the_abandoned_execution() {
        let config = quick().with_shutdown_grace(Duration::from_millis(50));
        let h = harness(config, Duration::from_millis(400));
        let abandoned = h.submit("counted");
        h.worker.start();

        h.wait_for(abandoned, |j| j.status() == JobStatus::Processing).await;
        h.worker.stop().await;
        assert_eq!(h.store.get(abandoned).unwrap().error(), Some(SHUTDOWN_MESSAGE));

        assert!(h.worker.start());
        let next = h.submit("counted");
        assert_eq!(h.wait_terminal(next).await.status(), JobStatus::Completed);
        assert_eq!(h.overlap.max.load(Ordering::SeqCst), 1, "forward passes overlapped");
        h.worker.stop().await;
    }

    #[tokio::test]
    async fn dropped_stop_still_leaves_the_worker_restartable() {
        let h = harness(quick(), Duration::from_millis(300));
        let in_flight = h.submit("slow");
        h.worker.start();

        h.wait_for(in_flight, |j| j.status() == JobStatus::Processing).await;
        let cut_short = tokio::time::timeout(Duration::from_millis(10), h.worker.stop()).await;
        assert!(cut_short.is_err());
        assert_eq!(h.worker.state(), WorkerState::Stopped);

        assert!(h.worker.start());
        let next = h.submit("linear");
        assert_eq!(h.wait_terminal(next).await.status(), JobStatus::Completed);
        assert_eq!(h.store.get(in_flight).unwrap().status(), JobStatus::Completed);
        h.worker.stop().await;
    }
}
