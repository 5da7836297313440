//! Service configuration.
//!
//! Defaults suit local development; `from_env` overrides them from
//! `INFERQ_*` variables.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use inferq_ai::{DatasetSchema, Device};

use crate::jobs::WorkerConfig;

pub const ENV_MODELS_DIR: &str = "INFERQ_MODELS_DIR";
pub const ENV_BIND_ADDR: &str = "INFERQ_BIND_ADDR";
pub const ENV_DEVICE: &str = "INFERQ_DEVICE";
pub const ENV_WINDOW: &str = "INFERQ_WINDOW";
pub const ENV_EMBEDDING_DIM: &str = "INFERQ_EMBEDDING_DIM";
pub const ENV_SHUTDOWN_GRACE_SECS: &str = "INFERQ_SHUTDOWN_GRACE_SECS";

#[derive(Debug, thiserror::Error)]
#[error("invalid value {value:?} for {var}: {reason}")]
pub struct ConfigError {
    pub var: &'static str,
    pub value: String,
    pub reason: String,
}

#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Directory scanned for model checkpoints
    pub models_dir: PathBuf,
    pub bind_addr: SocketAddr,
    pub device: Device,
    /// History window used when a model config has no `seq_length`
    pub window: usize,
    pub dataset: DatasetSchema,
    pub worker: WorkerConfig,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            models_dir: PathBuf::from("models"),
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8000)),
            device: Device::Cpu,
            window: 20,
            dataset: DatasetSchema::default(),
            worker: WorkerConfig::default(),
        }
    }
}

impl ServiceConfig {
    /// Defaults overridden by the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Defaults overridden by whatever `lookup` returns for each variable.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(dir) = lookup(ENV_MODELS_DIR) {
            config.models_dir = PathBuf::from(dir);
        }
        if let Some(addr) = lookup(ENV_BIND_ADDR) {
            config.bind_addr = parse(ENV_BIND_ADDR, addr)?;
        }
        if let Some(device) = lookup(ENV_DEVICE) {
            config.device = parse(ENV_DEVICE, device)?;
        }
        if let Some(window) = lookup(ENV_WINDOW) {
            config.window = positive(ENV_WINDOW, window)?;
        }
        if let Some(dim) = lookup(ENV_EMBEDDING_DIM) {
            config.dataset.embedding_dim = positive(ENV_EMBEDDING_DIM, dim)?;
        }
        if let Some(secs) = lookup(ENV_SHUTDOWN_GRACE_SECS) {
            let secs: u64 = parse(ENV_SHUTDOWN_GRACE_SECS, secs)?;
            config.worker.shutdown_grace = Duration::from_secs(secs);
        }

        Ok(config)
    }

    pub fn with_models_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.models_dir = dir.into();
        self
    }

    pub fn with_device(mut self, device: Device) -> Self {
        self.device = device;
        self
    }

    pub fn with_window(mut self, window: usize) -> Self {
        self.window = window;
        self
    }

    pub fn with_dataset(mut self, dataset: DatasetSchema) -> Self {
        self.dataset = dataset;
        self
    }

    pub fn with_worker(mut self, worker: WorkerConfig) -> Self {
        self.worker = worker;
        self
    }
}

fn parse<T>(var: &'static str, value: String) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    value.trim().parse().map_err(|e: T::Err| ConfigError {
        var,
        reason: e.to_string(),
        value,
    })
}

fn positive(var: &'static str, value: String) -> Result<usize, ConfigError> {
    match parse::<usize>(var, value.clone())? {
        0 => Err(ConfigError {
            var,
            value,
            reason: "must be greater than zero".to_string(),
        }),
        n => Ok(n),
    }
}
