//! Infrastructure layer: configuration, job system and the service context.

pub mod config;
pub mod jobs;
pub mod service;

pub use config::{ConfigError, ServiceConfig};
pub use service::{InferenceService, ModelInfo, ServiceError, ServiceStats};
