//! `inferq-ai`
//!
//! **Responsibility:** everything numeric about a single inference.
//!
//! - `store`: where model artifacts come from (`ModelStore`).
//! - `model`: the loaded model handle and its forward pass.
//! - `cache`: load-once memoization of models by name.
//! - `dataset`: CSV payload -> feature window + reference prices.
//! - `forecast`: window selection and relative -> absolute price conversion.
//!
//! This crate knows nothing about jobs, queues or HTTP.

pub mod cache;
pub mod dataset;
pub mod device;
pub mod error;
pub mod forecast;
pub mod model;
pub mod store;

pub use cache::{CachedModel, ModelCache};
pub use dataset::{DatasetParser, DatasetSchema, ParsedDataset};
pub use device::Device;
pub use error::AiError;
pub use forecast::{PredictionResult, forecast, to_absolute};
pub use model::{ForecastModel, LinearForecaster, LinearWeights, ModelArtifact, ModelConfig};
pub use store::{FsModelStore, InMemoryModelStore, ModelDescriptor, ModelStore};
