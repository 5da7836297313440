//! Single-job inference: model lookup, payload parsing, forecast.

use std::sync::Arc;

use tracing::debug;

use inferq_ai::{AiError, DatasetParser, ModelCache, PredictionResult, forecast};
use inferq_core::ModelName;

/// Runs one job's inference. Stateless apart from the shared model cache.
#[derive(Debug, Clone)]
pub struct InferenceExecutor {
    cache: Arc<ModelCache>,
    parser: DatasetParser,
    default_window: usize,
}

impl InferenceExecutor {
    pub fn new(cache: Arc<ModelCache>, parser: DatasetParser, default_window: usize) -> Self {
        Self {
            cache,
            parser,
            default_window,
        }
    }

    pub fn cache(&self) -> &Arc<ModelCache> {
        &self.cache
    }

    /// Forecast from `payload` with the model named `model`.
    ///
    /// Blocking: loading and the forward pass are CPU bound.
    pub fn run(&self, model: &ModelName, payload: &[u8]) -> Result<PredictionResult, AiError> {
        let cached = self.cache.get_or_load(model)?;
        let dataset = self.parser.parse(payload)?;
        debug!(
            model = %model,
            rows = dataset.len(),
            skipped_rows = dataset.skipped_rows,
            "dataset parsed"
        );
        forecast(&cached, &dataset, self.default_window)
    }
}
