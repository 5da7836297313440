//! Loaded model handles and the forward pass.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};

use crate::device::Device;
use crate::error::AiError;

/// Hyperparameters stored alongside a model's weights.
///
/// Only the fields the service reads are typed; everything else in the
/// checkpoint's config (hidden size, layer counts, dropout...) is carried
/// verbatim in `extra` so listings show the full configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Width of each feature vector fed to the model.
    pub input_size: usize,

    /// Number of future steps predicted per call.
    #[serde(default = "default_horizon")]
    pub prediction_horizon: usize,

    /// History window length the model was trained on.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seq_length: Option<usize>,

    #[serde(flatten)]
    pub extra: Map<String, JsonValue>,
}

fn default_horizon() -> usize {
    1
}

impl ModelConfig {
    pub fn new(input_size: usize, prediction_horizon: usize) -> Self {
        Self {
            input_size,
            prediction_horizon,
            seq_length: None,
            extra: Map::new(),
        }
    }

    pub fn with_seq_length(mut self, seq_length: usize) -> Self {
        self.seq_length = Some(seq_length);
        self
    }

    /// Window length for this model, falling back to `default` when the
    /// checkpoint does not record one.
    pub fn window_or(&self, default: usize) -> usize {
        self.seq_length.unwrap_or(default).max(1)
    }
}

/// A numeric model that turns a history window into relative price changes.
pub trait ForecastModel: Send + Sync + 'static {
    /// Move the model onto `device` and switch it to inference-only mode.
    ///
    /// Called exactly once by the model cache before the model is shared.
    fn prepare(&mut self, device: Device) -> Result<(), AiError>;

    /// Run the forward pass over `window` (oldest first) and return one
    /// relative change per horizon step.
    fn predict_last(&self, window: &[Vec<f32>]) -> Result<Vec<f64>, AiError>;
}

/// What a model store hands back for a name: the model and its config.
pub struct ModelArtifact {
    pub model: Box<dyn ForecastModel>,
    pub config: ModelConfig,
}

impl std::fmt::Debug for ModelArtifact {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelArtifact")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Serialized weights of a [`LinearForecaster`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinearWeights {
    /// `prediction_horizon` rows of `input_size` coefficients.
    pub weights: Vec<Vec<f32>>,
    pub bias: Vec<f32>,
}

impl LinearWeights {
    /// All-zero weights with the given per-step bias.
    pub fn constant(input_size: usize, bias: Vec<f32>) -> Self {
        Self {
            weights: vec![vec![0.0; input_size]; bias.len()],
            bias,
        }
    }
}

/// Linear read-out over the time-averaged window.
///
/// `r[h] = bias[h] + Σ_j weights[h][j] * mean_t(window[t][j])`
#[derive(Debug, Clone)]
pub struct LinearForecaster {
    input_size: usize,
    weights: LinearWeights,
    device: Option<Device>,
}

impl LinearForecaster {
    pub fn new(config: &ModelConfig, weights: LinearWeights) -> Result<Self, AiError> {
        let horizon = config.prediction_horizon;
        if weights.weights.len() != horizon || weights.bias.len() != horizon {
            return Err(AiError::invalid_artifact(format!(
                "expected {horizon} weight rows and bias terms, got {} and {}",
                weights.weights.len(),
                weights.bias.len()
            )));
        }
        if let Some((row, w)) = weights
            .weights
            .iter()
            .enumerate()
            .find(|(_, w)| w.len() != config.input_size)
        {
            return Err(AiError::invalid_artifact(format!(
                "weight row {row} has {} coefficients, expected {}",
                w.len(),
                config.input_size
            )));
        }

        Ok(Self {
            input_size: config.input_size,
            weights,
            device: None,
        })
    }

    pub fn device(&self) -> Option<Device> {
        self.device
    }
}

impl ForecastModel for LinearForecaster {
    fn prepare(&mut self, device: Device) -> Result<(), AiError> {
        if device != Device::Cpu {
            return Err(AiError::inference(format!(
                "linear forecaster runs on cpu only, requested {device}"
            )));
        }
        self.device = Some(device);
        Ok(())
    }

    fn predict_last(&self, window: &[Vec<f32>]) -> Result<Vec<f64>, AiError> {
        if self.device.is_none() {
            return Err(AiError::inference("model has not been prepared for inference"));
        }
        if window.is_empty() {
            return Err(AiError::inference("empty input window"));
        }
        if let Some(bad) = window.iter().find(|row| row.len() != self.input_size) {
            return Err(AiError::inference(format!(
                "feature width mismatch: expected {}, got {}",
                self.input_size,
                bad.len()
            )));
        }

        let steps = window.len() as f64;
        let mut pooled = vec![0.0_f64; self.input_size];
        for row in window {
            for (acc, v) in pooled.iter_mut().zip(row) {
                *acc += f64::from(*v);
            }
        }
        pooled.iter_mut().for_each(|acc| *acc /= steps);

        Ok(self
            .weights
            .weights
            .iter()
            .zip(&self.weights.bias)
            .map(|(row, bias)| {
                row.iter()
                    .zip(&pooled)
                    .fold(f64::from(*bias), |sum, (w, x)| sum + f64::from(*w) * x)
            })
            .collect())
    }
}
