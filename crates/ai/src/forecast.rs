use serde::{Deserialize, Serialize};

use crate::cache::CachedModel;
use crate::dataset::ParsedDataset;
use crate::error::AiError;

/// Output of a completed forecast.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionResult {
    /// Absolute predicted prices, one per horizon step.
    pub predicted_prices: Vec<f64>,
    pub prediction_horizon: usize,
    /// The anchor: last reference price in the dataset.
    pub current_price: f64,
}

/// Convert relative changes into absolute values: `anchor * (1 + r)`.
pub fn to_absolute(anchor: f64, relatives: &[f64]) -> Vec<f64> {
    relatives.iter().map(|r| anchor * (1.0 + r)).collect()
}

/// Run `model` over the trailing window of `dataset`.
///
/// The window length comes from the model config, or `default_window` when the
/// config has none. Fewer retained rows than the window is `InsufficientData`.
pub fn forecast(
    model: &CachedModel,
    dataset: &ParsedDataset,
    default_window: usize,
) -> Result<PredictionResult, AiError> {
    let window = model.config().window_or(default_window);
    let actual = dataset.len();
    if actual < window {
        return Err(AiError::InsufficientData {
            required: window,
            actual,
        });
    }

    let anchor = dataset
        .last_reference()
        .ok_or_else(|| AiError::inference("dataset has no reference prices"))?;
    let relatives = model.model().predict_last(&dataset.features[actual - window..])?;

    Ok(PredictionResult {
        predicted_prices: to_absolute(anchor, &relatives),
        prediction_horizon: model.config().prediction_horizon,
        current_price: anchor,
    })
}
