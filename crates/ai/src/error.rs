use thiserror::Error;

/// Failure while loading a model, parsing a dataset or running a forecast.
///
/// These are job-execution failures: callers record the `Display` text on the
/// job rather than propagating them.
#[derive(Debug, Error)]
pub enum AiError {
    #[error("model not found: {0}")]
    ModelNotFound(String),

    #[error("data format error: {0}")]
    DataFormat(String),

    #[error("not enough data points: need at least {required}, got {actual}")]
    InsufficientData { required: usize, actual: usize },

    #[error("invalid model artifact: {0}")]
    InvalidArtifact(String),

    #[error("inference failed: {0}")]
    Inference(String),

    #[error("model store I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl AiError {
    pub fn data_format(msg: impl Into<String>) -> Self {
        Self::DataFormat(msg.into())
    }

    pub fn inference(msg: impl Into<String>) -> Self {
        Self::Inference(msg.into())
    }

    pub fn invalid_artifact(msg: impl Into<String>) -> Self {
        Self::InvalidArtifact(msg.into())
    }
}
