//! Model stores: where artifacts are listed and loaded from.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use serde::{Deserialize, Serialize};
use serde::de::IgnoredAny;
use tracing::warn;

use inferq_core::ModelName;

use crate::error::AiError;
use crate::model::{ForecastModel, LinearForecaster, LinearWeights, ModelArtifact, ModelConfig};

/// A model known to a store, without its weights.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModelDescriptor {
    pub name: ModelName,
    /// Where the artifact lives (a file path, or `memory://<name>`).
    pub path: String,
    pub config: ModelConfig,
}

/// Named collection of model artifacts.
pub trait ModelStore: Send + Sync {
    /// All available models with their configs, sorted by name.
    fn list(&self) -> Result<Vec<ModelDescriptor>, AiError>;

    /// Load (deserialize) a model by name.
    ///
    /// Fails with `ModelNotFound` when no artifact exists for `name`.
    fn load(&self, name: &ModelName) -> Result<ModelArtifact, AiError>;

    fn contains(&self, name: &ModelName) -> Result<bool, AiError> {
        Ok(self.list()?.iter().any(|m| &m.name == name))
    }
}

/// On-disk checkpoint layout: `{ "config": {...}, "weights": {...} }`.
#[derive(Debug, Serialize, Deserialize)]
pub struct Checkpoint {
    pub config: ModelConfig,
    pub weights: LinearWeights,
}

#[derive(Deserialize)]
struct CheckpointHeader {
    config: ModelConfig,
    #[allow(dead_code)]
    weights: IgnoredAny,
}

/// Directory of `<name>.json` checkpoints.
#[derive(Debug, Clone)]
pub struct FsModelStore {
    dir: PathBuf,
}

impl FsModelStore {
    pub const EXTENSION: &'static str = "json";

    /// Open (and create if missing) a model directory.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, AiError> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, name: &ModelName) -> PathBuf {
        self.dir.join(format!("{}.{}", name, Self::EXTENSION))
    }

    /// Write a checkpoint for `name`, replacing any existing one.
    pub fn save(&self, name: &ModelName, checkpoint: &Checkpoint) -> Result<PathBuf, AiError> {
        let path = self.path_for(name);
        let bytes = serde_json::to_vec_pretty(checkpoint)
            .map_err(|e| AiError::invalid_artifact(e.to_string()))?;
        fs::write(&path, bytes)?;
        Ok(path)
    }

    fn read_header(path: &Path) -> Result<ModelConfig, AiError> {
        let bytes = fs::read(path)?;
        let header: CheckpointHeader = serde_json::from_slice(&bytes)
            .map_err(|e| AiError::invalid_artifact(format!("{}: {e}", path.display())))?;
        Ok(header.config)
    }
}

impl ModelStore for FsModelStore {
    fn list(&self) -> Result<Vec<ModelDescriptor>, AiError> {
        let mut models = Vec::new();

        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some(Self::EXTENSION) {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            let name = match ModelName::parse(stem) {
                Ok(n) => n,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "skipping artifact with invalid name");
                    continue;
                }
            };

            match Self::read_header(&path) {
                Ok(config) => models.push(ModelDescriptor {
                    name,
                    path: path.display().to_string(),
                    config,
                }),
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "error loading model info");
                }
            }
        }

        models.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(models)
    }

    fn load(&self, name: &ModelName) -> Result<ModelArtifact, AiError> {
        let path = self.path_for(name);
        if !path.is_file() {
            return Err(AiError::ModelNotFound(name.to_string()));
        }

        let bytes = fs::read(&path)?;
        let checkpoint: Checkpoint = serde_json::from_slice(&bytes)
            .map_err(|e| AiError::invalid_artifact(format!("{}: {e}", path.display())))?;
        let model = LinearForecaster::new(&checkpoint.config, checkpoint.weights)?;

        Ok(ModelArtifact {
            model: Box::new(model),
            config: checkpoint.config,
        })
    }

    fn contains(&self, name: &ModelName) -> Result<bool, AiError> {
        Ok(self.path_for(name).is_file())
    }
}

type ModelFactory = Arc<dyn Fn() -> Result<Box<dyn ForecastModel>, AiError> + Send + Sync>;

struct Registered {
    config: ModelConfig,
    factory: ModelFactory,
    loads: AtomicUsize,
}

/// In-memory model store for tests/dev.
///
/// Counts loads per model so callers can assert memoization.
#[derive(Default)]
pub struct InMemoryModelStore {
    models: RwLock<BTreeMap<ModelName, Arc<Registered>>>,
}

impl InMemoryModelStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Register a model built by `factory` on every load.
    pub fn register<F>(&self, name: ModelName, config: ModelConfig, factory: F)
    where
        F: Fn() -> Result<Box<dyn ForecastModel>, AiError> + Send + Sync + 'static,
    {
        let entry = Arc::new(Registered {
            config,
            factory: Arc::new(factory),
            loads: AtomicUsize::new(0),
        });
        self.models
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name, entry);
    }

    /// Register a [`LinearForecaster`] with the given weights.
    pub fn register_linear(
        &self,
        name: ModelName,
        config: ModelConfig,
        weights: LinearWeights,
    ) -> Result<(), AiError> {
        // Validate shapes up front rather than on first load.
        LinearForecaster::new(&config, weights.clone())?;
        let factory_config = config.clone();
        self.register(name, config, move || {
            Ok(Box::new(LinearForecaster::new(&factory_config, weights.clone())?) as Box<dyn ForecastModel>)
        });
        Ok(())
    }

    /// Forget a model; later loads fail with `ModelNotFound`.
    pub fn remove(&self, name: &ModelName) -> bool {
        self.models
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(name)
            .is_some()
    }

    /// Number of times `name` has been loaded.
    pub fn load_count(&self, name: &ModelName) -> usize {
        self.models
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .map_or(0, |r| r.loads.load(Ordering::SeqCst))
    }
}

impl std::fmt::Debug for InMemoryModelStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let models = self.models.read().unwrap_or_else(PoisonError::into_inner);
        f.debug_struct("InMemoryModelStore")
            .field("models", &models.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl ModelStore for InMemoryModelStore {
    fn list(&self) -> Result<Vec<ModelDescriptor>, AiError> {
        let models = self.models.read().unwrap_or_else(PoisonError::into_inner);
        Ok(models
            .iter()
            .map(|(name, r)| ModelDescriptor {
                name: name.clone(),
                path: format!("memory://{name}"),
                config: r.config.clone(),
            })
            .collect())
    }

    fn load(&self, name: &ModelName) -> Result<ModelArtifact, AiError> {
        let entry = self
            .models
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
            .ok_or_else(|| AiError::ModelNotFound(name.to_string()))?;

        entry.loads.fetch_add(1, Ordering::SeqCst);
        Ok(ModelArtifact {
            model: (entry.factory)()?,
            config: entry.config.clone(),
        })
    }

    fn contains(&self, name: &ModelName) -> Result<bool, AiError> {
        Ok(self
            .models
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(name))
    }
}
