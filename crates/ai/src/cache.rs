//! Load-once model cache.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use tracing::info;

use inferq_core::ModelName;

use crate::device::Device;
use crate::error::AiError;
use crate::model::{ForecastModel, ModelConfig};
use crate::store::ModelStore;

/// A model prepared for inference, shared by every job that names it.
pub struct CachedModel {
    name: ModelName,
    model: Box<dyn ForecastModel>,
    config: ModelConfig,
}

impl CachedModel {
    pub fn name(&self) -> &ModelName {
        &self.name
    }

    pub fn model(&self) -> &dyn ForecastModel {
        self.model.as_ref()
    }

    pub fn config(&self) -> &ModelConfig {
        &self.config
    }
}

impl std::fmt::Debug for CachedModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CachedModel")
            .field("name", &self.name)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Memoizes loaded models by name for the lifetime of the process.
///
/// There is no eviction or reload: picking up new weights requires a restart.
/// Loads happen on the single worker task, so a model is loaded at most once.
pub struct ModelCache {
    store: Arc<dyn ModelStore>,
    device: Device,
    entries: RwLock<HashMap<ModelName, Arc<CachedModel>>>,
}

impl ModelCache {
    pub fn new(store: Arc<dyn ModelStore>, device: Device) -> Self {
        Self {
            store,
            device,
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Return the cached model, loading and preparing it on first use.
    pub fn get_or_load(&self, name: &ModelName) -> Result<Arc<CachedModel>, AiError> {
        if let Some(hit) = self
            .entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
        {
            return Ok(hit.clone());
        }

        let artifact = self.store.load(name)?;
        let mut model = artifact.model;
        model.prepare(self.device)?;

        info!(model = %name, device = %self.device, "model loaded");

        let loaded = Arc::new(CachedModel {
            name: name.clone(),
            model,
            config: artifact.config,
        });

        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        Ok(entries.entry(name.clone()).or_insert(loaded).clone())
    }

    pub fn is_loaded(&self, name: &ModelName) -> bool {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl std::fmt::Debug for ModelCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelCache")
            .field("device", &self.device)
            .field("loaded", &self.len())
            .finish()
    }
}
