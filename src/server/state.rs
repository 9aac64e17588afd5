use crate::config::Config;
use crate::input::UploadLimits;
use crate::pipeline::BackgroundRemover;
use crate::segmentation::ModelRegistry;
use crate::storage::ResultStore;
use anyhow::Result;
use std::sync::Arc;

/// Shared by every request handler
pub struct AppState {
    pub config: Config,
    pub limits: UploadLimits,
    pub remover: BackgroundRemover,
    pub store: ResultStore,
}

impl AppState {
    pub fn new(config: Config) -> Result<Self> {
        let registry = Arc::new(ModelRegistry::new(&config.models_dir, config.intra_threads));
        Self::with_registry(config, registry)
    }

    /// Build state around an existing registry, e.g. one holding pre-built models
    pub fn with_registry(config: Config, registry: Arc<ModelRegistry>) -> Result<Self> {
        let store = ResultStore::new(&config.results_dir)?;
        let remover = BackgroundRemover::new(registry, config.processing_max_size);
        Ok(Self {
            limits: config.upload_limits(),
            config,
            remover,
            store,
        })
    }

    pub fn registry(&self) -> &ModelRegistry {
        self.remover.registry()
    }
}
