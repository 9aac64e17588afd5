use super::catalog::{self, ModelSpec};
use super::onnx::OnnxSegmenter;
use super::types::SegmentationModel;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock};

/// A loaded model, locked for the duration of one inference
pub type SharedModel = Arc<Mutex<Box<dyn SegmentationModel>>>;

/// Builds a model from its catalog entry and file path
pub type ModelLoader = Box<
    dyn Fn(&'static ModelSpec, &Path) -> anyhow::Result<Box<dyn SegmentationModel>> + Send + Sync,
>;

#[derive(Debug, Clone, thiserror::Error)]
pub enum RegistryError {
    #[error("Model {0} not supported")]
    UnknownModel(String),
    #[error("Model {name} is not available: {reason}")]
    ModelUnavailable { name: String, reason: String },
}

/// Outcome of loading one model, filled in exactly once
type LoadSlot = Arc<OnceLock<Result<SharedModel, RegistryError>>>;

/// Lazily loads segmentation models and keeps them for reuse
///
/// The slot map is only locked to look up or insert a slot. Loading happens
/// outside it, so a slow load only holds up requests for the same model.
/// A load that fails stays failed until the process restarts; a model file
/// that is merely missing is checked again on every request.
pub struct ModelRegistry {
    models_dir: PathBuf,
    loader: ModelLoader,
    slots: Mutex<HashMap<String, LoadSlot>>,
}

impl ModelRegistry {
    /// Registry that loads catalog models as ONNX sessions
    pub fn new<P: Into<PathBuf>>(models_dir: P, intra_threads: usize) -> Self {
        Self::with_loader(
            models_dir,
            Box::new(
                move |spec: &'static ModelSpec,
                      path: &Path|
                      -> anyhow::Result<Box<dyn SegmentationModel>> {
                    Ok(Box::new(OnnxSegmenter::new(path, spec, intra_threads)?))
                },
            ),
        )
    }

    pub fn with_loader<P: Into<PathBuf>>(models_dir: P, loader: ModelLoader) -> Self {
        Self {
            models_dir: models_dir.into(),
            loader,
            slots: Mutex::new(HashMap::new()),
        }
    }

    pub fn models_dir(&self) -> &Path {
        &self.models_dir
    }

    /// Register an already constructed model under `name`
    ///
    /// The name does not have to be part of the catalog.
    pub fn insert(&self, name: impl Into<String>, model: Box<dyn SegmentationModel>) {
        let shared: SharedModel = Arc::new(Mutex::new(model));
        self.lock()
            .insert(name.into(), Arc::new(OnceLock::from(Ok(shared))));
    }

    /// Resolve a requested name to the key models are stored under
    pub fn resolve(&self, name: &str) -> Result<String, RegistryError> {
        if let Some(canonical) = catalog::canonical_name(name) {
            return Ok(canonical.to_string());
        }
        let name = name.trim();
        if self.lock().contains_key(name) {
            return Ok(name.to_string());
        }
        Err(RegistryError::UnknownModel(name.to_string()))
    }

    /// Get a model, loading it from disk on first use
    ///
    /// Concurrent callers asking for the same model wait for a single load.
    pub fn get(&self, name: &str) -> Result<SharedModel, RegistryError> {
        let key = self.resolve(name)?;

        let existing = self.lock().get(&key).cloned();
        let slot = match existing {
            Some(slot) => slot,
            None => {
                let spec =
                    catalog::find(&key).ok_or_else(|| RegistryError::UnknownModel(key.clone()))?;
                let path = self.model_path(spec);
                if !path.is_file() {
                    return Err(RegistryError::ModelUnavailable {
                        name: spec.name.to_string(),
                        reason: format!("{} not found", path.display()),
                    });
                }
                Arc::clone(self.lock().entry(key.clone()).or_default())
            }
        };

        slot.get_or_init(|| self.load(&key)).clone()
    }

    fn load(&self, key: &str) -> Result<SharedModel, RegistryError> {
        let spec = catalog::find(key).ok_or_else(|| RegistryError::UnknownModel(key.to_string()))?;
        let path = self.model_path(spec);

        let model = (self.loader)(spec, &path).map_err(|e| {
            tracing::error!(model = spec.name, error = %format!("{e:#}"), "Failed to load model");
            RegistryError::ModelUnavailable {
                name: spec.name.to_string(),
                reason: format!("{e:#}"),
            }
        })?;
        Ok(Arc::new(Mutex::new(model)))
    }

    pub fn model_path(&self, spec: &ModelSpec) -> PathBuf {
        self.models_dir.join(spec.file_name)
    }

    /// Whether a model can be served: already loaded, or its file is present
    pub fn is_available(&self, spec: &ModelSpec) -> bool {
        self.is_loaded(spec.name) || self.model_path(spec).is_file()
    }

    pub fn is_loaded(&self, name: &str) -> bool {
        self.lock()
            .get(name)
            .is_some_and(|slot| matches!(slot.get(), Some(Ok(_))))
    }

    /// Names of every model currently held in memory, sorted
    pub fn loaded_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .lock()
            .iter()
            .filter(|(_, slot)| matches!(slot.get(), Some(Ok(_))))
            .map(|(name, _)| name.clone())
            .collect();
        names.sort();
        names
    }

    /// Names that requests may use: the catalog plus any inserted models
    pub fn known_names(&self) -> Vec<String> {
        let mut names: Vec<String> = catalog::CATALOG.iter().map(|s| s.name.to_string()).collect();
        for name in self.loaded_names() {
            if !names.contains(&name) {
                names.push(name);
            }
        }
        names
    }

    /// Load every catalog model whose file is present
    ///
    /// Returns the names that ended up loaded; failures are logged and skipped.
    pub fn warmup(&self) -> Vec<String> {
        for spec in catalog::CATALOG {
            if self.is_loaded(spec.name) || !self.model_path(spec).is_file() {
                continue;
            }
            if let Err(e) = self.get(spec.name) {
                tracing::warn!(model = spec.name, error = %e, "Warmup skipped model");
            }
        }
        self.loaded_names()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, LoadSlot>> {
        // A poisoned map only means a holder panicked; the map itself is intact
        self.slots.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use super::super::types::Matte;
    use anyhow::{bail, Result};
    use image::RgbImage;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::mpsc;
    use std::thread;
    use std::time::Duration;

    struct Blank;

    impl SegmentationModel for Blank {
        fn segment(&mut self, frame: &RgbImage) -> Result<Matte> {
            let (w, h) = frame.dimensions();
            Ok(Matte::new(w, h))
        }

        fn input_size(&self) -> (u32, u32) {
            (8, 8)
        }

        fn name(&self) -> &str {
            "blank"
        }
    }

    fn loader(
        load: impl Fn() -> Result<Box<dyn SegmentationModel>> + Send + Sync + 'static,
    ) -> ModelLoader {
        Box::new(move |_: &'static ModelSpec, _: &Path| load())
    }

    /// Registry over a temp dir holding an empty `u2net.onnx`
    fn registry_with_file(loader: ModelLoader) -> (tempfile::TempDir, ModelRegistry) {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("u2net.onnx"), b"").unwrap();
        let registry = ModelRegistry::with_loader(dir.path(), loader);
        (dir, registry)
    }

    #[test]
    fn unknown_model_is_rejected() {
        let registry = ModelRegistry::new("/nonexistent", 1);
        assert!(matches!(
            registry.get("deeplab"),
            Err(RegistryError::UnknownModel(name)) if name == "deeplab"
        ));
    }

    #[test]
    fn missing_model_file_is_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let registry = ModelRegistry::new(dir.path(), 1);
        assert_eq!(registry.models_dir(), dir.path());
        assert!(matches!(
            registry.get("general"),
            Err(RegistryError::ModelUnavailable { name, .. }) if name == "u2net"
        ));
        assert!(registry.loaded_names().is_empty());
    }

    #[test]
    fn inserted_models_are_shared() {
        let registry = ModelRegistry::new("/nonexistent", 1);
        registry.insert("u2net", Box::new(Blank));
        registry.insert("blank", Box::new(Blank));

        let a = registry.get("general").unwrap();
        let b = registry.get("u2net").unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert!(registry.get("blank").is_ok());
        assert_eq!(registry.loaded_names(), vec!["blank", "u2net"]);
        assert!(registry.known_names().contains(&"blank".to_string()));
    }

    #[test]
    fn concurrent_requests_load_once() {
        let loads = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&loads);
        let (_dir, registry) = registry_with_file(loader(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            thread::sleep(Duration::from_millis(50));
            Ok(Box::new(Blank))
        }));

        let models: Vec<SharedModel> = thread::scope(|s| {
            let handles: Vec<_> = (0..4).map(|_| s.spawn(|| registry.get("u2net").unwrap())).collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        assert_eq!(loads.load(Ordering::SeqCst), 1);
        assert!(models.iter().all(|m| Arc::ptr_eq(m, &models[0])));
        assert!(registry.is_loaded("u2net"));
    }

    #[test]
    fn failed_load_is_remembered() {
        let loads = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&loads);
        let (_dir, registry) = registry_with_file(loader(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            bail!("corrupt model")
        }));

        for _ in 0..3 {
            assert!(matches!(
                registry.get("u2net"),
                Err(RegistryError::ModelUnavailable { reason, .. }) if reason.contains("corrupt")
            ));
        }
        assert_eq!(loads.load(Ordering::SeqCst), 1);
        assert!(!registry.is_loaded("u2net"));
        assert!(registry.loaded_names().is_empty());
    }

    #[test]
    fn loading_does_not_block_other_models() {
        let (started_tx, started_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel::<()>();
        let release_rx = Mutex::new(release_rx);
        let (_dir, registry) = registry_with_file(loader(move || {
            started_tx.send(()).unwrap();
            let _ = release_rx.lock().unwrap().recv_timeout(Duration::from_secs(5));
            Ok(Box::new(Blank))
        }));
        registry.insert("blank", Box::new(Blank));

        thread::scope(|s| {
            let loading = s.spawn(|| registry.get("u2net"));
            started_rx.recv_timeout(Duration::from_secs(5)).unwrap();

            // u2net is mid-load; listing and other models still answer
            assert_eq!(registry.loaded_names(), vec!["blank"]);
            assert!(!registry.is_loaded("u2net"));
            assert!(registry.get("blank").is_ok());

            release_tx.send(()).unwrap();
            assert!(loading.join().unwrap().is_ok());
        });
        assert_eq!(registry.loaded_names(), vec!["blank", "u2net"]);
    }

    #[test]
    fn warmup_without_files_loads_nothing_new() {
        let dir = tempfile::tempdir().unwrap();
        let registry = ModelRegistry::new(dir.path(), 1);
        registry.insert("blank", Box::new(Blank));
        assert_eq!(registry.warmup(), vec!["blank"]);
    }
}
