//! One-time acquisition of the matting model and its preprocessor
//!
//! [`AssetLoader::load`] checks the host environment, downloads the model into the
//! cache with byte-level progress, and initializes the inference backend. The
//! result is memoized: concurrent and later callers share the same instances.

use crate::backends;
use crate::compositor::Compositor;
use crate::config::{BackendType, PipelineConfig};
use crate::download::ModelDownloader;
use crate::error::{Result, RmbgError};
use crate::inference::{InferenceBackend, MattingEngine};
use crate::types::LoadProgress;
use crate::utils::{check_environment, EnvironmentProbe, Preprocessor, PreprocessorConfig, RuntimeProbe};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tokio::sync::{watch, OnceCell};

/// Creates uninitialized backends for a backend type
pub type BackendFactory =
    Arc<dyn Fn(BackendType) -> Result<Box<dyn InferenceBackend>> + Send + Sync>;

/// Immutable handle to the loaded model, shared by every batch run
#[derive(Debug)]
pub struct MattingAssets {
    engine: MattingEngine,
    compositor: Compositor,
    config: PipelineConfig,
    model_dir: Option<PathBuf>,
}

impl MattingAssets {
    /// Assemble assets from an already initialized engine
    #[must_use]
    pub fn new(engine: MattingEngine, config: PipelineConfig) -> Self {
        Self {
            engine,
            compositor: Compositor::from_config(&config),
            config,
            model_dir: None,
        }
    }

    #[must_use]
    pub fn engine(&self) -> &MattingEngine {
        &self.engine
    }

    #[must_use]
    pub fn compositor(&self) -> &Compositor {
        &self.compositor
    }

    #[must_use]
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Cache directory the model was loaded from, if it came from disk
    #[must_use]
    pub fn model_dir(&self) -> Option<&Path> {
        self.model_dir.as_deref()
    }
}

/// Recorded outcome of a failed load, replayed to later callers
#[derive(Debug, Clone)]
enum LoadFailure {
    Environment(String),
    Asset(String),
}

impl LoadFailure {
    fn from_error(error: &RmbgError) -> Self {
        match error {
            RmbgError::EnvironmentUnsupported(msg) => Self::Environment(msg.clone()),
            RmbgError::AssetLoadFailed(msg) => Self::Asset(msg.clone()),
            other => Self::Asset(other.to_string()),
        }
    }

    fn to_error(&self) -> RmbgError {
        match self {
            Self::Environment(msg) => RmbgError::EnvironmentUnsupported(msg.clone()),
            Self::Asset(msg) => RmbgError::AssetLoadFailed(msg.clone()),
        }
    }
}

/// Loads the matting assets once per session
pub struct AssetLoader {
    config: PipelineConfig,
    probe: Arc<dyn EnvironmentProbe>,
    backend_factory: BackendFactory,
    progress_tx: watch::Sender<LoadProgress>,
    assets: OnceCell<Arc<MattingAssets>>,
    failure: Mutex<Option<LoadFailure>>,
}

impl std::fmt::Debug for AssetLoader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AssetLoader")
            .field("config", &self.config)
            .field("probe", &self.probe)
            .field("loaded", &self.assets.initialized())
            .finish_non_exhaustive()
    }
}

impl AssetLoader {
    #[must_use]
    pub fn new(config: PipelineConfig) -> Self {
        let (progress_tx, _) = watch::channel(LoadProgress::default());
        Self {
            config,
            probe: Arc::new(RuntimeProbe),
            backend_factory: Arc::new(backends::create_backend),
            progress_tx,
            assets: OnceCell::new(),
            failure: Mutex::new(None),
        }
    }

    /// Replace the host capability probe
    #[must_use]
    pub fn with_probe(mut self, probe: Arc<dyn EnvironmentProbe>) -> Self {
        self.probe = probe;
        self
    }

    /// Replace how inference backends are constructed
    #[must_use]
    pub fn with_backend_factory(mut self, factory: BackendFactory) -> Self {
        self.backend_factory = factory;
        self
    }

    #[must_use]
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Watch the weight file transfer; values never decrease within one load
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<LoadProgress> {
        self.progress_tx.subscribe()
    }

    /// Loaded assets, if [`AssetLoader::load`] already succeeded
    #[must_use]
    pub fn get(&self) -> Option<Arc<MattingAssets>> {
        self.assets.get().cloned()
    }

    /// Load the model and preprocessor, or return the instances loaded earlier
    ///
    /// A failed load is not retried: later calls report the same failure.
    ///
    /// # Errors
    /// - `EnvironmentUnsupported` when the configured compute backend is missing,
    ///   detected before any network access
    /// - `AssetLoadFailed` for download, cache or model initialization failures
    pub async fn load(&self) -> Result<Arc<MattingAssets>> {
        let assets = self
            .assets
            .get_or_try_init(|| async {
                if let Some(failure) = self.recorded_failure() {
                    return Err(failure.to_error());
                }
                match self.load_uncached().await {
                    Ok(assets) => Ok(Arc::new(assets)),
                    Err(error) => {
                        log::error!("Asset load failed: {}", error);
                        self.record_failure(&error);
                        Err(error)
                    },
                }
            })
            .await?;
        Ok(Arc::clone(assets))
    }

    fn recorded_failure(&self) -> Option<LoadFailure> {
        self.failure.lock().ok().and_then(|guard| guard.clone())
    }

    fn record_failure(&self, error: &RmbgError) {
        if let Ok(mut guard) = self.failure.lock() {
            *guard = Some(LoadFailure::from_error(error));
        }
    }

    #[tracing::instrument(skip(self), fields(model_id = %self.config.model_id, backend = %self.config.backend_type))]
    async fn load_uncached(&self) -> Result<MattingAssets> {
        check_environment(&self.config, self.probe.as_ref())?;

        let downloader = ModelDownloader::new(&self.config).map_err(RmbgError::asset_load_failed)?;
        let model_dir = downloader
            .ensure_model(&self.config, &self.progress_tx)
            .await
            .map_err(RmbgError::asset_load_failed)?;

        let preprocessor_config =
            PreprocessorConfig::from_file(&model_dir.join("preprocessor_config.json"))
                .map_err(RmbgError::asset_load_failed)?;

        let weight_path = model_dir.join(self.config.weight_file());
        let model_bytes = tokio::fs::read(&weight_path)
            .await
            .map_err(|e| RmbgError::file_io_error("read model weights", &weight_path, &e))
            .map_err(RmbgError::asset_load_failed)?;

        let engine = self
            .initialize_engine(model_bytes, Preprocessor::new(preprocessor_config))
            .await?;

        log::info!("Matting assets ready from {}", model_dir.display());
        Ok(MattingAssets {
            engine,
            compositor: Compositor::from_config(&self.config),
            config: self.config.clone(),
            model_dir: Some(model_dir),
        })
    }

    async fn initialize_engine(
        &self,
        model_bytes: Vec<u8>,
        preprocessor: Preprocessor,
    ) -> Result<MattingEngine> {
        let mut backend =
            (self.backend_factory)(self.config.backend_type).map_err(RmbgError::asset_load_failed)?;
        let config = self.config.clone();

        let backend = tokio::task::spawn_blocking(move || {
            if let Some(load_time) = backend.initialize(&model_bytes, &config)? {
                log::debug!("Backend initialized in {}ms", load_time.as_millis());
            }
            Ok::<_, RmbgError>(backend)
        })
        .await
        .map_err(RmbgError::asset_load_failed)?
        .map_err(RmbgError::asset_load_failed)?;

        MattingEngine::new(backend, preprocessor, self.config.mask_resampling)
            .map_err(RmbgError::asset_load_failed)
    }
}
