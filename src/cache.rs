//! On-disk cache for downloaded model assets
//!
//! Models are stored under `<cache root>/models/<owner>--<name>/`, mirroring the
//! repository layout (`config.json`, `preprocessor_config.json`, `onnx/*.onnx`).

use crate::error::{Result, RmbgError};
use std::fs;
use std::path::{Path, PathBuf};

/// Environment variable overriding the cache root
pub const CACHE_DIR_ENV: &str = "RMBG_CACHE_DIR";

/// Configuration files every cached model directory must hold
pub(crate) const CONFIG_FILES: &[&str] = &["config.json", "preprocessor_config.json"];

/// Model cache manager
#[derive(Debug, Clone)]
pub struct ModelCache {
    cache_dir: PathBuf,
}

impl ModelCache {
    /// Create a cache in the default location
    ///
    /// Resolution order: `RMBG_CACHE_DIR`, then the platform cache directory
    /// (`~/.cache/rmbg/models/` on Linux, `%LOCALAPPDATA%/rmbg/models/` on Windows).
    ///
    /// # Errors
    /// - Failed to determine the cache directory
    /// - Failed to create the cache directory
    pub fn new() -> Result<Self> {
        let cache_dir = Self::default_cache_dir()?;
        Self::ensure_dir(&cache_dir)?;
        Ok(Self { cache_dir })
    }

    /// Create a cache rooted at `cache_dir` (models live in `cache_dir/models`)
    ///
    /// # Errors
    /// - Failed to create the cache directory
    pub fn with_custom_cache_dir(cache_dir: &Path) -> Result<Self> {
        let models_dir = cache_dir.join("models");
        Self::ensure_dir(&models_dir)?;
        Ok(Self {
            cache_dir: models_dir,
        })
    }

    /// Create a cache honoring an optional override from configuration
    ///
    /// # Errors
    /// - See [`ModelCache::new`] and [`ModelCache::with_custom_cache_dir`]
    pub fn from_override(cache_dir: Option<&Path>) -> Result<Self> {
        match cache_dir {
            Some(dir) => Self::with_custom_cache_dir(dir),
            None => Self::new(),
        }
    }

    fn default_cache_dir() -> Result<PathBuf> {
        if let Ok(cache_override) = std::env::var(CACHE_DIR_ENV) {
            return Ok(PathBuf::from(cache_override).join("models"));
        }

        Ok(dirs::cache_dir()
            .ok_or_else(|| {
                RmbgError::invalid_config(format!(
                    "Failed to determine cache directory. Set {CACHE_DIR_ENV} environment variable."
                ))
            })?
            .join("rmbg")
            .join("models"))
    }

    fn ensure_dir(dir: &Path) -> Result<()> {
        if !dir.exists() {
            fs::create_dir_all(dir)
                .map_err(|e| RmbgError::file_io_error("create cache directory", dir, &e))?;
        }
        Ok(())
    }

    /// Filesystem-safe directory name for a model id
    ///
    /// ```
    /// use rmbg::cache::ModelCache;
    ///
    /// assert_eq!(ModelCache::model_dir_name("briaai/RMBG-1.4"), "briaai--RMBG-1.4");
    /// ```
    #[must_use]
    pub fn model_dir_name(model_id: &str) -> String {
        model_id.trim_matches('/').replace('/', "--")
    }

    /// Directory holding a model's files (may not exist)
    #[must_use]
    pub fn get_model_path(&self, model_id: &str) -> PathBuf {
        self.cache_dir.join(Self::model_dir_name(model_id))
    }

    /// Path of a weight file inside a cached model directory
    #[must_use]
    pub fn weight_file_path(&self, model_id: &str, weight_file: &str) -> PathBuf {
        self.get_model_path(model_id).join(weight_file)
    }

    /// Whether the model directory holds the config files and the requested weight file
    #[must_use]
    pub fn is_model_cached(&self, model_id: &str, weight_file: &str) -> bool {
        let model_path = self.get_model_path(model_id);
        Self::validate_model_directory(&model_path, weight_file)
    }

    fn validate_model_directory(model_path: &Path, weight_file: &str) -> bool {
        CONFIG_FILES
            .iter()
            .all(|file| model_path.join(file).is_file())
            && model_path.join(weight_file).is_file()
    }

    /// Remove a cached model
    ///
    /// Returns `false` if the model was not cached.
    ///
    /// # Errors
    /// - Failed to remove the model directory
    pub fn clear_model(&self, model_id: &str) -> Result<bool> {
        let model_path = self.get_model_path(model_id);
        if !model_path.exists() {
            return Ok(false);
        }

        log::info!("Removing cached model: {}", model_id);
        fs::remove_dir_all(&model_path)
            .map_err(|e| RmbgError::file_io_error("remove cached model", &model_path, &e))?;
        Ok(true)
    }

    #[must_use]
    pub fn get_current_cache_dir(&self) -> &Path {
        &self.cache_dir
    }
}

/// Format file size in human-readable format
#[must_use]
pub fn format_size(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    let mut size = bytes as f64;
    let mut unit_index = 0;

    while size >= 1024.0 && unit_index < UNITS.len() - 1 {
        size /= 1024.0;
        unit_index += 1;
    }

    if unit_index == 0 {
        format!("{} {}", bytes, UNITS.get(unit_index).unwrap_or(&"B"))
    } else {
        format!("{:.1} {}", size, UNITS.get(unit_index).unwrap_or(&"B"))
    }
}
