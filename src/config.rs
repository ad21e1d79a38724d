//! Configuration types for the matting pipeline

use crate::error::{Result, RmbgError};
use image::imageops::FilterType;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Logical identifier of the matting model on `HuggingFace`
pub const DEFAULT_MODEL_ID: &str = "briaai/RMBG-1.4";

/// Weight file variant fetched by default
pub const DEFAULT_VARIANT: &str = "fp16";

/// Public `HuggingFace` hub
pub const DEFAULT_HUB_URL: &str = "https://huggingface.co";

/// Execution provider options for ONNX Runtime
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionProvider {
    /// Auto-detect best available provider (CUDA > `CoreML` > CPU)
    #[default]
    Auto,
    /// CPU execution (always available)
    Cpu,
    /// NVIDIA CUDA GPU acceleration
    Cuda,
    /// Apple Silicon GPU acceleration
    CoreMl,
}

impl ExecutionProvider {
    /// Whether this provider can only run on an accelerator
    #[must_use]
    pub fn is_accelerated(self) -> bool {
        matches!(self, Self::Cuda | Self::CoreMl)
    }
}

impl std::fmt::Display for ExecutionProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Auto => write!(f, "auto"),
            Self::Cpu => write!(f, "cpu"),
            Self::Cuda => write!(f, "cuda"),
            Self::CoreMl => write!(f, "coreml"),
        }
    }
}

/// Inference backend selection
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendType {
    /// ONNX Runtime backend (supports GPU acceleration)
    #[default]
    Onnx,
    /// Tract backend (pure Rust, CPU only)
    Tract,
}

impl std::fmt::Display for BackendType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Onnx => write!(f, "onnx"),
            Self::Tract => write!(f, "tract"),
        }
    }
}

/// Resampling policy used when scaling the mask back to source resolution
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MaskResampling {
    Nearest,
    /// Smoother alpha edges
    #[default]
    Bilinear,
}

impl MaskResampling {
    #[must_use]
    pub fn filter_type(self) -> FilterType {
        match self {
            Self::Nearest => FilterType::Nearest,
            Self::Bilinear => FilterType::Triangle,
        }
    }
}

/// Configuration for asset loading and batch processing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// `HuggingFace` repository of the matting model (`owner/name`)
    pub model_id: String,

    /// Weight file variant (fp16, fp32)
    pub variant: String,

    /// Backend used for the forward pass
    pub backend_type: BackendType,

    /// Execution provider for ONNX Runtime
    pub execution_provider: ExecutionProvider,

    /// Refuse to start unless a GPU execution provider is available
    pub require_accelerator: bool,

    /// Cache directory override (defaults to the platform cache dir)
    pub cache_dir: Option<PathBuf>,

    /// Number of intra-op threads for inference (0 = auto)
    pub intra_threads: usize,

    /// Mask upsampling policy
    pub mask_resampling: MaskResampling,

    /// Largest raster surface the compositor will allocate, in pixels
    pub max_surface_pixels: u64,

    /// HTTP timeout for asset downloads
    pub download_timeout_secs: u64,

    /// Base URL of the model hub serving `<model_id>/resolve/main/<file>`
    pub hub_url: String,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            model_id: DEFAULT_MODEL_ID.to_string(),
            variant: DEFAULT_VARIANT.to_string(),
            backend_type: BackendType::Onnx,
            execution_provider: ExecutionProvider::Auto,
            require_accelerator: false,
            cache_dir: None,
            intra_threads: 0,
            mask_resampling: MaskResampling::Bilinear,
            max_surface_pixels: 100_000_000,
            download_timeout_secs: 300,
            hub_url: DEFAULT_HUB_URL.to_string(),
        }
    }
}

impl PipelineConfig {
    /// Create a new configuration builder
    #[must_use]
    pub fn builder() -> PipelineConfigBuilder {
        PipelineConfigBuilder::new()
    }

    /// Load configuration from a JSON file; missing fields keep their defaults
    ///
    /// # Errors
    /// - File cannot be read
    /// - JSON is malformed
    /// - Resulting configuration fails validation
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| RmbgError::file_io_error("read config file", path, &e))?;
        let config: Self = serde_json::from_str(&content).map_err(|e| {
            RmbgError::invalid_config(format!("Failed to parse {}: {}", path.display(), e))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Check field invariants
    ///
    /// # Errors
    /// - Malformed model id, empty variant or zero limits
    pub fn validate(&self) -> Result<()> {
        let mut parts = self.model_id.split('/');
        let valid_id = matches!(
            (parts.next(), parts.next(), parts.next()),
            (Some(owner), Some(name), None) if !owner.is_empty() && !name.is_empty()
        );
        if !valid_id {
            return Err(RmbgError::invalid_config(format!(
                "Model id must look like 'owner/name', got '{}'",
                self.model_id
            )));
        }
        if self.variant.is_empty() {
            return Err(RmbgError::invalid_config("Model variant cannot be empty"));
        }
        if self.max_surface_pixels == 0 {
            return Err(RmbgError::invalid_config(
                "max_surface_pixels must be greater than zero",
            ));
        }
        if self.download_timeout_secs == 0 {
            return Err(RmbgError::invalid_config(
                "download_timeout_secs must be greater than zero",
            ));
        }
        if !(self.hub_url.starts_with("http://") || self.hub_url.starts_with("https://")) {
            return Err(RmbgError::invalid_config(format!(
                "hub_url must be an http(s) URL, got '{}'",
                self.hub_url
            )));
        }
        if self.backend_type == BackendType::Tract && self.execution_provider.is_accelerated() {
            return Err(RmbgError::invalid_config(format!(
                "Tract backend only supports CPU, not '{}'",
                self.execution_provider
            )));
        }
        Ok(())
    }

    /// Repository URL for the configured model
    #[must_use]
    pub fn model_url(&self) -> String {
        format!("{}/{}", self.hub_url.trim_end_matches('/'), self.model_id)
    }

    /// Relative path of the weight file inside the repository
    #[must_use]
    pub fn weight_file(&self) -> String {
        if self.variant == "fp32" {
            "onnx/model.onnx".to_string()
        } else {
            format!("onnx/model_{}.onnx", self.variant)
        }
    }
}

/// Builder for `PipelineConfig`
#[derive(Debug, Default)]
pub struct PipelineConfigBuilder {
    config: PipelineConfig,
}

impl PipelineConfigBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn model_id<S: Into<String>>(mut self, model_id: S) -> Self {
        self.config.model_id = model_id.into();
        self
    }

    #[must_use]
    pub fn variant<S: Into<String>>(mut self, variant: S) -> Self {
        self.config.variant = variant.into();
        self
    }

    #[must_use]
    pub fn backend_type(mut self, backend_type: BackendType) -> Self {
        self.config.backend_type = backend_type;
        self
    }

    #[must_use]
    pub fn execution_provider(mut self, provider: ExecutionProvider) -> Self {
        self.config.execution_provider = provider;
        self
    }

    #[must_use]
    pub fn require_accelerator(mut self, require: bool) -> Self {
        self.config.require_accelerator = require;
        self
    }

    #[must_use]
    pub fn cache_dir<P: Into<PathBuf>>(mut self, dir: P) -> Self {
        self.config.cache_dir = Some(dir.into());
        self
    }

    #[must_use]
    pub fn intra_threads(mut self, threads: usize) -> Self {
        self.config.intra_threads = threads;
        self
    }

    #[must_use]
    pub fn mask_resampling(mut self, resampling: MaskResampling) -> Self {
        self.config.mask_resampling = resampling;
        self
    }

    #[must_use]
    pub fn max_surface_pixels(mut self, pixels: u64) -> Self {
        self.config.max_surface_pixels = pixels;
        self
    }

    #[must_use]
    pub fn download_timeout_secs(mut self, secs: u64) -> Self {
        self.config.download_timeout_secs = secs;
        self
    }

    #[must_use]
    pub fn hub_url<S: Into<String>>(mut self, url: S) -> Self {
        self.config.hub_url = url.into();
        self
    }

    /// Build the configuration
    ///
    /// # Errors
    /// - Validation failures, see [`PipelineConfig::validate`]
    pub fn build(self) -> Result<PipelineConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}
