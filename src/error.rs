//! Error types for batch matting operations

use crate::types::ImageId;
use thiserror::Error;

/// Result type alias for matting operations
pub type Result<T> = std::result::Result<T, RmbgError>;

/// Error taxonomy for the asset loader, engine, compositor, pipeline and export stages
#[derive(Error, Debug)]
pub enum RmbgError {
    /// Required hardware-accelerated backend is missing on this host
    #[error("Environment unsupported: {0}")]
    EnvironmentUnsupported(String),

    /// Download or model initialization failed; the session cannot process images
    #[error("Asset load failed: {0}")]
    AssetLoadFailed(String),

    /// Preprocessing, decoding or the forward pass failed for one image
    #[error("Inference failed for image {image_id}: {reason}")]
    InferenceFailed { image_id: ImageId, reason: String },

    /// Merging the mask into the source raster failed for one image
    #[error("Compositing failed for image {image_id}: {reason}")]
    CompositeFailed { image_id: ImageId, reason: String },

    /// A raster surface of the requested size could not be acquired
    #[error("Render surface unavailable ({width}x{height})")]
    RenderSurfaceUnavailable { width: u32, height: u32 },

    /// Writing an image to the system clipboard failed
    #[error("Clipboard write failed: {0}")]
    ClipboardWriteFailed(String),

    /// Start was requested while a run is still active
    #[error("A batch is already being processed")]
    BatchInProgress,

    /// Start was requested with no images in the input list
    #[error("Cannot start processing an empty batch")]
    EmptyBatch,

    /// Export requested before a batch completed
    #[error("Export is not available until a batch has completed")]
    ExportNotReady,

    /// Input/output errors (file not found, permission denied, etc.)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Image decoding or encoding errors
    #[error("Image processing error: {0}")]
    Image(#[from] image::ImageError),

    /// HTTP transfer errors
    #[error("Network error: {0}")]
    Network(String),

    /// Invalid configuration or parameters
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Model file or metadata errors
    #[error("Model error: {0}")]
    Model(String),

    /// Archive writing errors
    #[error("Archive error: {0}")]
    Archive(String),

    /// Generic error for unexpected conditions
    #[error("Internal error: {0}")]
    Internal(String),
}

impl RmbgError {
    /// Create a new invalid configuration error
    pub fn invalid_config<S: Into<String>>(msg: S) -> Self {
        Self::InvalidConfig(msg.into())
    }

    /// Create a new model error
    pub fn model<S: Into<String>>(msg: S) -> Self {
        Self::Model(msg.into())
    }

    /// Create a new internal error
    pub fn internal<S: Into<String>>(msg: S) -> Self {
        Self::Internal(msg.into())
    }

    /// Create a new archive error
    pub fn archive<S: Into<String>>(msg: S) -> Self {
        Self::Archive(msg.into())
    }

    pub fn environment_unsupported<S: Into<String>>(msg: S) -> Self {
        Self::EnvironmentUnsupported(msg.into())
    }

    /// Wrap any failure that happened while acquiring the model assets
    pub fn asset_load_failed<E: std::fmt::Display>(error: E) -> Self {
        Self::AssetLoadFailed(error.to_string())
    }

    pub fn inference_failed<S: Into<String>>(image_id: ImageId, reason: S) -> Self {
        Self::InferenceFailed {
            image_id,
            reason: reason.into(),
        }
    }

    pub fn composite_failed<S: Into<String>>(image_id: ImageId, reason: S) -> Self {
        Self::CompositeFailed {
            image_id,
            reason: reason.into(),
        }
    }

    /// Create a network error with operation context
    pub fn network_error<S: Into<String>, E: std::fmt::Display>(context: S, error: E) -> Self {
        Self::Network(format!("{}: {}", context.into(), error))
    }

    /// Create file I/O error with operation context
    pub fn file_io_error<P: AsRef<std::path::Path>>(
        operation: &str,
        path: P,
        error: &std::io::Error,
    ) -> Self {
        let path_display = path.as_ref().display();
        Self::Io(std::io::Error::new(
            error.kind(),
            format!("Failed to {} '{}': {}", operation, path_display, error),
        ))
    }

    /// Fatal errors leave the whole session non-functional
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::EnvironmentUnsupported(_) | Self::AssetLoadFailed(_)
        )
    }

    /// Image the error is scoped to, if any
    #[must_use]
    pub fn image_id(&self) -> Option<ImageId> {
        match self {
            Self::InferenceFailed { image_id, .. } | Self::CompositeFailed { image_id, .. } => {
                Some(*image_id)
            },
            _ => None,
        }
    }
}

impl From<zip::result::ZipError> for RmbgError {
    fn from(error: zip::result::ZipError) -> Self {
        Self::Archive(error.to_string())
    }
}
