#![allow(clippy::too_many_lines)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::uninlined_format_args)]
#![allow(clippy::unused_async)]

//! # rmbg
//!
//! Batch background removal with the `briaai/RMBG-1.4` matting model.
//!
//! The model predicts a continuous per-pixel opacity mask. Each input image is
//! composited with its mask as alpha channel, producing a PNG-ready RGBA cut-out.
//!
//! ## Features
//!
//! - **One-time asset loading**: the model is downloaded into an on-disk cache with
//!   monotonic byte progress and loaded once per [`AssetLoader`]
//! - **Two backends**: ONNX Runtime (CUDA, `CoreML`, CPU) and Tract (pure Rust)
//! - **Sequential batches**: images are processed strictly in input order, one at a
//!   time, with per-item failures skipped instead of aborting the run
//! - **Export**: results (or originals, when an image produced no result) packed into
//!   `images.zip` as `image-1.png` ... `image-N.png`
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use rmbg::{AssetLoader, BatchPipeline, ConsoleProgressReporter, PipelineConfig};
//! use std::path::PathBuf;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let loader = AssetLoader::new(PipelineConfig::default());
//! let assets = loader.load().await?;
//!
//! let pipeline = BatchPipeline::new();
//! pipeline.add_image(PathBuf::from("portrait.jpg"));
//! pipeline.add_image(PathBuf::from("product.png"));
//!
//! let summary = pipeline.run(&assets, &ConsoleProgressReporter::new(false)).await?;
//! println!("{} of {} images processed", summary.succeeded, summary.total);
//!
//! for (index, result) in pipeline.results().into_iter().enumerate() {
//!     if let Some(result) = result {
//!         result.save_png(format!("cutout-{}.png", index + 1))?;
//!     }
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Feature Flags
//!
//! - `onnx` (default): ONNX Runtime backend with GPU acceleration support
//! - `tract` (default): pure Rust backend
//! - `cli` (default): the `rmbg` binary, progress bars and tracing subscriber setup
//! - `tracing-json`: JSON log output for the CLI
//! - `webp-support`: WebP inputs
//! - `windows-clipboard`: native clipboard target on Windows

pub mod assets;
pub mod backends;
pub mod cache;
#[cfg(feature = "cli")]
pub mod cli;
pub mod compositor;
pub mod config;
pub mod download;
pub mod error;
pub mod export;
pub mod inference;
pub mod pipeline;
pub mod services;
pub mod tracing_config;
pub mod types;
pub mod utils;

pub use assets::{AssetLoader, BackendFactory, MattingAssets};
pub use backends::create_backend;
pub use cache::{format_size, ModelCache};
pub use compositor::{Compositor, RasterSurface};
pub use config::{BackendType, ExecutionProvider, MaskResampling, PipelineConfig, PipelineConfigBuilder};
pub use download::{ModelDownloader, MonotonicProgress, ProgressSink};
pub use error::{Result, RmbgError};
pub use export::{
    copy_to_clipboard, save_result, ArchiveExporter, ClipboardSink, ExportEntry, FileClipboard,
};
pub use inference::{InferenceBackend, MattingEngine};
pub use pipeline::{BatchPipeline, BatchSummary, PipelineEvent};
pub use services::{ConsoleProgressReporter, NoOpProgressReporter, ProgressReporter};
pub use types::{
    ImageId, ImageRecord, ImageSource, LoadProgress, Mask, PipelineState, ResultImage,
};
pub use utils::{EnvironmentProbe, ExecutionProviderManager, Preprocessor, PreprocessorConfig};

#[cfg(all(windows, feature = "windows-clipboard"))]
pub use export::WindowsClipboard;

#[cfg(feature = "onnx")]
pub use backends::OnnxBackend;

#[cfg(feature = "tract")]
pub use backends::TractBackend;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_targets_rmbg() {
        let config = PipelineConfig::default();
        assert_eq!(config.model_id, "briaai/RMBG-1.4");
        assert_eq!(config.weight_file(), "onnx/model_fp16.onnx");
        assert!(!config.require_accelerator);
    }

    #[test]
    fn test_new_pipeline_is_idle() {
        let pipeline = BatchPipeline::new();
        assert_eq!(pipeline.state(), PipelineState::Idle);
        assert!(!pipeline.is_busy());
        assert!(!pipeline.export_ready());
        assert!(pipeline.results().is_empty());
    }
}
