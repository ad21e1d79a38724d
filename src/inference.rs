//! Inference backend abstraction and the matting engine built on top of it

use crate::config::{MaskResampling, PipelineConfig};
use crate::error::{Result, RmbgError};
use crate::types::{ImageId, Mask};
use crate::utils::Preprocessor;
use image::DynamicImage;
use ndarray::Array4;
use std::sync::{Arc, Mutex, PoisonError};

// Use instant crate for cross-platform time compatibility
use instant::{Duration, Instant};

/// Trait for inference backends
pub trait InferenceBackend: Send {
    /// Initialize the backend from serialized ONNX model bytes
    ///
    /// Returns the model load time, or `None` if the backend was already initialized.
    ///
    /// # Errors
    /// - Model parsing or optimization failures
    /// - Execution provider configuration errors
    fn initialize(&mut self, model_bytes: &[u8], config: &PipelineConfig)
        -> Result<Option<Duration>>;

    /// Run the forward pass on an NCHW input tensor
    ///
    /// # Errors
    /// - Backend not initialized
    /// - Model inference failures
    /// - Output tensor is not four-dimensional
    fn infer(&mut self, input: &Array4<f32>) -> Result<Array4<f32>>;

    fn is_initialized(&self) -> bool;
}

/// Convert a `[1, C, H, W]` model output into a mask at `width x height`
///
/// Only channel 0 is used. Values are clamped to `[0, 1]` and scaled to bytes by
/// truncation before resampling.
///
/// # Errors
/// - Output tensor has an empty batch or channel axis
pub fn tensor_to_mask(
    output: &Array4<f32>,
    width: u32,
    height: u32,
    resampling: MaskResampling,
) -> Result<Mask> {
    let (batch, channels, out_height, out_width) = output.dim();
    if batch == 0 || channels == 0 {
        return Err(RmbgError::model(format!(
            "Unexpected output tensor shape {:?}",
            output.shape()
        )));
    }

    let data: Vec<u8> = output
        .slice(ndarray::s![0, 0, .., ..])
        .iter()
        .map(|v| (v.clamp(0.0, 1.0) * 255.0) as u8)
        .collect();

    let mask = Mask::new(data, out_width as u32, out_height as u32)?;
    if mask.dimensions() == (width, height) {
        Ok(mask)
    } else {
        Ok(mask.resize(width, height, resampling))
    }
}

/// Pretrained matting model exposing `predict(image) -> mask`
///
/// Cloning is cheap; clones share one backend and calls are serialized on it.
#[derive(Clone)]
pub struct MattingEngine {
    backend: Arc<Mutex<Box<dyn InferenceBackend>>>,
    preprocessor: Arc<Preprocessor>,
    resampling: MaskResampling,
}

impl std::fmt::Debug for MattingEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MattingEngine")
            .field("preprocessor", &self.preprocessor)
            .field("resampling", &self.resampling)
            .finish_non_exhaustive()
    }
}

impl MattingEngine {
    /// Wrap an initialized backend
    ///
    /// # Errors
    /// - The backend has not been initialized
    pub fn new(
        backend: Box<dyn InferenceBackend>,
        preprocessor: Preprocessor,
        resampling: MaskResampling,
    ) -> Result<Self> {
        if !backend.is_initialized() {
            return Err(RmbgError::internal("Inference backend is not initialized"));
        }
        Ok(Self {
            backend: Arc::new(Mutex::new(backend)),
            preprocessor: Arc::new(preprocessor),
            resampling,
        })
    }

    #[must_use]
    pub fn preprocessor(&self) -> &Preprocessor {
        &self.preprocessor
    }

    /// Predict the alpha mask for `image`, sized to the image
    ///
    /// Preprocessing and the forward pass run on the blocking thread pool.
    ///
    /// # Errors
    /// - `InferenceFailed` for any preprocessing, inference or postprocessing failure
    #[tracing::instrument(skip(self, image), fields(width = image.width(), height = image.height()))]
    pub async fn predict(&self, image_id: ImageId, image: Arc<DynamicImage>) -> Result<Mask> {
        let engine = self.clone();
        let mask = tokio::task::spawn_blocking(move || engine.predict_blocking(&image))
            .await
            .map_err(|e| RmbgError::inference_failed(image_id, format!("task failed: {e}")))?;

        mask.map_err(|e| match e {
            RmbgError::InferenceFailed { .. } => e,
            other => RmbgError::inference_failed(image_id, other.to_string()),
        })
    }

    fn predict_blocking(&self, image: &DynamicImage) -> Result<Mask> {
        let start = Instant::now();
        let input = self.preprocessor.preprocess(image)?;

        let output = {
            // A panicking forward pass only fails its own image
            let mut backend = self.backend.lock().unwrap_or_else(PoisonError::into_inner);
            backend.infer(&input)?
        };

        let mask = tensor_to_mask(&output, image.width(), image.height(), self.resampling)?;
        log::debug!(
            "Predicted {}x{} mask in {:.2}ms",
            image.width(),
            image.height(),
            start.elapsed().as_secs_f64() * 1000.0
        );
        Ok(mask)
    }
}
