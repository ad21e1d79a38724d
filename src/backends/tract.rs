//! Tract backend: pure Rust CPU inference with no native dependencies

use crate::config::PipelineConfig;
use crate::error::{Result, RmbgError};
use crate::inference::InferenceBackend;
use instant::{Duration, Instant};
use ndarray::Array4;
use tract_onnx::prelude::*;

/// Type alias for the optimized, runnable Tract plan
type TractModel = RunnableModel<TypedFact, Box<dyn TypedOp>, Graph<TypedFact, Box<dyn TypedOp>>>;

#[derive(Debug, Default)]
pub struct TractBackend {
    model: Option<TractModel>,
}

impl TractBackend {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn load_model(&mut self, model_bytes: &[u8]) -> Result<Duration> {
        let model_load_start = Instant::now();
        log::info!(
            "Initializing Tract backend ({:.2} MB model)",
            model_bytes.len() as f64 / (1024.0 * 1024.0)
        );

        let model = onnx()
            .model_for_read(&mut std::io::Cursor::new(model_bytes))
            .map_err(|e| RmbgError::model(format!("Failed to load ONNX model: {e}")))?
            .into_optimized()
            .map_err(|e| RmbgError::model(format!("Failed to optimize model: {e}")))?
            .into_runnable()
            .map_err(|e| RmbgError::model(format!("Failed to create runnable model: {e}")))?;

        self.model = Some(model);

        let model_load_time = model_load_start.elapsed();
        log::info!(
            "Tract backend initialized in {}ms",
            model_load_time.as_millis()
        );
        Ok(model_load_time)
    }
}

impl InferenceBackend for TractBackend {
    fn initialize(
        &mut self,
        model_bytes: &[u8],
        _config: &PipelineConfig,
    ) -> Result<Option<Duration>> {
        if self.model.is_some() {
            return Ok(None);
        }
        self.load_model(model_bytes).map(Some)
    }

    fn infer(&mut self, input: &Array4<f32>) -> Result<Array4<f32>> {
        let model = self
            .model
            .as_ref()
            .ok_or_else(|| RmbgError::internal("Tract model not initialized"))?;

        let inference_start = Instant::now();
        log::debug!("Running Tract inference on {:?}", input.shape());

        let input_tensor = Tensor::from(input.clone());
        let outputs = model
            .run(tvec![input_tensor.into()])
            .map_err(|e| RmbgError::model(format!("Tract inference failed: {e}")))?;

        let output_tensor = outputs
            .into_iter()
            .next()
            .ok_or_else(|| RmbgError::model("No output tensor found"))?
            .into_arc_tensor();

        let output_data = output_tensor
            .to_array_view::<f32>()
            .map_err(|e| RmbgError::model(format!("Failed to convert output tensor: {e}")))?;

        let output = output_data
            .to_owned()
            .into_dimensionality::<ndarray::Ix4>()
            .map_err(|e| {
                RmbgError::model(format!(
                    "Expected 4D output tensor, got shape {:?}: {e}",
                    output_data.shape()
                ))
            })?;

        log::debug!(
            "Tract inference completed in {}ms",
            inference_start.elapsed().as_millis()
        );
        Ok(output)
    }

    fn is_initialized(&self) -> bool {
        self.model.is_some()
    }
}
