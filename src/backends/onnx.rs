//! ONNX Runtime backend
//!
//! Runs the matting model through ONNX Runtime with CPU, CUDA or `CoreML`
//! execution providers.

use crate::config::{ExecutionProvider, PipelineConfig};
use crate::error::{Result, RmbgError};
use crate::inference::InferenceBackend;
use instant::{Duration, Instant};
use ndarray::Array4;
use ort::execution_providers::{
    CUDAExecutionProvider, CoreMLExecutionProvider, ExecutionProvider as OrtExecutionProvider,
    ExecutionProviderDispatch,
};
use ort::session::{builder::GraphOptimizationLevel, Session};
use ort::value::Value;

/// ONNX Runtime backend for running the matting model
#[derive(Debug, Default)]
pub struct OnnxBackend {
    session: Option<Session>,
}

impl OnnxBackend {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether ONNX Runtime can use `provider` on this host
    #[must_use]
    pub fn provider_available(provider: ExecutionProvider) -> bool {
        let available = match provider {
            ExecutionProvider::Auto | ExecutionProvider::Cpu => Ok(true),
            ExecutionProvider::Cuda => {
                OrtExecutionProvider::is_available(&CUDAExecutionProvider::default())
            },
            ExecutionProvider::CoreMl => {
                OrtExecutionProvider::is_available(&CoreMLExecutionProvider::default())
            },
        };
        let available = available.unwrap_or(false);
        log::debug!("Execution provider {} available: {}", provider, available);
        available
    }

    fn execution_providers(provider: ExecutionProvider) -> Vec<ExecutionProviderDispatch> {
        let mut providers = Vec::new();
        let want_cuda = matches!(provider, ExecutionProvider::Auto | ExecutionProvider::Cuda);
        let want_coreml = matches!(provider, ExecutionProvider::Auto | ExecutionProvider::CoreMl);

        if want_cuda && Self::provider_available(ExecutionProvider::Cuda) {
            log::info!("Using CUDA execution provider");
            providers.push(CUDAExecutionProvider::default().build());
        }
        if want_coreml && Self::provider_available(ExecutionProvider::CoreMl) {
            log::info!("Using CoreML execution provider");
            providers.push(CoreMLExecutionProvider::default().with_subgraphs(true).build());
        }
        if providers.is_empty() {
            if provider.is_accelerated() {
                log::warn!("{} execution provider not available, falling back to CPU", provider);
            } else {
                log::info!("Using CPU execution provider");
            }
        }
        providers
    }

    fn load_model(&mut self, model_bytes: &[u8], config: &PipelineConfig) -> Result<Duration> {
        let model_load_start = Instant::now();

        let mut session_builder = Session::builder()
            .map_err(|e| RmbgError::model(format!("Failed to create session builder: {e}")))?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(|e| RmbgError::model(format!("Failed to set optimization level: {e}")))?;

        let providers = Self::execution_providers(config.execution_provider);
        if !providers.is_empty() {
            session_builder = session_builder
                .with_execution_providers(providers)
                .map_err(|e| {
                    RmbgError::model(format!("Failed to set execution providers: {e}"))
                })?;
        }

        let intra_threads = if config.intra_threads > 0 {
            config.intra_threads
        } else {
            std::thread::available_parallelism()
                .map(std::num::NonZero::get)
                .unwrap_or(8)
        };

        let session = session_builder
            .with_intra_threads(intra_threads)
            .map_err(|e| RmbgError::model(format!("Failed to set intra threads: {e}")))?
            .commit_from_memory(model_bytes)
            .map_err(|e| RmbgError::model(format!("Failed to create session from model data: {e}")))?;

        self.session = Some(session);

        let model_load_time = model_load_start.elapsed();
        log::info!(
            "ONNX Runtime session ready in {:.0}ms ({} intra-op threads, {:.2} MB model)",
            model_load_time.as_secs_f64() * 1000.0,
            intra_threads,
            model_bytes.len() as f64 / (1024.0 * 1024.0)
        );
        Ok(model_load_time)
    }
}

impl InferenceBackend for OnnxBackend {
    fn initialize(
        &mut self,
        model_bytes: &[u8],
        config: &PipelineConfig,
    ) -> Result<Option<Duration>> {
        if self.session.is_some() {
            return Ok(None);
        }
        self.load_model(model_bytes, config).map(Some)
    }

    fn infer(&mut self, input: &Array4<f32>) -> Result<Array4<f32>> {
        let session = self
            .session
            .as_mut()
            .ok_or_else(|| RmbgError::internal("ONNX session not initialized"))?;

        let inference_start = Instant::now();
        log::debug!("Starting ONNX inference with input shape: {:?}", input.dim());

        let input_value = Value::from_array(input.clone())
            .map_err(|e| RmbgError::model(format!("Failed to convert input tensor: {e}")))?;

        // Positional input and output keep us independent of tensor names
        let outputs = session
            .run(ort::inputs![input_value])
            .map_err(|e| RmbgError::model(format!("ONNX inference failed: {e}")))?;

        let output_tensor = {
            let keys: Vec<_> = outputs.keys().collect();
            let first_key = keys
                .first()
                .ok_or_else(|| RmbgError::model("No output tensors found"))?;
            outputs
                .get(first_key)
                .ok_or_else(|| RmbgError::model("First output tensor not found"))?
                .try_extract_array::<f32>()
                .map_err(|e| RmbgError::model(format!("Failed to extract output tensor: {e}")))?
        };

        let output_shape = output_tensor.shape().to_vec();
        let [batch, channels, height, width] = output_shape[..] else {
            return Err(RmbgError::model(format!(
                "Expected 4D output tensor, got {}D",
                output_shape.len()
            )));
        };

        let output = Array4::from_shape_vec(
            (batch, channels, height, width),
            output_tensor.iter().copied().collect(),
        )
        .map_err(|e| RmbgError::model(format!("Failed to reshape output tensor: {e}")))?;

        log::debug!(
            "ONNX inference complete: {:.2}ms",
            inference_start.elapsed().as_secs_f64() * 1000.0
        );
        Ok(output)
    }

    fn is_initialized(&self) -> bool {
        self.session.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_backend_is_uninitialized() {
        let backend = OnnxBackend::new();
        assert!(!backend.is_initialized());
    }

    #[test]
    fn test_infer_requires_session() {
        let mut backend = OnnxBackend::new();
        let input = Array4::<f32>::zeros((1, 3, 4, 4));
        assert!(backend.infer(&input).is_err());
    }

    #[test]
    fn test_cpu_is_always_available() {
        assert!(OnnxBackend::provider_available(ExecutionProvider::Cpu));
        assert!(OnnxBackend::provider_available(ExecutionProvider::Auto));
    }

    #[test]
    fn test_initialize_rejects_garbage_model() {
        let mut backend = OnnxBackend::new();
        let result = backend.initialize(b"not an onnx model", &PipelineConfig::default());
        assert!(result.is_err());
        assert!(!backend.is_initialized());
    }
}
