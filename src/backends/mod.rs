//! Inference backend implementations
//!
//! - ONNX Runtime backend (GPU acceleration through CUDA or `CoreML`)
//! - Tract backend (pure Rust, CPU only)

use crate::config::BackendType;
use crate::error::{Result, RmbgError};
use crate::inference::InferenceBackend;

#[cfg(feature = "onnx")]
pub mod onnx;

#[cfg(feature = "tract")]
pub mod tract;

#[cfg(test)]
pub mod test_utils;

#[cfg(feature = "onnx")]
pub use self::onnx::OnnxBackend;

#[cfg(feature = "tract")]
pub use self::tract::TractBackend;

/// Create an uninitialized backend of the requested type
///
/// # Errors
/// - The backend's cargo feature is not enabled
pub fn create_backend(backend_type: BackendType) -> Result<Box<dyn InferenceBackend>> {
    match backend_type {
        #[cfg(feature = "onnx")]
        BackendType::Onnx => Ok(Box::new(OnnxBackend::new())),
        #[cfg(feature = "tract")]
        BackendType::Tract => Ok(Box::new(TractBackend::new())),
        #[allow(unreachable_patterns)]
        other => Err(RmbgError::invalid_config(format!(
            "Backend '{other}' is not compiled in; enable the '{other}' feature"
        ))),
    }
}
