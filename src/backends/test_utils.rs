//! Mock inference backends for unit tests
//!
//! These implement [`InferenceBackend`] without model files so the engine,
//! loader and pipeline can be exercised deterministically.

use crate::config::PipelineConfig;
use crate::error::{Result, RmbgError};
use crate::inference::InferenceBackend;
use instant::Duration;
use ndarray::Array4;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// Emits a `[1, 1, H, W]` tensor filled with one value, H and W taken from the input
#[derive(Debug, Clone)]
pub struct ConstantBackend {
    value: f32,
    initialized: bool,
    calls: Arc<AtomicUsize>,
}

impl ConstantBackend {
    #[must_use]
    pub fn new(value: f32) -> Self {
        Self {
            value,
            initialized: true,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    #[must_use]
    pub fn uninitialized(value: f32) -> Self {
        Self {
            initialized: false,
            ..Self::new(value)
        }
    }

    /// Shared counter of `infer` calls, usable after the backend is boxed
    #[must_use]
    pub fn call_counter(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.calls)
    }
}

impl InferenceBackend for ConstantBackend {
    fn initialize(
        &mut self,
        model_bytes: &[u8],
        _config: &PipelineConfig,
    ) -> Result<Option<Duration>> {
        if model_bytes.is_empty() {
            return Err(RmbgError::model("Empty model data"));
        }
        if self.initialized {
            return Ok(None);
        }
        self.initialized = true;
        Ok(Some(Duration::from_millis(1)))
    }

    fn infer(&mut self, input: &Array4<f32>) -> Result<Array4<f32>> {
        if !self.initialized {
            return Err(RmbgError::internal("Backend not initialized"));
        }
        self.calls.fetch_add(1, Ordering::SeqCst);
        let (batch, _, height, width) = input.dim();
        Ok(Array4::from_elem((batch, 1, height, width), self.value))
    }

    fn is_initialized(&self) -> bool {
        self.initialized
    }
}

/// Initialized backend whose every forward pass fails
#[derive(Debug, Default, Clone)]
pub struct FailingBackend;

impl FailingBackend {
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl InferenceBackend for FailingBackend {
    fn initialize(
        &mut self,
        _model_bytes: &[u8],
        _config: &PipelineConfig,
    ) -> Result<Option<Duration>> {
        Ok(None)
    }

    fn infer(&mut self, _input: &Array4<f32>) -> Result<Array4<f32>> {
        Err(RmbgError::model("simulated inference failure"))
    }

    fn is_initialized(&self) -> bool {
        true
    }
}

/// Fails the forward passes whose 0-based call index is listed, records all calls
#[derive(Debug, Clone)]
pub struct ScriptedBackend {
    fail_on: Vec<usize>,
    history: Arc<Mutex<Vec<usize>>>,
}

impl ScriptedBackend {
    #[must_use]
    pub fn failing_on(fail_on: &[usize]) -> Self {
        Self {
            fail_on: fail_on.to_vec(),
            history: Arc::new(Mutex::new(Vec::new())),
        }
    }

    #[must_use]
    pub fn history(&self) -> Arc<Mutex<Vec<usize>>> {
        Arc::clone(&self.history)
    }
}

impl InferenceBackend for ScriptedBackend {
    fn initialize(
        &mut self,
        _model_bytes: &[u8],
        _config: &PipelineConfig,
    ) -> Result<Option<Duration>> {
        Ok(None)
    }

    fn infer(&mut self, input: &Array4<f32>) -> Result<Array4<f32>> {
        let call = {
            let mut history = self
                .history
                .lock()
                .map_err(|_| RmbgError::internal("history lock poisoned"))?;
            let call = history.len();
            history.push(call);
            call
        };

        if self.fail_on.contains(&call) {
            return Err(RmbgError::model(format!("scripted failure on call {call}")));
        }
        let (batch, _, height, width) = input.dim();
        Ok(Array4::from_elem((batch, 1, height, width), 1.0))
    }

    fn is_initialized(&self) -> bool {
        true
    }
}

/// Panics on its first forward pass, then behaves like [`ConstantBackend`] with 1.0
#[derive(Debug, Default)]
pub struct PanicOnceBackend {
    panicked: bool,
}

impl PanicOnceBackend {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl InferenceBackend for PanicOnceBackend {
    fn initialize(
        &mut self,
        _model_bytes: &[u8],
        _config: &PipelineConfig,
    ) -> Result<Option<Duration>> {
        Ok(None)
    }

    fn infer(&mut self, input: &Array4<f32>) -> Result<Array4<f32>> {
        if !self.panicked {
            self.panicked = true;
            panic!("simulated backend panic");
        }
        let (batch, _, height, width) = input.dim();
        Ok(Array4::from_elem((batch, 1, height, width), 1.0))
    }

    fn is_initialized(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constant_backend_shape_follows_input() {
        let mut backend = ConstantBackend::new(0.25);
        let counter = backend.call_counter();
        let output = backend.infer(&Array4::zeros((1, 3, 6, 9))).unwrap();

        assert_eq!(output.dim(), (1, 1, 6, 9));
        assert!(output.iter().all(|&v| (v - 0.25).abs() < f32::EPSILON));
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_constant_backend_initialization() {
        let mut backend = ConstantBackend::uninitialized(1.0);
        assert!(backend.infer(&Array4::zeros((1, 3, 2, 2))).is_err());
        assert!(backend.initialize(&[], &PipelineConfig::default()).is_err());
        assert!(backend
            .initialize(b"model", &PipelineConfig::default())
            .unwrap()
            .is_some());
        assert!(backend.is_initialized());
    }

    #[test]
    fn test_scripted_backend_fails_selected_calls() {
        let mut backend = ScriptedBackend::failing_on(&[1]);
        let input = Array4::zeros((1, 3, 2, 2));

        assert!(backend.infer(&input).is_ok());
        assert!(backend.infer(&input).is_err());
        assert!(backend.infer(&input).is_ok());
        assert_eq!(*backend.history().lock().unwrap(), vec![0, 1, 2]);
    }
}
