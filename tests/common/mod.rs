//! Shared helpers for integration tests
//!
//! Provides deterministic inference backends so the pipeline can be driven end to
//! end without downloading the real model.

#![allow(dead_code)]

pub mod hub;

use image::{DynamicImage, Rgb, RgbImage};
use ndarray::{s, Array4};
use rmbg::{
    InferenceBackend, MaskResampling, MattingAssets, MattingEngine, PipelineConfig, Preprocessor,
    PreprocessorConfig, Result, RmbgError,
};
use std::time::Duration;

/// Side length of the model input used by the test preprocessor
pub const MODEL_SIZE: u32 = 8;

/// Backend whose mask reproduces the normalized red channel of its input
///
/// With the default preprocessing (rescale 1/255, mean 0.5, std 1) the predicted
/// opacity of a solid image equals its red value divided by 255.
#[derive(Debug, Default)]
pub struct RedChannelBackend {
    delay: Option<Duration>,
    fail_when_red: Option<u8>,
}

impl RedChannelBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Block every forward pass for `delay`
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Fail the forward pass of images whose red value is `red`
    pub fn failing_for_red(mut self, red: u8) -> Self {
        self.fail_when_red = Some(red);
        self
    }
}

impl InferenceBackend for RedChannelBackend {
    fn initialize(
        &mut self,
        _model_bytes: &[u8],
        _config: &PipelineConfig,
    ) -> Result<Option<Duration>> {
        Ok(None)
    }

    fn infer(&mut self, input: &Array4<f32>) -> Result<Array4<f32>> {
        if let Some(delay) = self.delay {
            std::thread::sleep(delay);
        }

        let red = input.slice(s![.., 0..1, .., ..]).mapv(|v| v + 0.5);
        if let Some(fail) = self.fail_when_red {
            let value = red.iter().next().copied().unwrap_or_default();
            if (value * 255.0).round() as u8 == fail {
                return Err(RmbgError::model(format!("refusing red value {fail}")));
            }
        }
        Ok(red)
    }

    fn is_initialized(&self) -> bool {
        true
    }
}

/// Assets around `backend` with a small model input size
pub fn assets_with(backend: RedChannelBackend, config: PipelineConfig) -> MattingAssets {
    let preprocessor =
        Preprocessor::new(PreprocessorConfig::with_size(MODEL_SIZE, MODEL_SIZE));
    let engine = MattingEngine::new(Box::new(backend), preprocessor, MaskResampling::Bilinear)
        .expect("backend is initialized");
    MattingAssets::new(engine, config)
}

/// Solid-colored RGB image
pub fn solid(width: u32, height: u32, red: u8) -> DynamicImage {
    DynamicImage::ImageRgb8(RgbImage::from_pixel(width, height, Rgb([red, 40, 200])))
}
