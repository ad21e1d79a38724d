//! Image preprocessing driven by the model's `preprocessor_config.json`

use crate::error::{Result, RmbgError};
use image::imageops::FilterType;
use image::DynamicImage;
use ndarray::Array4;
use serde::Deserialize;
use std::path::Path;

/// Target input resolution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct ImageSize {
    pub width: u32,
    pub height: u32,
}

/// Preprocessor settings as published alongside the model
///
/// Unknown keys (`feature_extractor_type`, `resample`, ...) are ignored and missing
/// keys fall back to the RMBG-1.4 values.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct PreprocessorConfig {
    pub do_resize: bool,
    pub size: ImageSize,
    pub do_rescale: bool,
    pub rescale_factor: f32,
    pub do_normalize: bool,
    pub image_mean: [f32; 3],
    pub image_std: [f32; 3],
}

impl Default for PreprocessorConfig {
    fn default() -> Self {
        Self {
            do_resize: true,
            size: ImageSize {
                width: 1024,
                height: 1024,
            },
            do_rescale: true,
            rescale_factor: 1.0 / 255.0,
            do_normalize: true,
            image_mean: [0.5, 0.5, 0.5],
            image_std: [1.0, 1.0, 1.0],
        }
    }
}

impl PreprocessorConfig {
    /// Default settings with a different model input resolution
    #[must_use]
    pub fn with_size(width: u32, height: u32) -> Self {
        Self {
            size: ImageSize { width, height },
            ..Self::default()
        }
    }

    /// Parse a `preprocessor_config.json` document
    ///
    /// # Errors
    /// - Malformed JSON
    /// - Zero target size or zero standard deviation
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| RmbgError::model(format!("Invalid preprocessor config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// # Errors
    /// - File cannot be read or fails [`PreprocessorConfig::from_json`]
    pub fn from_file(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)
            .map_err(|e| RmbgError::file_io_error("read preprocessor config", path, &e))?;
        Self::from_json(&json)
    }

    fn validate(&self) -> Result<()> {
        if self.size.width == 0 || self.size.height == 0 {
            return Err(RmbgError::model("Preprocessor target size must be non-zero"));
        }
        if self.image_std.iter().any(|s| *s == 0.0) {
            return Err(RmbgError::model("Preprocessor image_std must be non-zero"));
        }
        Ok(())
    }
}

/// Converts arbitrary images into the model's fixed-shape input tensor
#[derive(Debug, Clone)]
pub struct Preprocessor {
    config: PreprocessorConfig,
}

impl Preprocessor {
    #[must_use]
    pub fn new(config: PreprocessorConfig) -> Self {
        Self { config }
    }

    #[must_use]
    pub fn config(&self) -> &PreprocessorConfig {
        &self.config
    }

    /// Resize (no padding), rescale and normalize into an NCHW `[1, 3, H, W]` tensor
    ///
    /// # Errors
    /// - Source image has a zero dimension
    pub fn preprocess(&self, image: &DynamicImage) -> Result<Array4<f32>> {
        if image.width() == 0 || image.height() == 0 {
            return Err(RmbgError::invalid_config(format!(
                "Cannot preprocess a {}x{} image",
                image.width(),
                image.height()
            )));
        }

        let rgb_image = image.to_rgb8();
        let rgb_image = if self.config.do_resize {
            image::imageops::resize(
                &rgb_image,
                self.config.size.width,
                self.config.size.height,
                FilterType::Triangle,
            )
        } else {
            rgb_image
        };

        let (width, height) = rgb_image.dimensions();
        let mut tensor = Array4::<f32>::zeros((1, 3, height as usize, width as usize));

        let scale = if self.config.do_rescale {
            self.config.rescale_factor
        } else {
            1.0
        };
        let (mean, std) = if self.config.do_normalize {
            (self.config.image_mean, self.config.image_std)
        } else {
            ([0.0; 3], [1.0; 3])
        };

        #[allow(clippy::indexing_slicing)]
        // Safe: tensor allocated with the resized image's dimensions
        for (x, y, pixel) in rgb_image.enumerate_pixels() {
            for channel in 0..3 {
                let value = f32::from(pixel[channel]) * scale;
                tensor[[0, channel, y as usize, x as usize]] =
                    (value - mean[channel]) / std[channel];
            }
        }

        Ok(tensor)
    }
}
