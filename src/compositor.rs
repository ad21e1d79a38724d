//! Alpha compositing of a source image with its predicted mask
//!
//! The RGB channels of the source are copied unchanged and the mask becomes the
//! alpha channel. No feathering or color correction is applied.

use crate::config::PipelineConfig;
use crate::error::{Result, RmbgError};
use crate::types::{ImageId, Mask, ResultImage};
use image::{DynamicImage, Rgba, RgbaImage};

/// A freshly allocated RGBA buffer
///
/// Acquisition is fallible: zero-sized or oversized requests and failed
/// allocations report [`RmbgError::RenderSurfaceUnavailable`].
#[derive(Debug)]
pub struct RasterSurface {
    buffer: RgbaImage,
}

impl RasterSurface {
    /// # Errors
    /// - `RenderSurfaceUnavailable` for zero dimensions, more than `max_pixels`
    ///   pixels, or an allocation failure
    pub fn acquire(width: u32, height: u32, max_pixels: u64) -> Result<Self> {
        let unavailable = || RmbgError::RenderSurfaceUnavailable { width, height };
        let len = Self::byte_len(width, height, max_pixels)?;

        let mut data = Vec::new();
        data.try_reserve_exact(len).map_err(|_| unavailable())?;
        data.resize(len, 0u8);

        let buffer = RgbaImage::from_raw(width, height, data).ok_or_else(unavailable)?;
        Ok(Self { buffer })
    }

    /// Size in bytes of an RGBA surface, if one of these dimensions may be acquired
    ///
    /// # Errors
    /// - `RenderSurfaceUnavailable` for zero dimensions or more than `max_pixels` pixels
    pub fn byte_len(width: u32, height: u32, max_pixels: u64) -> Result<usize> {
        let unavailable = || RmbgError::RenderSurfaceUnavailable { width, height };

        let pixels = u64::from(width) * u64::from(height);
        if pixels == 0 || pixels > max_pixels {
            return Err(unavailable());
        }

        usize::try_from(pixels)
            .ok()
            .and_then(|p| p.checked_mul(4))
            .ok_or_else(unavailable)
    }

    #[must_use]
    pub fn dimensions(&self) -> (u32, u32) {
        self.buffer.dimensions()
    }

    #[must_use]
    pub fn into_image(self) -> RgbaImage {
        self.buffer
    }
}

/// Merges a source image and a same-sized mask into an RGBA result
#[derive(Debug, Clone, Copy)]
pub struct Compositor {
    max_surface_pixels: u64,
}

impl Compositor {
    #[must_use]
    pub fn new(max_surface_pixels: u64) -> Self {
        Self { max_surface_pixels }
    }

    #[must_use]
    pub fn from_config(config: &PipelineConfig) -> Self {
        Self::new(config.max_surface_pixels)
    }

    #[must_use]
    pub fn max_surface_pixels(&self) -> u64 {
        self.max_surface_pixels
    }

    /// Composite `mask` into `source` as its alpha channel
    ///
    /// # Errors
    /// - `CompositeFailed` when mask and source sizes differ
    /// - `RenderSurfaceUnavailable` when the output surface cannot be acquired
    pub fn composite(
        &self,
        image_id: ImageId,
        source: &DynamicImage,
        mask: &Mask,
    ) -> Result<ResultImage> {
        let (width, height) = (source.width(), source.height());
        if mask.dimensions() != (width, height) {
            let (mask_width, mask_height) = mask.dimensions();
            return Err(RmbgError::composite_failed(
                image_id,
                format!("mask is {mask_width}x{mask_height}, source is {width}x{height}"),
            ));
        }

        let mut surface = RasterSurface::acquire(width, height, self.max_surface_pixels)?;
        let rgb = source.to_rgb8();

        for ((dst, src), alpha) in surface
            .buffer
            .pixels_mut()
            .zip(rgb.pixels())
            .zip(mask.data())
        {
            *dst = Rgba([src[0], src[1], src[2], *alpha]);
        }

        Ok(ResultImage::new(image_id, surface.into_image()))
    }
}

impl Default for Compositor {
    fn default() -> Self {
        Self::from_config(&PipelineConfig::default())
    }
}
