//! Core data types shared by the loader, engine, compositor and pipeline

use crate::{
    config::MaskResampling,
    error::{Result, RmbgError},
};
use image::{DynamicImage, GrayImage, ImageFormat, RgbaImage};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// File extensions accepted as batch inputs
pub const SUPPORTED_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "bmp", "tif", "tiff", "webp"];

/// Stable identifier of an image within one pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ImageId(u64);

impl ImageId {
    #[must_use]
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ImageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Opaque reference to the original pixel data of an input image
#[derive(Debug, Clone)]
pub enum ImageSource {
    /// Image file on disk
    Path(PathBuf),
    /// Encoded image bytes held in memory
    Bytes(Arc<[u8]>),
    /// Already decoded raster
    Decoded(Arc<DynamicImage>),
}

impl ImageSource {
    /// Create a source from encoded bytes
    pub fn from_bytes<B: Into<Arc<[u8]>>>(bytes: B) -> Self {
        Self::Bytes(bytes.into())
    }

    /// Create a source from a decoded image
    #[must_use]
    pub fn from_image(image: DynamicImage) -> Self {
        Self::Decoded(Arc::new(image))
    }

    /// Short description for logs
    #[must_use]
    pub fn describe(&self) -> String {
        match self {
            Self::Path(path) => path.display().to_string(),
            Self::Bytes(bytes) => format!("<{} bytes>", bytes.len()),
            Self::Decoded(image) => format!("<decoded {}x{}>", image.width(), image.height()),
        }
    }

    /// Decode the source into a raster
    ///
    /// File reads are asynchronous; decoding runs on the blocking pool.
    ///
    /// # Errors
    /// - File cannot be read
    /// - Data is not a supported image format
    pub async fn decode(&self) -> Result<DynamicImage> {
        let bytes: Arc<[u8]> = match self {
            Self::Decoded(image) => return Ok(image.as_ref().clone()),
            Self::Bytes(bytes) => Arc::clone(bytes),
            Self::Path(path) => tokio::fs::read(path)
                .await
                .map_err(|e| RmbgError::file_io_error("read image", path, &e))?
                .into(),
        };

        tokio::task::spawn_blocking(move || image::load_from_memory(&bytes))
            .await
            .map_err(|e| RmbgError::internal(format!("Decode task failed: {e}")))?
            .map_err(RmbgError::from)
    }
}

impl From<PathBuf> for ImageSource {
    fn from(path: PathBuf) -> Self {
        Self::Path(path)
    }
}

impl From<&Path> for ImageSource {
    fn from(path: &Path) -> Self {
        Self::Path(path.to_path_buf())
    }
}

impl From<DynamicImage> for ImageSource {
    fn from(image: DynamicImage) -> Self {
        Self::from_image(image)
    }
}

/// An image in the pipeline's input list
#[derive(Debug, Clone)]
pub struct ImageRecord {
    pub id: ImageId,
    pub source: ImageSource,
}

impl ImageRecord {
    #[must_use]
    pub fn new(id: ImageId, source: ImageSource) -> Self {
        Self { id, source }
    }
}

/// Single-channel opacity mask, one byte per pixel, row-major
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mask {
    data: Vec<u8>,
    width: u32,
    height: u32,
}

impl Mask {
    /// Create a mask from raw intensity values
    ///
    /// # Errors
    /// - `data.len()` does not equal `width * height`
    pub fn new(data: Vec<u8>, width: u32, height: u32) -> Result<Self> {
        let expected = (width as usize) * (height as usize);
        if data.len() != expected {
            return Err(RmbgError::internal(format!(
                "Mask data length {} does not match {}x{}",
                data.len(),
                width,
                height
            )));
        }
        Ok(Self {
            data,
            width,
            height,
        })
    }

    /// Mask with every pixel set to `value`
    #[must_use]
    pub fn filled(width: u32, height: u32, value: u8) -> Self {
        Self {
            data: vec![value; (width as usize) * (height as usize)],
            width,
            height,
        }
    }

    #[must_use]
    pub fn from_gray_image(image: GrayImage) -> Self {
        let (width, height) = image.dimensions();
        Self {
            data: image.into_raw(),
            width,
            height,
        }
    }

    #[must_use]
    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    #[must_use]
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Intensity at a coordinate, `None` outside the mask
    #[must_use]
    pub fn get(&self, x: u32, y: u32) -> Option<u8> {
        if x >= self.width || y >= self.height {
            return None;
        }
        self.data
            .get((y as usize) * (self.width as usize) + x as usize)
            .copied()
    }

    /// Resample the mask to new dimensions
    #[must_use]
    pub fn resize(&self, width: u32, height: u32, resampling: MaskResampling) -> Self {
        if (width, height) == (self.width, self.height) {
            return self.clone();
        }
        let Some(gray) = GrayImage::from_raw(self.width, self.height, self.data.clone()) else {
            return Self::filled(width, height, 0);
        };
        let resized = image::imageops::resize(&gray, width, height, resampling.filter_type());
        Self::from_gray_image(resized)
    }

    #[must_use]
    pub fn into_gray_image(self) -> Option<GrayImage> {
        GrayImage::from_raw(self.width, self.height, self.data)
    }
}

/// Composited RGBA output for one input image
#[derive(Debug, Clone)]
pub struct ResultImage {
    id: ImageId,
    image: RgbaImage,
}

impl ResultImage {
    #[must_use]
    pub fn new(id: ImageId, image: RgbaImage) -> Self {
        Self { id, image }
    }

    /// Identifier of the source image this result belongs to
    #[must_use]
    pub fn id(&self) -> ImageId {
        self.id
    }

    #[must_use]
    pub fn image(&self) -> &RgbaImage {
        &self.image
    }

    #[must_use]
    pub fn into_image(self) -> RgbaImage {
        self.image
    }

    #[must_use]
    pub fn dimensions(&self) -> (u32, u32) {
        self.image.dimensions()
    }

    /// Encode the result as PNG, keeping the alpha channel
    ///
    /// # Errors
    /// - PNG encoding failure
    pub fn to_png_bytes(&self) -> Result<Vec<u8>> {
        encode_png(&DynamicImage::ImageRgba8(self.image.clone()))
    }

    /// Save the result as a PNG file
    ///
    /// # Errors
    /// - File creation or encoding failure
    pub fn save_png<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        self.image.save_with_format(path, ImageFormat::Png)?;
        Ok(())
    }
}

/// Encode any raster as PNG bytes
pub(crate) fn encode_png(image: &DynamicImage) -> Result<Vec<u8>> {
    let mut buffer = Vec::new();
    let mut cursor = std::io::Cursor::new(&mut buffer);
    image.write_to(&mut cursor, ImageFormat::Png)?;
    Ok(buffer)
}

/// Byte-level progress of the model weight download
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadProgress {
    pub downloaded_bytes: u64,
    /// `None` when the server did not announce a content length
    pub total_bytes: Option<u64>,
}

impl LoadProgress {
    #[must_use]
    pub fn new(downloaded_bytes: u64, total_bytes: Option<u64>) -> Self {
        Self {
            downloaded_bytes,
            total_bytes,
        }
    }

    /// Whether a determinate progress indicator can be shown
    #[must_use]
    pub fn is_determinate(&self) -> bool {
        matches!(self.total_bytes, Some(total) if total > 0)
    }

    /// Completed fraction in `[0, 1]`, `None` when the total is unknown
    #[must_use]
    pub fn fraction(&self) -> Option<f64> {
        match self.total_bytes {
            Some(total) if total > 0 => {
                Some((self.downloaded_bytes as f64 / total as f64).min(1.0))
            },
            _ => None,
        }
    }

    /// Completed percentage in `[0, 100]`
    #[must_use]
    pub fn percentage(&self) -> Option<f64> {
        self.fraction().map(|f| f * 100.0)
    }

    #[must_use]
    pub fn total_megabytes(&self) -> Option<f64> {
        self.total_bytes.map(|b| b as f64 / 1024.0 / 1024.0)
    }
}

/// Lifecycle of the batch pipeline
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum PipelineState {
    #[default]
    Idle,
    Processing,
    Complete,
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Processing => write!(f, "processing"),
            Self::Complete => write!(f, "complete"),
        }
    }
}
