//! Archive, file and clipboard export of batch results
//!
//! Every input of a batch becomes one archive entry: its composited result when one
//! was produced, otherwise the original image. Entries are PNG-encoded concurrently
//! and written in input order.

use crate::compositor::RasterSurface;
use crate::config::PipelineConfig;
use crate::error::{Result, RmbgError};
use crate::types::{encode_png, ImageSource, ResultImage};
use async_trait::async_trait;
use futures::future::join_all;
use image::{DynamicImage, ImageFormat, RgbaImage};
use std::io::{Cursor, Write};
use std::path::{Path, PathBuf};
use tracing::Instrument;
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipWriter};

/// File name of the batch archive
pub const ARCHIVE_FILE_NAME: &str = "images.zip";

/// File name used when saving a single result
pub const RESULT_FILE_NAME: &str = "image.png";

/// Archive entry name for the image at zero-based `index`
#[must_use]
pub fn entry_name(index: usize) -> String {
    format!("image-{}.png", index + 1)
}

/// Content exported for one position of the batch
#[derive(Debug, Clone)]
pub enum ExportEntry {
    /// Composited output with transparency
    Result(ResultImage),
    /// Unprocessed original, exported as-is
    Original(ImageSource),
}

impl ExportEntry {
    /// The result when present, else the original
    #[must_use]
    pub fn select(result: Option<ResultImage>, original: ImageSource) -> Self {
        result.map_or(Self::Original(original), Self::Result)
    }

    #[must_use]
    pub fn is_result(&self) -> bool {
        matches!(self, Self::Result(_))
    }

    async fn encode(&self, max_surface_pixels: u64) -> Result<Vec<u8>> {
        let image = match self {
            Self::Result(result) => DynamicImage::ImageRgba8(result.image().clone()),
            Self::Original(source) => source.decode().await?,
        };
        RasterSurface::byte_len(image.width(), image.height(), max_surface_pixels)?;

        tokio::task::spawn_blocking(move || encode_png(&image))
            .await
            .map_err(|e| RmbgError::internal(format!("Encode task failed: {e}")))?
    }
}

/// Builds zip archives from export entries
#[derive(Debug, Clone)]
pub struct ArchiveExporter {
    compression: CompressionMethod,
    max_surface_pixels: u64,
}

impl ArchiveExporter {
    #[must_use]
    pub fn new(max_surface_pixels: u64) -> Self {
        Self {
            compression: CompressionMethod::Deflated,
            max_surface_pixels,
        }
    }

    #[must_use]
    pub fn from_config(config: &PipelineConfig) -> Self {
        Self::new(config.max_surface_pixels)
    }

    /// Store entries without compression
    #[must_use]
    pub fn stored(mut self) -> Self {
        self.compression = CompressionMethod::Stored;
        self
    }

    /// Encode all entries and pack them into an in-memory zip archive
    ///
    /// Entry `i` is named `image-<i+1>.png`. An entry that cannot be encoded is left
    /// out of the archive and logged; the remaining entries keep their names.
    ///
    /// # Errors
    /// - Zip finalization failure
    pub async fn export_archive(&self, entries: &[ExportEntry]) -> Result<Vec<u8>> {
        let span = tracing::info_span!("export_archive", entries = entries.len());
        async {
            let encoded = join_all(
                entries
                    .iter()
                    .map(|entry| entry.encode(self.max_surface_pixels)),
            )
            .await;

            let mut files = Vec::with_capacity(encoded.len());
            for (index, outcome) in encoded.into_iter().enumerate() {
                match outcome {
                    Ok(bytes) => files.push((entry_name(index), bytes)),
                    Err(e) => log::warn!("Leaving {} out of the archive: {}", entry_name(index), e),
                }
            }

            let compression = self.compression;
            let archive = tokio::task::spawn_blocking(move || write_zip(files, compression))
                .await
                .map_err(|e| RmbgError::internal(format!("Archive task failed: {e}")))??;

            log::info!("Archive ready ({} bytes)", archive.len());
            Ok(archive)
        }
        .instrument(span)
        .await
    }

    /// Export the entries and write `images.zip` into `dir`
    ///
    /// # Errors
    /// - Archive creation or file write failure
    pub async fn save_archive(&self, entries: &[ExportEntry], dir: &Path) -> Result<PathBuf> {
        let archive = self.export_archive(entries).await?;
        let path = dir.join(ARCHIVE_FILE_NAME);
        tokio::fs::write(&path, archive)
            .await
            .map_err(|e| RmbgError::file_io_error("write archive", &path, &e))?;
        Ok(path)
    }
}

impl Default for ArchiveExporter {
    fn default() -> Self {
        Self::from_config(&PipelineConfig::default())
    }
}

fn write_zip(files: Vec<(String, Vec<u8>)>, compression: CompressionMethod) -> Result<Vec<u8>> {
    let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
    let options = FileOptions::default().compression_method(compression);

    for (name, bytes) in files {
        zip.start_file(name, options)?;
        zip.write_all(&bytes)?;
    }

    Ok(zip.finish()?.into_inner())
}

/// Save one result as `image.png` in `dir`
///
/// # Errors
/// - Encoding or file write failure
pub async fn save_result(result: &ResultImage, dir: &Path) -> Result<PathBuf> {
    let path = dir.join(RESULT_FILE_NAME);
    let bytes = result.to_png_bytes()?;
    tokio::fs::write(&path, bytes)
        .await
        .map_err(|e| RmbgError::file_io_error("write result", &path, &e))?;
    Ok(path)
}

/// Destination for the per-image copy action
#[async_trait]
pub trait ClipboardSink: Send + Sync {
    /// Place an image on the clipboard
    async fn write_image(&self, image: &RgbaImage) -> Result<()>;
}

/// Copy a result to the clipboard, logging the outcome
///
/// Failures are reported as `ClipboardWriteFailed` in the log only. Returns whether
/// the copy succeeded.
pub async fn copy_to_clipboard(result: &ResultImage, sink: &dyn ClipboardSink) -> bool {
    match sink.write_image(result.image()).await {
        Ok(()) => {
            log::info!("Image {} copied to clipboard", result.id());
            true
        },
        Err(e) => {
            let error = match e {
                RmbgError::ClipboardWriteFailed(_) => e,
                other => RmbgError::ClipboardWriteFailed(other.to_string()),
            };
            log::error!("Failed to copy image {}: {}", result.id(), error);
            false
        },
    }
}

/// System clipboard on Windows, written as a device-independent bitmap
#[cfg(all(windows, feature = "windows-clipboard"))]
#[derive(Debug, Default, Clone, Copy)]
pub struct WindowsClipboard;

#[cfg(all(windows, feature = "windows-clipboard"))]
#[async_trait]
impl ClipboardSink for WindowsClipboard {
    async fn write_image(&self, image: &RgbaImage) -> Result<()> {
        let mut bmp = Vec::new();
        DynamicImage::ImageRgba8(image.clone())
            .write_to(&mut Cursor::new(&mut bmp), ImageFormat::Bmp)?;

        tokio::task::spawn_blocking(move || {
            clipboard_win::set_clipboard(clipboard_win::formats::Bitmap, &bmp)
                .map_err(|e| RmbgError::ClipboardWriteFailed(e.to_string()))
        })
        .await
        .map_err(|e| RmbgError::ClipboardWriteFailed(e.to_string()))?
    }
}

/// Writes the clipboard image as `image.png` into a directory
///
/// Used on hosts without a native clipboard target.
#[derive(Debug, Clone)]
pub struct FileClipboard {
    dir: PathBuf,
}

impl FileClipboard {
    pub fn new<P: Into<PathBuf>>(dir: P) -> Self {
        Self { dir: dir.into() }
    }
}

#[async_trait]
impl ClipboardSink for FileClipboard {
    async fn write_image(&self, image: &RgbaImage) -> Result<()> {
        let path = self.dir.join(RESULT_FILE_NAME);
        let image = image.clone();
        tokio::task::spawn_blocking(move || image.save_with_format(&path, ImageFormat::Png))
            .await
            .map_err(|e| RmbgError::ClipboardWriteFailed(e.to_string()))?
            .map_err(|e| RmbgError::ClipboardWriteFailed(e.to_string()))
    }
}
