//! Model downloading from `HuggingFace` repositories
//!
//! Configuration files are fetched quietly; the weight file is streamed with
//! byte-level progress. Files land in a staging directory inside the cache and
//! are moved into place only after every file arrived.

use crate::cache::{ModelCache, CONFIG_FILES};
use crate::config::PipelineConfig;
use crate::error::{Result, RmbgError};
use crate::types::LoadProgress;
use futures_util::stream::TryStreamExt;
#[cfg(feature = "cli")]
use indicatif::{ProgressBar, ProgressStyle};
use reqwest::Client;
use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Path, PathBuf};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::watch;
use tokio_util::io::StreamReader;

/// Header carrying the SHA256 of LFS-hosted files
const LINKED_ETAG_HEADER: &str = "x-linked-etag";

const READ_BUFFER_SIZE: usize = 8192;

/// Receives byte-level progress of the weight file transfer
pub trait ProgressSink: Send + Sync {
    fn report(&self, progress: LoadProgress);
}

impl ProgressSink for watch::Sender<LoadProgress> {
    fn report(&self, progress: LoadProgress) {
        self.send_replace(progress);
    }
}

/// Sink that discards progress
#[derive(Debug, Default, Clone, Copy)]
pub struct NoProgress;

impl ProgressSink for NoProgress {
    fn report(&self, _progress: LoadProgress) {}
}

/// Clamps observations so the reported value never decreases
///
/// The byte count is `max(previous, computed)`. The total is fixed by the first
/// observation that carries one, which keeps the derived fraction monotonic too.
#[derive(Debug, Default, Clone, Copy)]
pub struct MonotonicProgress {
    last: Option<LoadProgress>,
}

impl MonotonicProgress {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold a computed observation into the reported value
    pub fn observe(&mut self, computed: LoadProgress) -> LoadProgress {
        let reported = match self.last {
            Some(previous) => LoadProgress::new(
                previous.downloaded_bytes.max(computed.downloaded_bytes),
                previous.total_bytes.or(computed.total_bytes),
            ),
            None => computed,
        };
        self.last = Some(reported);
        reported
    }

    #[must_use]
    pub fn last(&self) -> Option<LoadProgress> {
        self.last
    }
}

/// Progress bar abstraction that works with and without CLI features
#[derive(Debug)]
pub enum ProgressIndicator {
    #[cfg(feature = "cli")]
    Indicatif(ProgressBar),
    NoOp,
}

impl ProgressIndicator {
    /// Create a byte progress bar when the CLI is compiled in
    #[must_use]
    pub fn for_download() -> Self {
        #[cfg(feature = "cli")]
        {
            let pb = ProgressBar::new(0);
            if let Ok(style) = ProgressStyle::default_bar().template(
                "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {bytes}/{total_bytes} {msg}",
            ) {
                pb.set_style(style.progress_chars("#>-"));
            }
            Self::Indicatif(pb)
        }
        #[cfg(not(feature = "cli"))]
        {
            Self::NoOp
        }
    }

    pub fn set_message(&self, msg: String) {
        match self {
            #[cfg(feature = "cli")]
            Self::Indicatif(pb) => pb.set_message(msg),
            Self::NoOp => {},
        }
    }

    pub fn finish_with_message(&self, msg: String) {
        match self {
            #[cfg(feature = "cli")]
            Self::Indicatif(pb) => pb.finish_with_message(msg),
            Self::NoOp => {},
        }
    }
}

impl ProgressSink for ProgressIndicator {
    fn report(&self, progress: LoadProgress) {
        match self {
            #[cfg(feature = "cli")]
            Self::Indicatif(pb) => {
                if let Some(total) = progress.total_bytes {
                    pb.set_length(total);
                    pb.set_position(progress.downloaded_bytes);
                } else {
                    // Unknown length: indeterminate spinner with a byte counter
                    pb.set_message(format!(
                        "Downloaded {:.1} MB",
                        progress.downloaded_bytes as f64 / 1_048_576.0
                    ));
                    pb.tick();
                }
            },
            Self::NoOp => {
                let _ = progress;
            },
        }
    }
}

/// Copy `reader` into `writer`, reporting monotonic progress after every chunk
///
/// # Errors
/// - Read or write failures
pub async fn copy_with_progress<R, W>(
    reader: &mut R,
    writer: &mut W,
    total_bytes: Option<u64>,
    progress: &mut MonotonicProgress,
    sink: &dyn ProgressSink,
) -> std::io::Result<u64>
where
    R: AsyncRead + Unpin + ?Sized,
    W: AsyncWrite + Unpin + ?Sized,
{
    let mut downloaded = 0u64;
    let mut buffer = vec![0; READ_BUFFER_SIZE];

    sink.report(progress.observe(LoadProgress::new(0, total_bytes)));

    loop {
        let bytes_read = reader.read(&mut buffer).await?;
        if bytes_read == 0 {
            break;
        }

        writer
            .write_all(buffer.get(..bytes_read).unwrap_or(&[]))
            .await?;
        downloaded += bytes_read as u64;

        sink.report(progress.observe(LoadProgress::new(downloaded, total_bytes)));
    }

    writer.flush().await?;
    Ok(downloaded)
}

/// Fetches model repositories into the [`ModelCache`]
#[derive(Debug)]
pub struct ModelDownloader {
    client: Client,
    cache: ModelCache,
}

impl ModelDownloader {
    /// Create a downloader for the given configuration
    ///
    /// # Errors
    /// - Failed to create the HTTP client
    /// - Failed to initialize the model cache
    pub fn new(config: &PipelineConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(config.download_timeout_secs))
            .build()
            .map_err(|e| RmbgError::network_error("Failed to create HTTP client", e))?;

        let cache = ModelCache::from_override(config.cache_dir.as_deref())?;

        Ok(Self { client, cache })
    }

    #[must_use]
    pub fn cache(&self) -> &ModelCache {
        &self.cache
    }

    /// Make sure the configured model is cached, downloading it when needed
    ///
    /// Returns the model directory. A model that is already cached reports one
    /// completed progress event for its weight file.
    ///
    /// # Errors
    /// - Network errors or non-success HTTP status
    /// - File system errors while staging or moving files
    /// - Checksum mismatch on the weight file
    #[tracing::instrument(skip(self, config, sink), fields(model_id = %config.model_id, variant = %config.variant))]
    pub async fn ensure_model(
        &self,
        config: &PipelineConfig,
        sink: &dyn ProgressSink,
    ) -> Result<PathBuf> {
        let model_id = config.model_id.as_str();
        let weight_file = config.weight_file();
        let final_dir = self.cache.get_model_path(model_id);

        if self.cache.is_model_cached(model_id, &weight_file) {
            log::info!("Model already cached: {}", final_dir.display());
            let size = fs::metadata(final_dir.join(&weight_file))
                .map_err(|e| RmbgError::file_io_error("stat cached weights", &final_dir, &e))?
                .len();
            sink.report(LoadProgress::new(size, Some(size)));
            return Ok(final_dir);
        }

        log::info!("Downloading model {} ({})", model_id, config.variant);
        let staging_dir = self.create_staging_dir(model_id)?;

        match self
            .download_model_files(config, &weight_file, &staging_dir, sink)
            .await
        {
            Ok(()) => {
                if final_dir.exists() {
                    fs::remove_dir_all(&final_dir).map_err(|e| {
                        RmbgError::file_io_error("remove existing model directory", &final_dir, &e)
                    })?;
                }
                fs::rename(&staging_dir, &final_dir).map_err(|e| {
                    RmbgError::file_io_error("move downloaded model to cache", &final_dir, &e)
                })?;

                log::info!("Successfully downloaded model to {}", final_dir.display());
                Ok(final_dir)
            },
            Err(e) => {
                if staging_dir.exists() {
                    if let Err(cleanup_err) = fs::remove_dir_all(&staging_dir) {
                        log::warn!("Failed to cleanup staging directory: {}", cleanup_err);
                    }
                }
                Err(e)
            },
        }
    }

    /// Staging lives next to the final directory so the move is a rename
    fn create_staging_dir(&self, model_id: &str) -> Result<PathBuf> {
        let staging_dir = self.cache.get_current_cache_dir().join(format!(
            ".download-{}",
            ModelCache::model_dir_name(model_id)
        ));

        if staging_dir.exists() {
            fs::remove_dir_all(&staging_dir).map_err(|e| {
                RmbgError::file_io_error("remove stale staging directory", &staging_dir, &e)
            })?;
        }
        fs::create_dir_all(&staging_dir).map_err(|e| {
            RmbgError::file_io_error("create staging directory", &staging_dir, &e)
        })?;

        Ok(staging_dir)
    }

    async fn download_model_files(
        &self,
        config: &PipelineConfig,
        weight_file: &str,
        download_dir: &Path,
        sink: &dyn ProgressSink,
    ) -> Result<()> {
        let raw_base = format!("{}/resolve/main/", config.model_url());

        for file_name in CONFIG_FILES {
            let file_url = format!("{raw_base}{file_name}");
            self.download_file(&file_url, &download_dir.join(file_name), None)
                .await?;
        }

        let file_url = format!("{raw_base}{weight_file}");
        self.download_file(&file_url, &download_dir.join(weight_file), Some(sink))
            .await
    }

    /// Download a single file; progress is only surfaced when `sink` is given
    async fn download_file(
        &self,
        url: &str,
        local_path: &Path,
        sink: Option<&dyn ProgressSink>,
    ) -> Result<()> {
        log::debug!("Downloading: {} -> {}", url, local_path.display());

        if let Some(parent) = local_path.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| RmbgError::file_io_error("create directory", parent, &e))?;
        }

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| RmbgError::network_error(format!("Failed to download {url}"), e))?;

        if !response.status().is_success() {
            return Err(RmbgError::network_error(
                format!("Failed to download {url}"),
                format!("HTTP {}", response.status()),
            ));
        }

        let total_size = response.content_length();
        let expected_hash = response
            .headers()
            .get(LINKED_ETAG_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(|value| value.trim_matches('"').to_ascii_lowercase())
            .filter(|value| is_sha256_hex(value));

        let mut file = tokio::fs::File::create(local_path)
            .await
            .map_err(|e| RmbgError::file_io_error("create file", local_path, &e))?;

        let mut stream = StreamReader::new(
            response
                .bytes_stream()
                .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e)),
        );

        let mut progress = MonotonicProgress::new();
        let downloaded = copy_with_progress(
            &mut stream,
            &mut file,
            total_size,
            &mut progress,
            sink.unwrap_or(&NoProgress),
        )
        .await
        .map_err(|e| RmbgError::network_error(format!("Failed to stream {url}"), e))?;

        log::debug!("Downloaded {} bytes to {}", downloaded, local_path.display());

        if let Some(expected) = expected_hash.as_deref() {
            if !verify_file_integrity(local_path, Some(expected))? {
                return Err(RmbgError::network_error(
                    format!("Checksum mismatch for {url}"),
                    format!("expected sha256 {expected}"),
                ));
            }
        }

        Ok(())
    }
}

fn is_sha256_hex(value: &str) -> bool {
    value.len() == 64 && value.bytes().all(|b| b.is_ascii_hexdigit())
}

/// Verify a file against an expected SHA256 digest (hex)
///
/// Returns `true` when no digest is given.
///
/// # Errors
/// - The file cannot be read
pub fn verify_file_integrity(file_path: &Path, expected_hash: Option<&str>) -> Result<bool> {
    let Some(expected) = expected_hash else {
        return Ok(true);
    };

    let contents = fs::read(file_path)
        .map_err(|e| RmbgError::file_io_error("read file for verification", file_path, &e))?;

    let mut hasher = Sha256::new();
    hasher.update(&contents);
    let actual_hash = format!("{:x}", hasher.finalize());

    if actual_hash.eq_ignore_ascii_case(expected) {
        Ok(true)
    } else {
        log::warn!(
            "File integrity check failed for {}: expected {}, got {}",
            file_path.display(),
            expected,
            actual_hash
        );
        Ok(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use tempfile::TempDir;

    #[derive(Default)]
    struct RecordingSink {
        events: Mutex<Vec<LoadProgress>>,
    }

    impl ProgressSink for RecordingSink {
        fn report(&self, progress: LoadProgress) {
            self.events.lock().unwrap().push(progress);
        }
    }

    #[test]
    fn test_monotonic_progress_ignores_regressions() {
        let mut progress = MonotonicProgress::new();
        let observations = [10u64, 40, 25, 40, 90, 60, 100];
        let mut previous = 0;

        for downloaded in observations {
            let reported = progress.observe(LoadProgress::new(downloaded, Some(100)));
            assert!(reported.downloaded_bytes >= previous);
            previous = reported.downloaded_bytes;
        }

        assert_eq!(previous, 100);
        assert_eq!(progress.last().unwrap().fraction(), Some(1.0));
    }

    #[test]
    fn test_monotonic_progress_keeps_first_total() {
        let mut progress = MonotonicProgress::new();
        progress.observe(LoadProgress::new(50, Some(100)));
        let reported = progress.observe(LoadProgress::new(60, Some(1000)));

        assert_eq!(reported.total_bytes, Some(100));
        assert_eq!(reported.fraction(), Some(0.6));
    }

    #[tokio::test]
    async fn test_copy_with_progress_reports_every_chunk() {
        let data = vec![7u8; READ_BUFFER_SIZE * 3 + 17];
        let mut reader: &[u8] = &data;
        let mut writer: Vec<u8> = Vec::new();
        let sink = RecordingSink::default();
        let mut progress = MonotonicProgress::new();

        let copied = copy_with_progress(
            &mut reader,
            &mut writer,
            Some(data.len() as u64),
            &mut progress,
            &sink,
        )
        .await
        .unwrap();

        assert_eq!(copied, data.len() as u64);
        assert_eq!(writer, data);

        let events = sink.events.lock().unwrap();
        assert!(events.len() >= 2);
        assert_eq!(events.first().unwrap().downloaded_bytes, 0);
        assert!(events
            .windows(2)
            .all(|w| w[1].downloaded_bytes >= w[0].downloaded_bytes));
        let last = events.last().unwrap();
        assert_eq!(last.downloaded_bytes, data.len() as u64);
        assert_eq!(last.fraction(), Some(1.0));
    }

    #[tokio::test]
    async fn test_copy_with_unknown_length_is_indeterminate() {
        let data = b"small payload".to_vec();
        let mut reader: &[u8] = &data;
        let mut writer: Vec<u8> = Vec::new();
        let sink = RecordingSink::default();
        let mut progress = MonotonicProgress::new();

        copy_with_progress(&mut reader, &mut writer, None, &mut progress, &sink)
            .await
            .unwrap();

        let events = sink.events.lock().unwrap();
        assert!(events.iter().all(|p| !p.is_determinate()));
        assert_eq!(events.last().unwrap().downloaded_bytes, data.len() as u64);
    }

    #[test]
    fn test_watch_sender_is_a_sink() {
        let (tx, rx) = watch::channel(LoadProgress::default());
        tx.report(LoadProgress::new(5, Some(10)));
        assert_eq!(rx.borrow().downloaded_bytes, 5);
    }

    #[tokio::test]
    async fn test_cached_model_reports_single_completed_event() {
        let temp_dir = TempDir::new().unwrap();
        let config = PipelineConfig::builder()
            .cache_dir(temp_dir.path())
            .build()
            .unwrap();
        let downloader = ModelDownloader::new(&config).unwrap();

        let model_dir = downloader.cache().get_model_path(&config.model_id);
        fs::create_dir_all(model_dir.join("onnx")).unwrap();
        fs::write(model_dir.join("config.json"), "{}").unwrap();
        fs::write(model_dir.join("preprocessor_config.json"), "{}").unwrap();
        fs::write(model_dir.join(config.weight_file()), vec![1u8; 1234]).unwrap();

        let sink = RecordingSink::default();
        let dir = downloader.ensure_model(&config, &sink).await.unwrap();

        assert_eq!(dir, model_dir);
        let events = sink.events.lock().unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0], LoadProgress::new(1234, Some(1234)));
    }

    #[test]
    fn test_verify_file_integrity() {
        let temp_dir = TempDir::new().unwrap();
        let test_file = temp_dir.path().join("weights.onnx");
        fs::write(&test_file, "test content").unwrap();

        let mut hasher = Sha256::new();
        hasher.update(b"test content");
        let expected_hash = format!("{:x}", hasher.finalize());

        assert!(verify_file_integrity(&test_file, None).unwrap());
        assert!(verify_file_integrity(&test_file, Some(&expected_hash)).unwrap());
        assert!(!verify_file_integrity(&test_file, Some(&"0".repeat(64))).unwrap());
        assert!(verify_file_integrity(&temp_dir.path().join("missing"), Some("x")).is_err());
    }

    #[test]
    fn test_is_sha256_hex() {
        assert!(is_sha256_hex(&"a".repeat(64)));
        assert!(!is_sha256_hex("abc"));
        assert!(!is_sha256_hex(&"g".repeat(64)));
    }

    #[test]
    fn test_progress_indicator_no_op() {
        let progress = ProgressIndicator::NoOp;
        progress.set_message("test message".to_string());
        progress.report(LoadProgress::new(50, Some(100)));
        progress.finish_with_message("finished".to_string());
    }
}
