//! Sequential batch processing over the pipeline's input list
//!
//! A run snapshots the input list and processes it strictly in order, one image at
//! a time: decode, predict the mask, composite. Each outcome is reported as soon as
//! it is known. Item-scoped failures skip the item and the run continues.

use crate::assets::MattingAssets;
use crate::compositor::RasterSurface;
use crate::error::{Result, RmbgError};
use crate::export::{ArchiveExporter, ExportEntry};
use crate::services::progress::{NoOpProgressReporter, ProgressReporter};
use crate::types::{ImageId, ImageRecord, ImageSource, PipelineState, ResultImage};
use chrono::{DateTime, Utc};
use futures::Stream;
use instant::Instant;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::Instrument;

/// Outcome counts of a finished run
#[derive(Debug, Clone)]
pub struct BatchSummary {
    pub total: usize,
    pub succeeded: usize,
    pub skipped: usize,
    pub elapsed: Duration,
    pub finished_at: DateTime<Utc>,
}

/// Incremental notification emitted by [`BatchPipeline::run_stream`]
#[derive(Debug, Clone)]
pub enum PipelineEvent {
    Started {
        total: usize,
    },
    ItemCompleted {
        index: usize,
        result: ResultImage,
    },
    ItemSkipped {
        index: usize,
        image_id: ImageId,
        reason: String,
    },
    Finished(BatchSummary),
}

#[derive(Debug, Default)]
struct Inner {
    next_id: u64,
    images: Vec<ImageRecord>,
    results: HashMap<ImageId, ResultImage>,
    state: PipelineState,
    export_ready: bool,
}

impl Inner {
    fn contains(&self, id: ImageId) -> bool {
        self.images.iter().any(|record| record.id == id)
    }
}

/// Batch pipeline holding the input list and the results of the latest run
///
/// Cloning yields another handle to the same pipeline.
#[derive(Debug, Clone, Default)]
pub struct BatchPipeline {
    inner: Arc<Mutex<Inner>>,
}

impl BatchPipeline {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append an image to the input list
    pub fn add_image<S: Into<ImageSource>>(&self, source: S) -> ImageId {
        let mut inner = self.lock();
        inner.next_id += 1;
        let id = ImageId::new(inner.next_id);
        inner.images.push(ImageRecord::new(id, source.into()));
        id
    }

    /// Append several images, preserving their order
    pub fn add_images<I, S>(&self, sources: I) -> Vec<ImageId>
    where
        I: IntoIterator<Item = S>,
        S: Into<ImageSource>,
    {
        sources.into_iter().map(|source| self.add_image(source)).collect()
    }

    /// Remove an image and its result; returns whether it was present
    pub fn remove_image(&self, id: ImageId) -> bool {
        let mut inner = self.lock();
        let before = inner.images.len();
        inner.images.retain(|record| record.id != id);
        inner.results.remove(&id);
        inner.images.len() != before
    }

    /// Remove every image and result and withdraw export availability
    ///
    /// A run already in progress keeps working on its snapshot.
    pub fn clear_all(&self) {
        let mut inner = self.lock();
        inner.images.clear();
        inner.results.clear();
        inner.export_ready = false;
    }

    #[must_use]
    pub fn state(&self) -> PipelineState {
        self.lock().state
    }

    /// Whether a run is in progress
    #[must_use]
    pub fn is_busy(&self) -> bool {
        self.state() == PipelineState::Processing
    }

    #[must_use]
    pub fn export_ready(&self) -> bool {
        self.lock().export_ready
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().images.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().images.is_empty()
    }

    /// Current input list in order
    #[must_use]
    pub fn images(&self) -> Vec<ImageRecord> {
        self.lock().images.clone()
    }

    /// One slot per current input, holding that input's result if it has one
    #[must_use]
    pub fn results(&self) -> Vec<Option<ResultImage>> {
        let inner = self.lock();
        inner
            .images
            .iter()
            .map(|record| inner.results.get(&record.id).cloned())
            .collect()
    }

    /// Produced results only, in input order
    #[must_use]
    pub fn processed_results(&self) -> Vec<ResultImage> {
        self.results().into_iter().flatten().collect()
    }

    /// Process the input list, reporting each outcome to `reporter`
    ///
    /// # Errors
    /// - `BatchInProgress` when another run is active
    /// - `EmptyBatch` when the input list is empty
    pub async fn run(
        &self,
        assets: &MattingAssets,
        reporter: &dyn ProgressReporter,
    ) -> Result<BatchSummary> {
        let run = self.begin()?;
        Ok(self.execute(run, assets, reporter).await)
    }

    /// [`BatchPipeline::run`] without progress reporting
    ///
    /// # Errors
    /// - Same as [`BatchPipeline::run`]
    pub async fn run_silent(&self, assets: &MattingAssets) -> Result<BatchSummary> {
        self.run(assets, &NoOpProgressReporter).await
    }

    /// Process the input list in a background task, yielding events in order
    ///
    /// Must be called from within a Tokio runtime. Dropping the stream does not
    /// cancel the run.
    ///
    /// # Errors
    /// - `BatchInProgress` when another run is active
    /// - `EmptyBatch` when the input list is empty
    pub fn run_stream(
        &self,
        assets: Arc<MattingAssets>,
    ) -> Result<impl Stream<Item = PipelineEvent>> {
        let run = self.begin()?;
        let (tx, rx) = mpsc::unbounded_channel();
        let pipeline = self.clone();

        tokio::spawn(async move {
            let reporter = ChannelReporter { tx };
            pipeline.execute(run, &assets, &reporter).await;
        });

        Ok(UnboundedReceiverStream::new(rx))
    }

    /// Build the archive of the current input list
    ///
    /// # Errors
    /// - `ExportNotReady` before a run has completed
    /// - Archive creation failure
    pub async fn export_archive(&self, exporter: &ArchiveExporter) -> Result<Vec<u8>> {
        let entries = self.export_entries()?;
        exporter.export_archive(&entries).await
    }

    /// Write `images.zip` for the current input list into `dir`
    ///
    /// # Errors
    /// - `ExportNotReady` before a run has completed
    /// - Archive creation or file write failure
    pub async fn save_archive(&self, exporter: &ArchiveExporter, dir: &Path) -> Result<PathBuf> {
        let entries = self.export_entries()?;
        exporter.save_archive(&entries, dir).await
    }

    fn export_entries(&self) -> Result<Vec<ExportEntry>> {
        let inner = self.lock();
        if !inner.export_ready {
            return Err(RmbgError::ExportNotReady);
        }
        Ok(inner
            .images
            .iter()
            .map(|record| {
                ExportEntry::select(inner.results.get(&record.id).cloned(), record.source.clone())
            })
            .collect())
    }

    fn begin(&self) -> Result<ActiveRun> {
        let mut inner = self.lock();
        if inner.state == PipelineState::Processing {
            return Err(RmbgError::BatchInProgress);
        }
        if inner.images.is_empty() {
            return Err(RmbgError::EmptyBatch);
        }

        inner.results.clear();
        inner.export_ready = false;
        inner.state = PipelineState::Processing;

        Ok(ActiveRun {
            inner: Arc::clone(&self.inner),
            snapshot: inner.images.clone(),
            finished: false,
        })
    }

    async fn execute(
        &self,
        mut run: ActiveRun,
        assets: &MattingAssets,
        reporter: &dyn ProgressReporter,
    ) -> BatchSummary {
        let start = Instant::now();
        let total = run.snapshot.len();
        let mut succeeded = 0;

        reporter.report_state(PipelineState::Processing);
        reporter.report_started(total);
        log::info!("Starting batch of {} image(s)", total);

        for (index, record) in run.snapshot.iter().enumerate() {
            let span = tracing::info_span!("process_item", index, image_id = record.id.get());
            match process_item(assets, record).instrument(span).await {
                Ok(result) => {
                    succeeded += 1;
                    self.store_result(result.clone());
                    reporter.report_result(index, &result);
                },
                Err(e) => {
                    log::warn!("Skipping image {} ({}): {}", record.id, record.source.describe(), e);
                    reporter.report_skipped(index, record.id, &e);
                },
            }
        }

        run.complete();
        let summary = BatchSummary {
            total,
            succeeded,
            skipped: total - succeeded,
            elapsed: start.elapsed(),
            finished_at: Utc::now(),
        };

        reporter.report_state(PipelineState::Complete);
        reporter.report_finished(&summary);
        summary
    }

    fn store_result(&self, result: ResultImage) {
        let mut inner = self.lock();
        if inner.contains(result.id()) {
            inner.results.insert(result.id(), result);
        } else {
            log::debug!("Image {} was removed during the run, dropping its result", result.id());
        }
    }
}

async fn process_item(assets: &MattingAssets, record: &ImageRecord) -> Result<ResultImage> {
    let image = record
        .source
        .decode()
        .await
        .map_err(|e| RmbgError::inference_failed(record.id, format!("decode failed: {e}")))?;
    // Oversized inputs never reach the model
    RasterSurface::byte_len(
        image.width(),
        image.height(),
        assets.compositor().max_surface_pixels(),
    )?;
    let image = Arc::new(image);

    let mask = assets.engine().predict(record.id, Arc::clone(&image)).await?;
    assets.compositor().composite(record.id, &image, &mask)
}

/// Exclusive claim on the pipeline for one run
///
/// Returns the pipeline to `Idle` if the run is abandoned before completing.
struct ActiveRun {
    inner: Arc<Mutex<Inner>>,
    snapshot: Vec<ImageRecord>,
    finished: bool,
}

impl ActiveRun {
    fn complete(&mut self) {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        inner.state = PipelineState::Complete;
        inner.export_ready = true;
        self.finished = true;
    }
}

impl Drop for ActiveRun {
    fn drop(&mut self) {
        if !self.finished {
            let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
            inner.state = PipelineState::Idle;
        }
    }
}

struct ChannelReporter {
    tx: mpsc::UnboundedSender<PipelineEvent>,
}

impl ProgressReporter for ChannelReporter {
    fn report_started(&self, total: usize) {
        let _ = self.tx.send(PipelineEvent::Started { total });
    }

    fn report_result(&self, index: usize, result: &ResultImage) {
        let _ = self.tx.send(PipelineEvent::ItemCompleted {
            index,
            result: result.clone(),
        });
    }

    fn report_skipped(&self, index: usize, image_id: ImageId, error: &RmbgError) {
        let _ = self.tx.send(PipelineEvent::ItemSkipped {
            index,
            image_id,
            reason: error.to_string(),
        });
    }

    fn report_finished(&self, summary: &BatchSummary) {
        let _ = self.tx.send(PipelineEvent::Finished(summary.clone()));
    }
}
