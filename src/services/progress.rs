//! Progress reporting service
//!
//! Separates progress reporting from the pipeline so frontends can render batch
//! progress their own way.

use crate::error::RmbgError;
use crate::pipeline::BatchSummary;
use crate::types::{ImageId, PipelineState, ResultImage};

/// Observer of batch pipeline progress
///
/// Every method has an empty default so reporters implement only what they render.
pub trait ProgressReporter: Send + Sync {
    /// The pipeline changed state
    fn report_state(&self, state: PipelineState) {
        let _ = state;
    }

    /// A run started over `total` images
    fn report_started(&self, total: usize) {
        let _ = total;
    }

    /// Image `index` of the run produced a result
    fn report_result(&self, index: usize, result: &ResultImage) {
        let _ = (index, result);
    }

    /// Image `index` was skipped because of an item-scoped error
    fn report_skipped(&self, index: usize, image_id: ImageId, error: &RmbgError) {
        let _ = (index, image_id, error);
    }

    /// The run finished
    fn report_finished(&self, summary: &BatchSummary) {
        let _ = summary;
    }
}

/// No-op progress reporter that discards all progress updates
#[derive(Debug, Default, Clone, Copy)]
pub struct NoOpProgressReporter;

impl ProgressReporter for NoOpProgressReporter {}

/// Reporter that logs progress through the `log` facade
#[derive(Debug, Default)]
pub struct ConsoleProgressReporter {
    verbose: bool,
}

impl ConsoleProgressReporter {
    #[must_use]
    pub fn new(verbose: bool) -> Self {
        Self { verbose }
    }
}

impl ProgressReporter for ConsoleProgressReporter {
    fn report_state(&self, state: PipelineState) {
        if self.verbose {
            log::debug!("Pipeline state: {}", state);
        }
    }

    fn report_started(&self, total: usize) {
        log::info!("Processing {} image(s)", total);
    }

    fn report_result(&self, index: usize, result: &ResultImage) {
        let (width, height) = result.dimensions();
        if self.verbose {
            log::info!(
                "[{}] image {} done ({}x{})",
                index + 1,
                result.id(),
                width,
                height
            );
        } else {
            log::info!("[{}] done", index + 1);
        }
    }

    fn report_skipped(&self, index: usize, image_id: ImageId, error: &RmbgError) {
        log::warn!("[{}] skipped image {}: {}", index + 1, image_id, error);
    }

    fn report_finished(&self, summary: &BatchSummary) {
        log::info!(
            "Batch complete: {}/{} succeeded, {} skipped in {:.2}s",
            summary.succeeded,
            summary.total,
            summary.skipped,
            summary.elapsed.as_secs_f64()
        );
    }
}
