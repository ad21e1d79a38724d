//! End-to-end batch processing through the public API
//!
//! A deterministic backend derives each mask from the image's red channel, so every
//! result can be traced back to the input it was computed from.

mod common;

use common::{assets_with, solid, RedChannelBackend};
use futures::StreamExt;
use rmbg::{
    BatchPipeline, ImageSource, PipelineConfig, PipelineEvent, PipelineState, ProgressReporter,
    ResultImage, RmbgError,
};
use std::sync::{Arc, Mutex};
use std::time::Duration;

fn assert_close(actual: u8, expected: u8) {
    assert!(
        actual.abs_diff(expected) <= 1,
        "expected about {expected}, got {actual}"
    );
}

#[derive(Default)]
struct RecordingReporter {
    completed: Mutex<Vec<usize>>,
    skipped: Mutex<Vec<usize>>,
    states: Mutex<Vec<PipelineState>>,
}

impl ProgressReporter for RecordingReporter {
    fn report_state(&self, state: PipelineState) {
        self.states.lock().unwrap().push(state);
    }

    fn report_result(&self, index: usize, _result: &ResultImage) {
        self.completed.lock().unwrap().push(index);
    }

    fn report_skipped(&self, index: usize, _image_id: rmbg::ImageId, _error: &RmbgError) {
        self.skipped.lock().unwrap().push(index);
    }
}

#[tokio::test]
async fn test_results_correspond_to_their_inputs() {
    let assets = assets_with(RedChannelBackend::new(), PipelineConfig::default());
    let pipeline = BatchPipeline::new();
    let reds = [30u8, 120, 250, 5];
    let ids = pipeline.add_images(reds.iter().enumerate().map(|(i, &r)| solid(4 + i as u32, 3, r)));

    let reporter = RecordingReporter::default();
    let summary = pipeline.run(&assets, &reporter).await.unwrap();

    assert_eq!(summary.succeeded, 4);
    assert_eq!(*reporter.completed.lock().unwrap(), vec![0, 1, 2, 3]);
    assert_eq!(
        *reporter.states.lock().unwrap(),
        vec![PipelineState::Processing, PipelineState::Complete]
    );

    for (i, slot) in pipeline.results().into_iter().enumerate() {
        let result = slot.expect("every image succeeds");
        assert_eq!(result.id(), ids[i]);
        assert_eq!(result.dimensions(), (4 + i as u32, 3));

        let pixel = result.image().get_pixel(1, 1);
        assert_eq!(&pixel.0[..3], &[reds[i], 40, 200]);
        assert_close(pixel.0[3], reds[i]);
    }
}

#[tokio::test]
async fn test_surface_failure_skips_only_that_item() {
    let config = PipelineConfig::builder()
        .max_surface_pixels(100)
        .build()
        .unwrap();
    let assets = assets_with(RedChannelBackend::new(), config);

    let pipeline = BatchPipeline::new();
    pipeline.add_image(solid(5, 5, 10));
    pipeline.add_image(solid(20, 20, 20));
    pipeline.add_image(solid(8, 8, 30));

    let reporter = RecordingReporter::default();
    let summary = pipeline.run(&assets, &reporter).await.unwrap();

    assert_eq!((summary.succeeded, summary.skipped), (2, 1));
    assert_eq!(*reporter.skipped.lock().unwrap(), vec![1]);

    let results = pipeline.results();
    assert!(results[1].is_none());
    assert_close(results[2].as_ref().unwrap().image().get_pixel(0, 0).0[3], 30);
    assert!(pipeline.export_ready());
}

#[tokio::test]
async fn test_inference_and_decode_failures_do_not_abort() {
    let assets = assets_with(
        RedChannelBackend::new().failing_for_red(77),
        PipelineConfig::default(),
    );

    let pipeline = BatchPipeline::new();
    pipeline.add_image(solid(3, 3, 77));
    pipeline.add_image(ImageSource::from_bytes(b"not an image".to_vec()));
    pipeline.add_image(solid(3, 3, 78));

    let summary = pipeline.run_silent(&assets).await.unwrap();
    assert_eq!((summary.succeeded, summary.skipped), (1, 2));

    let present: Vec<bool> = pipeline.results().iter().map(Option::is_some).collect();
    assert_eq!(present, [false, false, true]);
    assert_eq!(pipeline.state(), PipelineState::Complete);
}

#[tokio::test]
async fn test_export_ready_even_without_results() {
    let assets = assets_with(
        RedChannelBackend::new().failing_for_red(1),
        PipelineConfig::default(),
    );
    let pipeline = BatchPipeline::new();
    pipeline.add_image(solid(2, 2, 1));

    let summary = pipeline.run_silent(&assets).await.unwrap();
    assert_eq!(summary.succeeded, 0);
    assert!(pipeline.export_ready());
}

#[tokio::test]
async fn test_start_is_rejected_while_processing() {
    let assets = Arc::new(assets_with(
        RedChannelBackend::new().with_delay(Duration::from_millis(30)),
        PipelineConfig::default(),
    ));
    let pipeline = BatchPipeline::new();
    pipeline.add_images([solid(2, 2, 10), solid(2, 2, 20), solid(2, 2, 30)]);

    let events = pipeline.run_stream(Arc::clone(&assets)).unwrap();
    assert!(pipeline.is_busy());

    let err = pipeline.run_silent(&assets).await.unwrap_err();
    assert!(matches!(err, RmbgError::BatchInProgress));
    assert!(matches!(
        pipeline.run_stream(Arc::clone(&assets)),
        Err(RmbgError::BatchInProgress)
    ));

    let events: Vec<PipelineEvent> = events.collect().await;
    let completed = events
        .iter()
        .filter(|e| matches!(e, PipelineEvent::ItemCompleted { .. }))
        .count();
    assert_eq!(completed, 3);
    assert_eq!(pipeline.processed_results().len(), 3);
    assert_eq!(pipeline.state(), PipelineState::Complete);
}

#[tokio::test]
async fn test_empty_batch_is_rejected() {
    let assets = assets_with(RedChannelBackend::new(), PipelineConfig::default());
    let pipeline = BatchPipeline::new();

    assert!(matches!(
        pipeline.run_silent(&assets).await,
        Err(RmbgError::EmptyBatch)
    ));

    let id = pipeline.add_image(solid(2, 2, 1));
    pipeline.remove_image(id);
    assert!(matches!(
        pipeline.run_silent(&assets).await,
        Err(RmbgError::EmptyBatch)
    ));
    assert_eq!(pipeline.state(), PipelineState::Idle);
}

#[tokio::test]
async fn test_rerun_after_completion_replaces_results() {
    let assets = assets_with(RedChannelBackend::new(), PipelineConfig::default());
    let pipeline = BatchPipeline::new();
    pipeline.add_image(solid(2, 2, 60));
    pipeline.run_silent(&assets).await.unwrap();

    pipeline.add_image(solid(3, 1, 90));
    let summary = pipeline.run_silent(&assets).await.unwrap();
    assert_eq!(summary.total, 2);

    let results = pipeline.processed_results();
    assert_eq!(results.len(), 2);
    assert_eq!(&results[1].image().get_pixel(0, 0).0[..3], &[90, 40, 200]);
}
