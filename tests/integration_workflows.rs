//! Integration tests for complete detect and remove workflows
//!
//! These run the orchestrator end to end with a scripted transport, so no
//! network access is needed.

mod common;

use common::{config_with, orchestrator, removal_provider, square, Behavior, MockTransport, RecordingReporter};
use retouch::{
    BoundingBox, ChannelProgressReporter, DetectedObject, ImageIOService, NoOpProgressReporter,
    OperationRequest, OrchestratorConfig, PixelBuffer, Point, ProgressStage, ProviderConfig,
    ResultSource, Selection,
};
use std::sync::Arc;
use tempfile::TempDir;

const BLUE: [u8; 4] = [0, 0, 255, 255];
const RED: [u8; 4] = [255, 0, 0, 255];

/// 60x60 blue image with a red 20x20 square at (20, 20)
fn red_square_scene() -> PixelBuffer {
    let mut pixels = PixelBuffer::filled(60, 60, BLUE);
    for y in 20..40 {
        for x in 20..40 {
            pixels.set_pixel(x, y, RED);
        }
    }
    pixels
}

fn local_only() -> OrchestratorConfig {
    OrchestratorConfig::default()
}

#[tokio::test]
async fn test_local_detection_of_uniform_region() {
    let orchestrator = orchestrator(local_only(), Arc::new(MockTransport::new()));
    let pixels = PixelBuffer::filled(100, 100, RED);

    let result = orchestrator
        .submit_and_wait(
            OperationRequest::detect(pixels, Point::new(50, 50)),
            Arc::new(NoOpProgressReporter),
        )
        .await;

    assert!(result.success, "{:?}", result.failure);
    assert_eq!(result.source, Some(ResultSource::Local));
    let objects = result.detections().unwrap();
    assert_eq!(objects.len(), 1);
    assert_eq!(objects[0].label, "Detected Region");
    assert!((objects[0].confidence - 0.7).abs() < f32::EPSILON);
    assert_eq!(objects[0].bounds, BoundingBox::new(0, 0, 100, 100));
    assert_eq!(objects[0].mask.as_ref().unwrap().pixel_count(), 10_000);
}

#[tokio::test]
async fn test_local_fill_of_constant_surroundings() {
    let orchestrator = orchestrator(local_only(), Arc::new(MockTransport::new()));
    let color = [37, 142, 201, 255];
    let mut pixels = PixelBuffer::filled(10, 10, color);
    // 3x3 mask centred on (5, 5)
    for y in 4..7 {
        for x in 4..7 {
            pixels.set_pixel(x, y, [0, 0, 0, 0]);
        }
    }

    let result = orchestrator
        .submit_and_wait(
            OperationRequest::remove(pixels, square(4, 4, 7, 7)),
            Arc::new(NoOpProgressReporter),
        )
        .await;

    assert!(result.success);
    assert_eq!(result.into_pixels().unwrap(), PixelBuffer::filled(10, 10, color));
}

#[tokio::test]
async fn test_progress_is_monotonic_and_ends_at_100() {
    let transport = Arc::new(MockTransport::new());
    let orchestrator = orchestrator(config_with(vec![removal_provider("down")]), transport);
    let reporter = Arc::new(RecordingReporter::default());

    let result = orchestrator
        .submit_and_wait(
            OperationRequest::remove(red_square_scene(), square(18, 18, 42, 42)),
            reporter.clone(),
        )
        .await;
    assert!(result.success);

    let progress = reporter.progress();
    assert!(progress.windows(2).all(|w| w[0] <= w[1]), "{progress:?}");
    assert_eq!(progress.last(), Some(&100));

    let stages = reporter.stages();
    assert_eq!(stages.first(), Some(&ProgressStage::Initializing));
    assert_eq!(stages.last(), Some(&ProgressStage::Complete));
    for stage in [
        ProgressStage::Preparing,
        ProgressStage::ContactingProvider,
        ProgressStage::FallingBack,
        ProgressStage::LocalProcessing,
        ProgressStage::Finalizing,
    ] {
        assert!(stages.contains(&stage), "missing {stage}");
    }
    assert_eq!(stages.iter().filter(|s| **s == ProgressStage::Complete).count(), 1);
    assert_eq!(reporter.completion_count(), 1);
    assert_eq!(reporter.error_count(), 0);

    let local: Vec<_> = reporter
        .events()
        .into_iter()
        .filter(|e| e.stage == ProgressStage::LocalProcessing)
        .collect();
    assert!(local.iter().all(|e| (50..=90).contains(&e.progress)));
    assert!(local.iter().all(|e| e.eta_ms.is_some()));
}

#[tokio::test]
async fn test_detect_then_remove_with_hint() {
    let orchestrator = orchestrator(local_only(), Arc::new(MockTransport::new()));

    let detection = orchestrator
        .submit_and_wait(
            OperationRequest::detect(red_square_scene(), Point::new(30, 30)),
            Arc::new(NoOpProgressReporter),
        )
        .await;
    let object: DetectedObject = detection.detections().unwrap()[0].clone();
    assert_eq!(object.bounds, BoundingBox::new(20, 20, 20, 20));

    let removal = OperationRequest {
        kind: retouch::OperationKind::Removal,
        pixels: red_square_scene(),
        selection: Selection::Point(Point::new(30, 30)),
        hint: None,
    }
    .with_hint(object);
    let result = orchestrator
        .submit_and_wait(removal, Arc::new(NoOpProgressReporter))
        .await;

    assert!(result.success, "{:?}", result.failure);
    let edited = result.pixels().unwrap();
    // Border pixels of the mask only see blue neighbors
    assert_eq!(edited.pixel(20, 20), Some(BLUE));
    assert_eq!(edited.pixel(39, 39), Some(BLUE));
    assert_eq!(edited.pixel(10, 10), Some(BLUE));
    // Beyond the fill radius there is nothing to sample
    assert_eq!(edited.pixel(30, 30), Some(RED));
}

#[tokio::test]
async fn test_provider_removal_keeps_input_dimensions() {
    let transport = Arc::new(MockTransport::new().with("inpaint", Behavior::Image([3, 3, 3, 255])));
    let mut provider = removal_provider("inpaint");
    provider.input.max_dimension = Some(32);
    let orchestrator = orchestrator(config_with(vec![provider]), transport.clone());

    let result = orchestrator
        .submit_and_wait(
            OperationRequest::remove(red_square_scene(), square(20, 20, 40, 40)),
            Arc::new(NoOpProgressReporter),
        )
        .await;

    assert!(result.success);
    assert_eq!(result.pixels().unwrap().dimensions(), (60, 60));
    assert_eq!(transport.calls("inpaint"), 1);
}

#[tokio::test]
async fn test_concurrent_operations_are_independent() {
    let orchestrator = orchestrator(local_only(), Arc::new(MockTransport::new()));
    let (reporter, mut events) = ChannelProgressReporter::new();
    let reporter = Arc::new(reporter);

    let first = orchestrator.submit(
        OperationRequest::detect(red_square_scene(), Point::new(30, 30)),
        reporter.clone(),
    );
    let second = orchestrator.submit(
        OperationRequest::remove(red_square_scene(), square(0, 0, 10, 10)),
        reporter.clone(),
    );
    let (first_id, second_id) = (first.id(), second.id());
    assert_ne!(first_id, second_id);
    assert_eq!(orchestrator.registry().active_count(), 2);

    let (a, b) = futures::future::join(first.wait(), second.wait()).await;
    assert!(a.success && b.success);
    assert_eq!(a.id, first_id);
    assert_eq!(b.id, second_id);
    assert!(orchestrator.registry().is_empty());

    drop(reporter);
    let mut finished = Vec::new();
    while let Some(event) = events.recv().await {
        if event.stage == ProgressStage::Complete {
            finished.push(event.operation_id);
        }
    }
    finished.sort();
    let mut expected = vec![first_id, second_id];
    expected.sort();
    assert_eq!(finished, expected);
}

#[tokio::test]
async fn test_file_round_trip_workflow() {
    let temp = TempDir::new().unwrap();
    let input = temp.path().join("scene.png");
    let output = temp.path().join("out").join("scene-retouched.png");
    ImageIOService::save_pixels(&red_square_scene(), &input).unwrap();

    let orchestrator = orchestrator(local_only(), Arc::new(MockTransport::new()));
    let pixels = ImageIOService::load_pixels(&input).unwrap();
    let result = orchestrator
        .submit_and_wait(
            OperationRequest::remove(pixels, square(20, 20, 40, 40)),
            Arc::new(NoOpProgressReporter),
        )
        .await;
    ImageIOService::save_pixels(result.pixels().unwrap(), &output).unwrap();

    let reloaded = ImageIOService::load_pixels(&output).unwrap();
    assert_eq!(reloaded.dimensions(), (60, 60));
    assert_eq!(reloaded.pixel(20, 20), Some(BLUE));
}

#[test]
fn test_provider_config_file_round_trip() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("providers.json");
    let config = config_with(vec![removal_provider("inpaint"), common::detection_provider("sam")]);
    std::fs::write(&path, serde_json::to_string_pretty(&config.providers).unwrap()).unwrap();

    let loaded = ProviderConfig::from_file(&path).unwrap();
    assert_eq!(loaded, config.providers);
    assert_eq!(loaded.removal[0].name, "inpaint");
    assert_eq!(loaded.detection[0].name, "sam");
}
