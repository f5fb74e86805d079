//! Provider chain behavior seen through the orchestrator
//!
//! Retries, timeouts, malformed answers and cancellation while a chain is
//! running. Time is paused so backoff and timeouts resolve instantly.

mod common;

use common::{
    config_with, detection_provider, orchestrator, removal_provider, square, Behavior,
    MockTransport, RecordingReporter,
};
use retouch::{
    NoOpProgressReporter, OperationRequest, OrchestratorConfig, PixelBuffer, Point,
    ProgressStage, ResultSource,
};
use std::sync::Arc;
use std::time::Duration;

#[tokio::test(start_paused = true)]
async fn test_timeouts_then_second_provider_succeeds() {
    let transport = Arc::new(
        MockTransport::new()
            .with("slow", Behavior::Hang)
            .with("fast", Behavior::Image([9, 8, 7, 255])),
    );
    let orchestrator = orchestrator(
        config_with(vec![removal_provider("slow"), removal_provider("fast")]),
        transport.clone(),
    );
    let pixels = PixelBuffer::filled(16, 16, [0, 0, 0, 255]);

    let result = orchestrator
        .submit_and_wait(
            OperationRequest::remove(pixels, square(2, 2, 8, 8)),
            Arc::new(NoOpProgressReporter),
        )
        .await;

    assert!(result.success, "{:?}", result.failure);
    assert_eq!(result.source, Some(ResultSource::Provider("fast".to_string())));
    assert_eq!(transport.calls("slow"), 3);
    assert_eq!(transport.calls("fast"), 1);
    assert_eq!(
        result.pixels().unwrap(),
        &PixelBuffer::filled(16, 16, [9, 8, 7, 255])
    );
}

#[tokio::test(start_paused = true)]
async fn test_cancel_during_backoff_never_contacts_next_provider() {
    let transport = Arc::new(
        MockTransport::new()
            .with("first", Behavior::Fail)
            .with("next", Behavior::Image([1, 1, 1, 255])),
    );
    let config = OrchestratorConfig::builder()
        .provider(removal_provider("first"))
        .provider(removal_provider("next"))
        .backoff_unit(Duration::from_secs(1))
        .build()
        .unwrap();
    let orchestrator = orchestrator(config, transport.clone());
    let reporter = Arc::new(RecordingReporter::default());

    let submission = orchestrator.submit(
        OperationRequest::remove(PixelBuffer::filled(8, 8, [0, 0, 0, 255]), square(1, 1, 5, 5)),
        reporter.clone(),
    );
    // Attempts fail at t=0s and t=1s; the second backoff runs until t=3s
    tokio::time::sleep(Duration::from_millis(1500)).await;
    assert!(submission.cancel());

    let result = submission.wait().await;
    assert!(result.is_cancelled());
    assert_eq!(transport.calls("first"), 2);
    assert_eq!(transport.calls("next"), 0);
    assert_eq!(reporter.error_count(), 1);
    assert_eq!(reporter.completion_count(), 0);
    assert!(!reporter.stages().contains(&ProgressStage::Complete));
}

#[tokio::test(start_paused = true)]
async fn test_malformed_response_is_retried_before_moving_on() {
    let transport = Arc::new(
        MockTransport::new()
            .with("broken", Behavior::Json(serde_json::json!({"status": "queued"})))
            .with("good", Behavior::Image([5, 5, 5, 255])),
    );
    let orchestrator = orchestrator(
        config_with(vec![removal_provider("broken"), removal_provider("good")]),
        transport.clone(),
    );

    let result = orchestrator
        .submit_and_wait(
            OperationRequest::remove(PixelBuffer::filled(8, 8, [0, 0, 0, 255]), square(0, 0, 4, 4)),
            Arc::new(NoOpProgressReporter),
        )
        .await;

    assert!(result.success);
    assert_eq!(result.source, Some(ResultSource::Provider("good".to_string())));
    assert_eq!(transport.calls("broken"), 3);
    assert_eq!(transport.calls("good"), 1);
}

#[tokio::test(start_paused = true)]
async fn test_exhausted_chain_falls_back_to_local_fill() {
    let transport = Arc::new(
        MockTransport::new()
            .with("down", Behavior::Fail)
            .with("garbled", Behavior::Json(serde_json::json!(["not", "an", "image"]))),
    );
    let orchestrator = orchestrator(
        config_with(vec![removal_provider("down"), removal_provider("garbled")]),
        transport.clone(),
    );
    let reporter = Arc::new(RecordingReporter::default());
    let color = [40, 90, 160, 255];
    let mut pixels = PixelBuffer::filled(10, 10, color);
    pixels.set_pixel(5, 5, [255, 255, 255, 255]);

    let result = orchestrator
        .submit_and_wait(OperationRequest::remove(pixels, square(4, 4, 7, 7)), reporter.clone())
        .await;

    assert!(result.success);
    assert_eq!(result.source, Some(ResultSource::Local));
    assert_eq!(result.pixels().unwrap(), &PixelBuffer::filled(10, 10, color));
    assert_eq!(transport.calls("down"), 3);
    assert_eq!(transport.calls("garbled"), 3);

    let stages = reporter.stages();
    assert!(stages.contains(&ProgressStage::ContactingProvider));
    assert!(stages.contains(&ProgressStage::FallingBack));
    assert!(stages.contains(&ProgressStage::LocalProcessing));
}

#[tokio::test(start_paused = true)]
async fn test_detection_provider_result_is_used() {
    let transport = Arc::new(MockTransport::new().with(
        "segmenter",
        Behavior::Json(serde_json::json!({
            "predictions": [
                {"label": "cup", "score": 0.91, "box": {"x": 4, "y": 6, "width": 10, "height": 8}}
            ]
        })),
    ));
    let orchestrator = orchestrator(config_with(vec![detection_provider("segmenter")]), transport.clone());

    let result = orchestrator
        .submit_and_wait(
            OperationRequest::detect(PixelBuffer::filled(40, 30, [0, 0, 0, 255]), Point::new(8, 9)),
            Arc::new(NoOpProgressReporter),
        )
        .await;

    assert!(result.success);
    assert_eq!(result.source, Some(ResultSource::Provider("segmenter".to_string())));
    let objects = result.detections().unwrap();
    assert_eq!(objects.len(), 1);
    assert_eq!(objects[0].label, "cup");
    assert_eq!(objects[0].bounds, retouch::BoundingBox::new(4, 6, 10, 8));
    assert_eq!(transport.calls("segmenter"), 1);
}

#[tokio::test(start_paused = true)]
async fn test_removal_chain_is_not_used_for_detection() {
    let transport = Arc::new(MockTransport::new().with("inpaint", Behavior::Image([0, 0, 0, 255])));
    let orchestrator = orchestrator(config_with(vec![removal_provider("inpaint")]), transport.clone());

    let result = orchestrator
        .submit_and_wait(
            OperationRequest::detect(PixelBuffer::filled(20, 20, [200, 10, 10, 255]), Point::new(3, 3)),
            Arc::new(NoOpProgressReporter),
        )
        .await;

    assert!(result.success);
    assert_eq!(result.source, Some(ResultSource::Local));
    assert_eq!(transport.total_calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_detection_chain_failure_reports_each_provider() {
    let transport = Arc::new(MockTransport::new());
    let orchestrator = orchestrator(
        config_with(vec![detection_provider("a"), detection_provider("b")]),
        transport.clone(),
    );
    let reporter = Arc::new(RecordingReporter::default());

    let result = orchestrator
        .submit_and_wait(
            OperationRequest::detect(PixelBuffer::filled(20, 20, [0, 0, 0, 255]), Point::new(1, 1)),
            reporter.clone(),
        )
        .await;

    assert!(result.success);
    assert_eq!(transport.calls("a"), 3);
    assert_eq!(transport.calls("b"), 3);
    let messages: Vec<String> = reporter.events().into_iter().map(|e| e.message).collect();
    assert!(messages.iter().any(|m| m.contains("Contacting a (1/2)")));
    assert!(messages.iter().any(|m| m.contains("Contacting b (2/2)")));
    assert_eq!(result.source, Some(ResultSource::Local));
}
