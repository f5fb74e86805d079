//! Shared test doubles for the integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use retouch::{
    config::ImageEncoding, MemorySampler, OperationKind, OrchestratorConfig, PixelBuffer,
    ProcessingOrchestrator, ProgressEvent, ProgressReporter, ProgressStage, ProviderDescriptor,
    ProviderRequest, ProviderResponse, ProviderTransport, Result, RetouchError,
};
use retouch::{ImageIOService, OperationFailure, OperationId};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// What a scripted provider does on every call
#[derive(Debug, Clone)]
pub enum Behavior {
    /// Transport error
    Fail,
    /// Never answers within any timeout
    Hang,
    /// Answers with a uniform image of the requested size
    Image([u8; 4]),
    /// Answers with this JSON document
    Json(serde_json::Value),
}

/// Transport whose answers are scripted per provider name
#[derive(Default)]
pub struct MockTransport {
    behaviors: HashMap<String, Behavior>,
    calls: Mutex<HashMap<String, u32>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, provider: &str, behavior: Behavior) -> Self {
        self.behaviors.insert(provider.to_string(), behavior);
        self
    }

    pub fn calls(&self, provider: &str) -> u32 {
        self.calls.lock().unwrap().get(provider).copied().unwrap_or(0)
    }

    pub fn total_calls(&self) -> u32 {
        self.calls.lock().unwrap().values().sum()
    }
}

#[async_trait]
impl ProviderTransport for MockTransport {
    async fn send(
        &self,
        provider: &ProviderDescriptor,
        request: &ProviderRequest,
    ) -> Result<ProviderResponse> {
        *self
            .calls
            .lock()
            .unwrap()
            .entry(provider.name.clone())
            .or_default() += 1;

        match self.behaviors.get(&provider.name).cloned().unwrap_or(Behavior::Fail) {
            Behavior::Fail => Err(RetouchError::transport(&provider.name, "HTTP error 503")),
            Behavior::Hang => {
                tokio::time::sleep(Duration::from_secs(24 * 3600)).await;
                Err(RetouchError::transport(&provider.name, "no answer"))
            },
            Behavior::Image(color) => {
                let pixels = PixelBuffer::filled(request.width, request.height, color);
                let bytes = ImageIOService::encode(&pixels, ImageEncoding::Png)?;
                Ok(ProviderResponse::new(Some("image/png"), bytes))
            },
            Behavior::Json(value) => Ok(ProviderResponse::json(&value)),
        }
    }
}

/// Sampler reporting a settable number of megabytes
pub struct FixedSampler {
    bytes: Arc<Mutex<Option<u64>>>,
}

impl FixedSampler {
    pub fn megabytes(mb: u64) -> (Self, Arc<Mutex<Option<u64>>>) {
        let bytes = Arc::new(Mutex::new(Some(mb * 1024 * 1024)));
        (
            Self {
                bytes: Arc::clone(&bytes),
            },
            bytes,
        )
    }
}

impl MemorySampler for FixedSampler {
    fn sample_bytes(&self) -> Option<u64> {
        *self.bytes.lock().unwrap()
    }
}

/// Reporter keeping every callback for later assertions
#[derive(Default)]
pub struct RecordingReporter {
    pub events: Mutex<Vec<ProgressEvent>>,
    pub completions: Mutex<Vec<OperationId>>,
    pub errors: Mutex<Vec<(ProgressStage, OperationFailure)>>,
}

impl RecordingReporter {
    pub fn events(&self) -> Vec<ProgressEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn stages(&self) -> Vec<ProgressStage> {
        self.events().iter().map(|e| e.stage).collect()
    }

    pub fn progress(&self) -> Vec<u8> {
        self.events().iter().map(|e| e.progress).collect()
    }

    pub fn completion_count(&self) -> usize {
        self.completions.lock().unwrap().len()
    }

    pub fn error_count(&self) -> usize {
        self.errors.lock().unwrap().len()
    }
}

impl ProgressReporter for RecordingReporter {
    fn report_progress(&self, event: ProgressEvent) {
        self.events.lock().unwrap().push(event);
    }

    fn report_completion(&self, operation_id: OperationId, _elapsed_ms: u64) {
        self.completions.lock().unwrap().push(operation_id);
    }

    fn report_error(&self, stage: ProgressStage, failure: &OperationFailure) {
        self.errors.lock().unwrap().push((stage, failure.clone()));
    }
}

/// Removal provider with a short timeout
pub fn removal_provider(name: &str) -> ProviderDescriptor {
    ProviderDescriptor::new(name, format!("http://localhost:9/{name}"), OperationKind::Removal)
        .with_timeout(Duration::from_secs(2))
}

/// Detection provider with a short timeout
pub fn detection_provider(name: &str) -> ProviderDescriptor {
    ProviderDescriptor::new(name, format!("http://localhost:9/{name}"), OperationKind::Detection)
        .with_timeout(Duration::from_secs(2))
}

/// Config with the given providers and a 10ms backoff unit
pub fn config_with(providers: Vec<ProviderDescriptor>) -> OrchestratorConfig {
    providers
        .into_iter()
        .fold(OrchestratorConfig::builder(), |b, p| b.provider(p))
        .backoff_unit(Duration::from_millis(10))
        .build()
        .unwrap()
}

/// Route `log` output to the test harness; `RUST_LOG=debug` shows it
pub fn init_logging() {
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn"))
        .is_test(true)
        .try_init();
}

/// Orchestrator over `transport` reporting `mb` megabytes of usage
pub fn orchestrator_with(
    config: OrchestratorConfig,
    transport: Arc<MockTransport>,
    mb: u64,
) -> ProcessingOrchestrator {
    init_logging();
    let (sampler, _) = FixedSampler::megabytes(mb);
    ProcessingOrchestrator::builder(config)
        .transport(transport)
        .memory_sampler(Box::new(sampler))
        .periodic_sampling(false)
        .build()
        .unwrap()
}

/// Orchestrator over `transport` with a low memory reading
pub fn orchestrator(config: OrchestratorConfig, transport: Arc<MockTransport>) -> ProcessingOrchestrator {
    orchestrator_with(config, transport, 64)
}

/// Square mask polygon `[x0, x1) x [y0, y1)`
pub fn square(x0: i32, y0: i32, x1: i32, y1: i32) -> retouch::MaskPolygon {
    retouch::MaskPolygon::new(vec![
        retouch::Point::new(x0, y0),
        retouch::Point::new(x1, y0),
        retouch::Point::new(x1, y1),
        retouch::Point::new(x0, y1),
    ])
    .unwrap()
}
