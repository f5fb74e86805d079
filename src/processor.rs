//! Processing orchestrator
//!
//! This module provides the `ProcessingOrchestrator` that drives every detect
//! and remove operation through its state machine: resource check, input
//! preparation, the provider chain, local fallback and finalization. The CLI
//! and library callers share it so that behavior is identical everywhere.

use crate::{
    config::OrchestratorConfig,
    error::{ErrorKind, Result, RetouchError},
    providers::{ChainEvent, ChainOutcome, HttpTransport, ProviderCoordinator, ProviderTransport},
    region::{RegionEngine, TileProgress},
    services::{
        MemorySampler, OperationHandle, ProcessMemorySampler, ProgressReporter, ProgressStage,
        ProgressTracker, ResourceMonitor, TaskRegistry,
    },
    types::{
        DetectedObject, MaskPolygon, OperationId, OperationKind, OperationOutput, OperationResult,
        PixelBuffer, Point, ResultSource, Selection,
    },
};
use instant::Instant;
use log::{debug, info, warn};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info_span, instrument, Instrument};

/// Share of the progress range given to the provider chain
const PROVIDER_PROGRESS: (u8, u8) = (10, 50);

/// Share of the progress range given to local processing
const LOCAL_PROGRESS: (u8, u8) = (50, 90);

/// States an operation moves through
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationState {
    Initializing,
    PreparingInput,
    TryingProviders,
    LocalFallback,
    Finalizing,
    Complete,
    Cancelled,
    Failed,
}

impl OperationState {
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Complete | Self::Cancelled | Self::Failed)
    }

    /// Whether `self -> next` is a legal transition
    #[must_use]
    pub fn can_transition_to(self, next: Self) -> bool {
        use OperationState::{
            Cancelled, Complete, Failed, Finalizing, Initializing, LocalFallback, PreparingInput,
            TryingProviders,
        };
        if self.is_terminal() {
            return false;
        }
        matches!(
            (self, next),
            (_, Cancelled | Failed)
                | (Initializing, PreparingInput)
                | (PreparingInput, TryingProviders)
                | (TryingProviders, LocalFallback | Finalizing)
                | (LocalFallback, Finalizing)
                | (Finalizing, Complete)
        )
    }

    /// Progress stage announced when entering this state
    #[must_use]
    pub fn stage(self) -> Option<ProgressStage> {
        match self {
            Self::Initializing => Some(ProgressStage::Initializing),
            Self::PreparingInput => Some(ProgressStage::Preparing),
            Self::TryingProviders => Some(ProgressStage::ContactingProvider),
            Self::LocalFallback => Some(ProgressStage::FallingBack),
            Self::Finalizing => Some(ProgressStage::Finalizing),
            Self::Complete => Some(ProgressStage::Complete),
            Self::Cancelled | Self::Failed => None,
        }
    }
}

/// Input of one operation
#[derive(Debug, Clone)]
pub struct OperationRequest {
    pub kind: OperationKind,
    pub pixels: PixelBuffer,
    pub selection: Selection,
    /// Previously detected object; for removal with a point selection its
    /// bounding box becomes the mask
    pub hint: Option<DetectedObject>,
}

impl OperationRequest {
    /// Detect the object under `point`
    #[must_use]
    pub fn detect(pixels: PixelBuffer, point: Point) -> Self {
        Self {
            kind: OperationKind::Detection,
            pixels,
            selection: Selection::Point(point),
            hint: None,
        }
    }

    /// Remove the area inside `mask`
    #[must_use]
    pub fn remove(pixels: PixelBuffer, mask: MaskPolygon) -> Self {
        Self {
            kind: OperationKind::Removal,
            pixels,
            selection: Selection::Mask(mask),
            hint: None,
        }
    }

    #[must_use]
    pub fn with_hint(mut self, hint: DetectedObject) -> Self {
        self.hint = Some(hint);
        self
    }
}

/// A submitted operation: its handle plus the task producing its result
pub struct Submission {
    handle: OperationHandle,
    registry: Arc<TaskRegistry>,
    task: JoinHandle<OperationResult>,
}

impl Submission {
    #[must_use]
    pub fn id(&self) -> OperationId {
        self.handle.id()
    }

    #[must_use]
    pub fn handle(&self) -> &OperationHandle {
        &self.handle
    }

    /// Request cancellation; returns `false` once the operation is terminal
    pub fn cancel(&self) -> bool {
        self.registry.cancel(self.handle.id())
    }

    /// Wait for the terminal result
    pub async fn wait(self) -> OperationResult {
        let id = self.handle.id();
        match self.task.await {
            Ok(result) => result,
            Err(e) => {
                warn!("Operation {} task did not complete: {}", id, e);
                self.registry.mark_terminal(id);
                self.registry.release(id);
                OperationResult::failed(
                    id,
                    &RetouchError::AllProvidersAndFallbackFailed(format!(
                        "operation task failed: {}",
                        e
                    )),
                    0,
                )
            },
        }
    }
}

/// Builder for [`ProcessingOrchestrator`] with injectable collaborators
pub struct OrchestratorBuilder {
    config: OrchestratorConfig,
    transport: Option<Arc<dyn ProviderTransport>>,
    sampler: Option<Box<dyn MemorySampler>>,
    registry: Option<Arc<TaskRegistry>>,
    periodic_sampling: bool,
}

impl OrchestratorBuilder {
    #[must_use]
    pub fn new(config: OrchestratorConfig) -> Self {
        Self {
            config,
            transport: None,
            sampler: None,
            registry: None,
            periodic_sampling: true,
        }
    }

    /// Transport used to reach providers (defaults to [`HttpTransport`])
    #[must_use]
    pub fn transport(mut self, transport: Arc<dyn ProviderTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Memory sampler (defaults to [`ProcessMemorySampler`])
    #[must_use]
    pub fn memory_sampler(mut self, sampler: Box<dyn MemorySampler>) -> Self {
        self.sampler = Some(sampler);
        self
    }

    /// Share a registry with other components
    #[must_use]
    pub fn registry(mut self, registry: Arc<TaskRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Disable the background sampling task; samples are then only taken
    /// when operations start
    #[must_use]
    pub fn periodic_sampling(mut self, enabled: bool) -> Self {
        self.periodic_sampling = enabled;
        self
    }

    /// Build the orchestrator
    ///
    /// # Errors
    /// - Invalid configuration
    /// - HTTP client could not be created
    pub fn build(self) -> Result<ProcessingOrchestrator> {
        self.config.validate()?;

        let transport: Arc<dyn ProviderTransport> = match self.transport {
            Some(transport) => transport,
            None => Arc::new(HttpTransport::new()?),
        };
        let registry = self.registry.unwrap_or_default();
        let sampler: Box<dyn MemorySampler> = match self.sampler {
            Some(sampler) => sampler,
            None => Box::new(ProcessMemorySampler::new()),
        };
        let monitor = Arc::new(ResourceMonitor::with_sampler(
            self.config.monitor,
            Arc::clone(&registry),
            sampler,
        ));
        if self.periodic_sampling && monitor.spawn_sampler().is_none() {
            debug!("No tokio runtime at construction; memory is sampled per operation only");
        }

        let coordinator =
            ProviderCoordinator::new(self.config.providers.clone(), transport, self.config.retry);
        let engine = RegionEngine::new(self.config.region);

        info!(
            "Orchestrator ready: {} detection / {} removal provider(s), tile size {}",
            self.config.providers.detection.len(),
            self.config.providers.removal.len(),
            self.config.region.tile_size
        );

        Ok(ProcessingOrchestrator {
            inner: Arc::new(Inner {
                config: self.config,
                coordinator,
                engine,
                registry,
                monitor,
            }),
        })
    }
}

struct Inner {
    config: OrchestratorConfig,
    coordinator: ProviderCoordinator,
    engine: RegionEngine,
    registry: Arc<TaskRegistry>,
    monitor: Arc<ResourceMonitor>,
}

/// Drives detect and remove operations
///
/// Cloning is cheap; clones share the registry, monitor and provider chain.
#[derive(Clone)]
pub struct ProcessingOrchestrator {
    inner: Arc<Inner>,
}

impl ProcessingOrchestrator {
    /// Orchestrator with the HTTP transport and process memory sampler
    ///
    /// # Errors
    /// Same as [`OrchestratorBuilder::build`].
    pub fn new(config: OrchestratorConfig) -> Result<Self> {
        OrchestratorBuilder::new(config).build()
    }

    #[must_use]
    pub fn builder(config: OrchestratorConfig) -> OrchestratorBuilder {
        OrchestratorBuilder::new(config)
    }

    #[must_use]
    pub fn config(&self) -> &OrchestratorConfig {
        &self.inner.config
    }

    #[must_use]
    pub fn registry(&self) -> &Arc<TaskRegistry> {
        &self.inner.registry
    }

    #[must_use]
    pub fn monitor(&self) -> &Arc<ResourceMonitor> {
        &self.inner.monitor
    }

    /// Start an operation on the current tokio runtime.
    ///
    /// Progress goes to `reporter`; the terminal result is obtained from
    /// [`Submission::wait`].
    ///
    /// # Panics
    /// When called outside of a tokio runtime.
    #[instrument(
        skip(self, request, reporter),
        fields(
            kind = %request.kind,
            dimensions = %format!("{}x{}", request.pixels.width(), request.pixels.height())
        )
    )]
    pub fn submit(
        &self,
        request: OperationRequest,
        reporter: Arc<dyn ProgressReporter>,
    ) -> Submission {
        let handle = self.inner.registry.register(request.kind);
        let id = handle.id();
        let inner = Arc::clone(&self.inner);
        let task_handle = handle.clone();
        let span = info_span!("operation", id = %id, kind = %request.kind);

        let task = tokio::spawn(
            async move { inner.execute(task_handle, request, reporter).await }.instrument(span),
        );

        Submission {
            handle,
            registry: Arc::clone(&self.inner.registry),
            task,
        }
    }

    /// Submit and wait for the terminal result
    pub async fn submit_and_wait(
        &self,
        request: OperationRequest,
        reporter: Arc<dyn ProgressReporter>,
    ) -> OperationResult {
        self.submit(request, reporter).wait().await
    }

    /// Request cancellation of a running operation
    pub fn cancel(&self, id: OperationId) -> bool {
        self.inner.registry.cancel(id)
    }
}

/// Current state plus the tracker that announces transitions
struct StateMachine {
    state: OperationState,
    tracker: ProgressTracker,
}

impl StateMachine {
    fn new(tracker: ProgressTracker) -> Self {
        Self {
            state: OperationState::Initializing,
            tracker,
        }
    }

    fn start(&mut self) {
        self.tracker.report_stage(ProgressStage::Initializing);
    }

    /// Move to `next` and emit exactly one event for it
    fn enter(&mut self, next: OperationState, message: &str) {
        if !self.state.can_transition_to(next) {
            warn!("Unexpected transition {:?} -> {:?}", self.state, next);
        }
        debug!("{:?} -> {:?}", self.state, next);
        self.state = next;
        if let Some(stage) = next.stage() {
            self.tracker
                .report(stage, stage.progress_percentage(), message.to_string());
        }
    }

    fn complete(&mut self) {
        self.state = OperationState::Complete;
        self.tracker.finish_success();
    }

    fn fail(&mut self, error: &RetouchError) {
        let next = if error.kind() == ErrorKind::Cancelled {
            OperationState::Cancelled
        } else {
            OperationState::Failed
        };
        debug!("{:?} -> {:?}: {}", self.state, next, error);
        self.state = next;
        self.tracker.finish_failure(&error.into());
    }
}

fn scale_progress(range: (u8, u8), fraction: f64) -> u8 {
    let span = f64::from(range.1 - range.0);
    range.0 + (span * fraction.clamp(0.0, 1.0)).round() as u8
}

impl Inner {
    async fn execute(
        &self,
        handle: OperationHandle,
        request: OperationRequest,
        reporter: Arc<dyn ProgressReporter>,
    ) -> OperationResult {
        let id = handle.id();
        let started = Instant::now();
        let tracker = ProgressTracker::new(reporter, id).with_monitor(Arc::clone(&self.monitor));
        let mut machine = StateMachine::new(tracker);

        let outcome = self.drive(&mut machine, handle.token(), request).await;
        let elapsed_ms = started.elapsed().as_millis() as u64;

        let result = match outcome {
            Ok((output, source)) => {
                machine.complete();
                info!("Operation {} completed via {} in {}ms", id, source, elapsed_ms);
                OperationResult::succeeded(id, output, source, elapsed_ms)
            },
            Err(error) => {
                machine.fail(&error);
                if error.kind() == ErrorKind::Cancelled {
                    info!("Operation {} cancelled after {}ms", id, elapsed_ms);
                } else {
                    warn!("Operation {} failed: {}", id, error);
                }
                OperationResult::failed(id, &error, elapsed_ms)
            },
        };

        self.registry.mark_terminal(id);
        self.registry.sweep();
        self.registry.release(id);
        result
    }

    async fn drive(
        &self,
        machine: &mut StateMachine,
        token: &CancellationToken,
        request: OperationRequest,
    ) -> Result<(OperationOutput, ResultSource)> {
        machine.start();
        self.monitor.ensure_capacity()?;
        check_cancelled(token)?;

        machine.enter(OperationState::PreparingInput, "Validating selection");
        let OperationRequest {
            kind,
            pixels,
            selection,
            hint,
        } = request;
        let selection = prepare_selection(kind, &pixels, selection, hint.as_ref())?;
        check_cancelled(token)?;

        machine.enter(OperationState::TryingProviders, "Contacting processing services");
        let chain_outcome = {
            let tracker = &mut machine.tracker;
            let mut current = 0usize;
            let mut total = 1usize;
            let mut observer = |event: ChainEvent| match event {
                ChainEvent::ProviderStarted {
                    index,
                    total: count,
                    provider,
                } => {
                    current = index;
                    total = count.max(1);
                    tracker.report(
                        ProgressStage::ContactingProvider,
                        scale_progress(PROVIDER_PROGRESS, current as f64 / total as f64),
                        format!("Contacting {} ({}/{})", provider, index + 1, count),
                    );
                },
                ChainEvent::AttemptFailed {
                    provider,
                    attempt,
                    message,
                    retry_in_ms,
                } => {
                    let note = match retry_in_ms {
                        Some(ms) => format!("retrying in {}ms", ms),
                        None => "giving up".to_string(),
                    };
                    tracker.report(
                        ProgressStage::ContactingProvider,
                        scale_progress(PROVIDER_PROGRESS, current as f64 / total as f64),
                        format!("{} attempt {} failed ({}); {}", provider, attempt + 1, message, note),
                    );
                },
                ChainEvent::ResponseReceived { provider } => {
                    tracker.report(
                        ProgressStage::ProviderProcessing,
                        scale_progress(PROVIDER_PROGRESS, (current as f64 + 0.5) / total as f64),
                        format!("Processing response from {}", provider),
                    );
                },
            };
            self.coordinator
                .try_providers(kind, &pixels, &selection, token, &mut observer)
                .await
        };

        let (output, source) = match chain_outcome {
            ChainOutcome::Success { output, provider } => (output, ResultSource::Provider(provider)),
            ChainOutcome::Cancelled => return Err(RetouchError::Cancelled),
            ChainOutcome::Exhausted(attempts) => {
                if !attempts.is_empty() {
                    debug!("Provider chain exhausted after {} attempt(s)", attempts.len());
                }
                machine.enter(OperationState::LocalFallback, "Processing locally");
                let output = self
                    .run_local(machine, token, kind, &pixels, &selection)
                    .instrument(info_span!("local_fallback", kind = %kind))
                    .await?;
                (output, ResultSource::Local)
            },
        };

        check_cancelled(token)?;
        machine.enter(OperationState::Finalizing, "Finalizing result");
        Ok((output, source))
    }

    async fn run_local(
        &self,
        machine: &mut StateMachine,
        token: &CancellationToken,
        kind: OperationKind,
        pixels: &PixelBuffer,
        selection: &Selection,
    ) -> Result<OperationOutput> {
        let tracker = &mut machine.tracker;
        let phase_start = Instant::now();
        let mut on_tile = |progress: TileProgress| {
            let elapsed = phase_start.elapsed().as_millis() as u64;
            let remaining = progress.total.saturating_sub(progress.completed) as u64;
            let eta = match progress.completed {
                0 => 0,
                done => elapsed / done as u64 * remaining,
            };
            tracker.report_with_eta(
                ProgressStage::LocalProcessing,
                scale_progress(LOCAL_PROGRESS, progress.fraction()),
                format!("Processing tile {}/{}", progress.completed, progress.total),
                eta,
            );
        };

        let result = match (kind, selection) {
            (OperationKind::Detection, Selection::Point(seed)) => self
                .engine
                .detect(pixels, *seed, token, &mut on_tile)
                .await
                .map(OperationOutput::Detection),
            (OperationKind::Removal, Selection::Mask(polygon)) => self
                .engine
                .remove(pixels, polygon, token, &mut on_tile)
                .await
                .map(OperationOutput::Removal),
            _ => Err(RetouchError::invalid_selection(format!(
                "selection does not match a {} operation",
                kind
            ))),
        };

        result.map_err(|e| match e.kind() {
            ErrorKind::Cancelled => e,
            _ => RetouchError::AllProvidersAndFallbackFailed(e.to_string()),
        })
    }
}

fn check_cancelled(token: &CancellationToken) -> Result<()> {
    if token.is_cancelled() {
        return Err(RetouchError::Cancelled);
    }
    Ok(())
}

/// Validate the selection for `kind`, resolving a removal hint into a mask
fn prepare_selection(
    kind: OperationKind,
    pixels: &PixelBuffer,
    selection: Selection,
    hint: Option<&DetectedObject>,
) -> Result<Selection> {
    if pixels.is_empty() {
        return Err(RetouchError::invalid_selection("the image has no pixels"));
    }

    match (kind, selection) {
        (OperationKind::Removal, Selection::Mask(polygon)) => Ok(Selection::Mask(polygon)),
        (OperationKind::Removal, Selection::Point(point)) => {
            let hint = hint.ok_or_else(|| {
                RetouchError::invalid_selection(format!(
                    "removal needs a mask of at least {} points or a detected object, got the point {}",
                    MaskPolygon::MIN_POINTS,
                    point
                ))
            })?;
            let bounds = hint.bounds.clamp_to(pixels.width(), pixels.height());
            debug!("Using detected '{}' at {:?} as the removal mask", hint.label, bounds);
            Ok(Selection::Mask(bounds.to_polygon()?))
        },
        (OperationKind::Detection, Selection::Point(point)) => {
            if !pixels.in_bounds(i64::from(point.x), i64::from(point.y)) {
                return Err(RetouchError::invalid_selection(format!(
                    "point {} is outside the {}x{} image",
                    point,
                    pixels.width(),
                    pixels.height()
                )));
            }
            Ok(Selection::Point(point))
        },
        (OperationKind::Detection, Selection::Mask(polygon)) => {
            Err(RetouchError::invalid_selection(format!(
                "detection needs a single point, got a mask of {} points",
                polygon.len()
            )))
        },
    }
}
