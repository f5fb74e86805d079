//! Progress reporting service
//!
//! This module separates progress reporting concerns from business logic,
//! allowing different frontends to implement their own progress handling.

use crate::services::monitor::ResourceMonitor;
use crate::types::{OperationFailure, OperationId};
use instant::Instant;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Progress stages of one detect or remove operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressStage {
    /// Checking the memory budget
    Initializing,
    /// Validating the selection and encoding the input
    Preparing,
    /// Sending a request to a remote provider
    ContactingProvider,
    /// A provider answered and its payload is being normalized
    ProviderProcessing,
    /// No provider succeeded; switching to local processing
    FallingBack,
    /// Running the local region engine tile by tile
    LocalProcessing,
    /// Assembling the result
    Finalizing,
    /// Processing completed
    Complete,
}

impl ProgressStage {
    /// Get a human-readable description of the processing stage
    #[must_use]
    pub fn description(&self) -> &'static str {
        match self {
            Self::Initializing => "Initializing",
            Self::Preparing => "Preparing input",
            Self::ContactingProvider => "Contacting processing service",
            Self::ProviderProcessing => "Processing service response",
            Self::FallingBack => "Switching to local processing",
            Self::LocalProcessing => "Processing locally",
            Self::Finalizing => "Finalizing result",
            Self::Complete => "Processing completed",
        }
    }

    /// Progress percentage at which this stage starts
    #[must_use]
    pub fn progress_percentage(&self) -> u8 {
        match self {
            Self::Initializing => 0,
            Self::Preparing => 5,
            Self::ContactingProvider => 10,
            Self::ProviderProcessing => 45,
            Self::FallingBack | Self::LocalProcessing => 50,
            Self::Finalizing => 90,
            Self::Complete => 100,
        }
    }

    /// Stable tag used in serialized events
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Initializing => "initializing",
            Self::Preparing => "preparing",
            Self::ContactingProvider => "contacting_provider",
            Self::ProviderProcessing => "provider_processing",
            Self::FallingBack => "falling_back",
            Self::LocalProcessing => "local_processing",
            Self::Finalizing => "finalizing",
            Self::Complete => "complete",
        }
    }
}

impl std::fmt::Display for ProgressStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Progress event for one operation
#[derive(Debug, Clone, Serialize)]
pub struct ProgressEvent {
    pub operation_id: OperationId,
    /// Current processing stage
    pub stage: ProgressStage,
    /// Progress percentage (0-100), never lower than the previous event
    pub progress: u8,
    /// Human-readable message
    pub message: String,
    /// Elapsed time since the operation started (milliseconds)
    pub elapsed_ms: u64,
    /// Estimated time remaining (milliseconds, if available)
    pub eta_ms: Option<u64>,
    /// Set while memory usage is above the soft limit
    pub memory_warning: Option<String>,
}

/// Trait for receiving progress of detect and remove operations
pub trait ProgressReporter: Send + Sync {
    /// Report a progress event
    fn report_progress(&self, event: ProgressEvent);

    /// Report successful completion
    fn report_completion(&self, operation_id: OperationId, elapsed_ms: u64) {
        let _ = (operation_id, elapsed_ms);
    }

    /// Report a terminal failure
    ///
    /// # Arguments
    /// * `stage` - Last stage reached before the failure
    /// * `failure` - Classification and message
    fn report_error(&self, stage: ProgressStage, failure: &OperationFailure) {
        let _ = (stage, failure);
    }
}

/// No-op progress reporter that discards all progress updates
pub struct NoOpProgressReporter;

impl ProgressReporter for NoOpProgressReporter {
    fn report_progress(&self, _event: ProgressEvent) {}
}

/// Console progress reporter that logs progress through `log`
pub struct ConsoleProgressReporter {
    verbose: bool,
}

impl ConsoleProgressReporter {
    /// Create a new console progress reporter
    ///
    /// # Arguments
    /// * `verbose` - Whether to show timing information
    #[must_use]
    pub fn new(verbose: bool) -> Self {
        Self { verbose }
    }
}

impl ProgressReporter for ConsoleProgressReporter {
    fn report_progress(&self, event: ProgressEvent) {
        if let Some(warning) = &event.memory_warning {
            log::warn!("⚠️  {}", warning);
        }
        if self.verbose {
            match event.eta_ms {
                Some(eta) => log::info!(
                    "[{}%] {} ({}ms elapsed, ~{}ms remaining)",
                    event.progress,
                    event.message,
                    event.elapsed_ms,
                    eta
                ),
                None => log::info!(
                    "[{}%] {} ({}ms elapsed)",
                    event.progress,
                    event.message,
                    event.elapsed_ms
                ),
            }
        } else {
            log::info!("[{}%] {}", event.progress, event.message);
        }
    }

    fn report_completion(&self, operation_id: OperationId, elapsed_ms: u64) {
        log::info!("✅ Operation {} completed in {}ms", operation_id, elapsed_ms);
    }

    fn report_error(&self, stage: ProgressStage, failure: &OperationFailure) {
        log::error!(
            "❌ Error during {}: {} ({})",
            stage.description(),
            failure.message,
            failure.detail
        );
    }
}

/// Forwards events into a tokio channel, turning callbacks into a stream
pub struct ChannelProgressReporter {
    sender: mpsc::UnboundedSender<ProgressEvent>,
}

impl ChannelProgressReporter {
    /// Create a reporter and the receiving end of its event stream
    #[must_use]
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ProgressEvent>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }
}

impl ProgressReporter for ChannelProgressReporter {
    fn report_progress(&self, event: ProgressEvent) {
        // A dropped receiver just means nobody is listening any more
        let _ = self.sender.send(event);
    }
}

/// Adapts a plain callback `(ProgressEvent) -> ()` into a reporter
pub struct FnProgressReporter<F>
where
    F: Fn(ProgressEvent) + Send + Sync,
{
    callback: F,
}

impl<F> FnProgressReporter<F>
where
    F: Fn(ProgressEvent) + Send + Sync,
{
    #[must_use]
    pub fn new(callback: F) -> Self {
        Self { callback }
    }
}

impl<F> ProgressReporter for FnProgressReporter<F>
where
    F: Fn(ProgressEvent) + Send + Sync,
{
    fn report_progress(&self, event: ProgressEvent) {
        (self.callback)(event);
    }
}

/// Progress tracker for a single operation.
///
/// Enforces the event ordering contract: percentages never decrease, and no
/// event is emitted once a terminal outcome has been reported.
pub struct ProgressTracker {
    reporter: Arc<dyn ProgressReporter>,
    operation_id: OperationId,
    start_time: Instant,
    last_progress: u8,
    current_stage: Option<ProgressStage>,
    finished: bool,
    monitor: Option<Arc<ResourceMonitor>>,
}

impl ProgressTracker {
    /// Create a new progress tracker with the specified reporter
    #[must_use]
    pub fn new(reporter: Arc<dyn ProgressReporter>, operation_id: OperationId) -> Self {
        Self {
            reporter,
            operation_id,
            start_time: Instant::now(),
            last_progress: 0,
            current_stage: None,
            finished: false,
            monitor: None,
        }
    }

    /// Create a progress tracker with no-op reporter (for testing/disabled progress)
    #[must_use]
    pub fn no_op(operation_id: OperationId) -> Self {
        Self::new(Arc::new(NoOpProgressReporter), operation_id)
    }

    /// Attach memory warnings from `monitor` to every event
    #[must_use]
    pub fn with_monitor(mut self, monitor: Arc<ResourceMonitor>) -> Self {
        self.monitor = Some(monitor);
        self
    }

    /// Report a stage at its default percentage and description
    pub fn report_stage(&mut self, stage: ProgressStage) {
        self.report(stage, stage.progress_percentage(), stage.description());
    }

    /// Report a stage with an explicit percentage and message
    pub fn report<S: Into<String>>(&mut self, stage: ProgressStage, progress: u8, message: S) {
        self.emit(stage, progress, message.into(), None);
    }

    /// Report a stage with an estimate of the time remaining
    pub fn report_with_eta<S: Into<String>>(
        &mut self,
        stage: ProgressStage,
        progress: u8,
        message: S,
        eta_ms: u64,
    ) {
        self.emit(stage, progress, message.into(), Some(eta_ms));
    }

    fn emit(&mut self, stage: ProgressStage, progress: u8, message: String, eta_ms: Option<u64>) {
        if self.finished {
            return;
        }
        let progress = progress.min(100).max(self.last_progress);
        self.last_progress = progress;
        self.current_stage = Some(stage);

        let memory_warning = self.monitor.as_ref().and_then(|m| m.soft_limit_warning());
        self.reporter.report_progress(ProgressEvent {
            operation_id: self.operation_id,
            stage,
            progress,
            message,
            elapsed_ms: self.elapsed_ms(),
            eta_ms,
            memory_warning,
        });
    }

    /// Emit the final `complete` event at 100% and report completion
    pub fn finish_success(&mut self) {
        if self.finished {
            return;
        }
        self.emit(
            ProgressStage::Complete,
            100,
            ProgressStage::Complete.description().to_string(),
            None,
        );
        self.finished = true;
        self.reporter
            .report_completion(self.operation_id, self.elapsed_ms());
    }

    /// Report a terminal failure; later events are suppressed
    pub fn finish_failure(&mut self, failure: &OperationFailure) {
        if self.finished {
            return;
        }
        self.finished = true;
        let stage = self.current_stage.unwrap_or(ProgressStage::Initializing);
        self.reporter.report_error(stage, failure);
    }

    /// Get the elapsed time since tracking started
    #[must_use]
    pub fn elapsed_ms(&self) -> u64 {
        self.start_time.elapsed().as_millis() as u64
    }

    /// Get the current processing stage
    #[must_use]
    pub fn current_stage(&self) -> Option<ProgressStage> {
        self.current_stage
    }

    /// Highest percentage reported so far
    #[must_use]
    pub fn last_progress(&self) -> u8 {
        self.last_progress
    }

    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.finished
    }
}
