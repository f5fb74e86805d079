#![allow(clippy::too_many_lines)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::uninlined_format_args)]

//! # Retouch
//!
//! Region detection and object removal for still images. Each operation first
//! goes through an ordered chain of remote providers, retrying transient
//! failures with exponential backoff, and falls back to local pixel
//! algorithms when every provider fails:
//!
//! - **Detection**: a click point becomes a region grown from that pixel by
//!   color similarity
//! - **Removal**: a mask polygon is filled from the surrounding pixels
//!
//! Every operation reports monotonic progress, can be cancelled at any time
//! and is refused when the process is above its memory budget.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use retouch::{
//!     MaskPolygon, NoOpProgressReporter, OperationRequest, OrchestratorConfig, Point,
//!     ProcessingOrchestrator, ImageIOService,
//! };
//! use std::sync::Arc;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let config = OrchestratorConfig::builder().build()?;
//! let orchestrator = ProcessingOrchestrator::new(config)?;
//!
//! let pixels = ImageIOService::load_pixels("photo.png")?;
//! let mask = MaskPolygon::new(vec![Point::new(10, 10), Point::new(60, 10), Point::new(35, 50)])?;
//! let result = orchestrator
//!     .submit_and_wait(OperationRequest::remove(pixels, mask), Arc::new(NoOpProgressReporter))
//!     .await;
//!
//! if let Some(edited) = result.pixels() {
//!     ImageIOService::save_pixels(edited, "photo-retouched.png")?;
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Feature Flags
//!
//! - `cli` (default): command-line front end, progress bar and tracing setup
//! - `tracing-json`: JSON log output for the CLI
//!
//! To use only as a library:
//!
//! ```toml
//! [dependencies]
//! retouch = { version = "0.1", default-features = false }
//! ```

#[cfg(feature = "cli")]
pub mod cli;
pub mod config;
pub mod error;
pub mod processor;
pub mod providers;
pub mod region;
pub mod services;
#[cfg(feature = "cli")]
pub mod tracing_config;
pub mod types;
pub mod utils;

pub use config::{
    ImageEncoding, InputConstraints, MonitorConfig, OrchestratorConfig, OrchestratorConfigBuilder,
    ProviderConfig, ProviderDescriptor, RegionConfig, RetryPolicy,
};
pub use error::{ErrorKind, Result, RetouchError};
pub use processor::{
    OperationRequest, OperationState, OrchestratorBuilder, ProcessingOrchestrator, Submission,
};
pub use providers::{
    ChainEvent, ChainOutcome, HttpTransport, ProviderCoordinator, ProviderRequest,
    ProviderResponse, ProviderTransport,
};
pub use region::{grow_region, fill_masked, Region, RegionEngine, TileProgress};
pub use services::{
    ChannelProgressReporter, ConsoleProgressReporter, FnProgressReporter, ImageIOService,
    MemorySampler, NoOpProgressReporter, OperationHandle, ProcessMemorySampler, ProgressEvent,
    ProgressReporter, ProgressStage, ProgressTracker, ResourceMonitor, TaskRegistry,
};
pub use types::{
    BoundingBox, DetectedObject, MaskPolygon, ObjectMask, OperationFailure, OperationId,
    OperationKind, OperationOutput, OperationResult, PixelBuffer, Point, ResultSource, Selection,
};
pub use utils::{ConfigValidator, NumericValidator};

#[cfg(feature = "cli")]
pub use tracing_config::{init_cli_tracing, init_library_tracing, TracingConfig, TracingFormat};
