//! Services shared by every operation
//!
//! Progress reporting, the task registry, memory monitoring and image I/O
//! live here so the orchestrator can inject them rather than own them.

pub mod io;
pub mod monitor;
pub mod progress;
pub mod registry;

pub use io::ImageIOService;
pub use monitor::{MemorySampler, ProcessMemorySampler, ResourceMonitor};
pub use progress::{
    ChannelProgressReporter, ConsoleProgressReporter, FnProgressReporter, NoOpProgressReporter,
    ProgressEvent, ProgressReporter, ProgressStage, ProgressTracker,
};
pub use registry::{OperationHandle, TaskRegistry};
