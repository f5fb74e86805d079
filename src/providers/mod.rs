//! Remote inference providers
//!
//! Requests are built per provider by [`transport`], answers are mapped into
//! domain results by [`normalize`], and [`coordinator`] runs the ordered chain
//! with retries.

pub mod coordinator;
pub mod normalize;
pub mod transport;

pub use coordinator::{AttemptRecord, ChainEvent, ChainOutcome, ProviderCoordinator};
pub use transport::{HttpTransport, ProviderRequest, ProviderResponse, ProviderTransport};
