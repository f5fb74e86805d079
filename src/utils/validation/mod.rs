//! Consolidated validation utilities
//!
//! Range checks for configuration and for numbers arriving from providers
//! live here so every caller reports out-of-range values the same way.

pub mod config;
pub mod numeric;

pub use config::ConfigValidator;
pub use numeric::NumericValidator;
