//! Configuration validation

use super::NumericValidator;
use crate::config::{MonitorConfig, ProviderDescriptor, RegionConfig};
use crate::error::{Result, RetouchError};
use std::time::Duration;

/// Largest tile side accepted; bigger tiles make cancellation too coarse
const MAX_TILE_SIZE: u32 = 4096;

/// Largest fill radius accepted
const MAX_FILL_RADIUS: u32 = 64;

/// Validator for configuration sections
pub struct ConfigValidator;

impl ConfigValidator {
    /// Validate one provider descriptor
    ///
    /// # Errors
    /// Empty name, non-HTTP endpoint, zero timeout or zero attempts.
    pub fn validate_provider(provider: &ProviderDescriptor) -> Result<()> {
        if provider.name.trim().is_empty() {
            return Err(RetouchError::invalid_config("provider name must not be empty"));
        }

        let endpoint = reqwest::Url::parse(&provider.endpoint).map_err(|e| {
            RetouchError::invalid_config(format!(
                "provider '{}' has an invalid endpoint '{}': {}",
                provider.name, provider.endpoint, e
            ))
        })?;
        if !matches!(endpoint.scheme(), "http" | "https") {
            return Err(RetouchError::invalid_config(format!(
                "provider '{}' endpoint must use http or https, got '{}'",
                provider.name,
                endpoint.scheme()
            )));
        }

        if provider.timeout == Duration::ZERO {
            return Err(RetouchError::invalid_config(format!(
                "provider '{}' timeout must be greater than zero",
                provider.name
            )));
        }

        NumericValidator::validate_positive(
            provider.max_retries,
            &format!("provider '{}' max_retries", provider.name),
        )?;

        if let Some(max_dimension) = provider.input.max_dimension {
            NumericValidator::validate_positive(
                max_dimension,
                &format!("provider '{}' max_dimension", provider.name),
            )?;
        }

        Ok(())
    }

    /// Validate region engine parameters
    ///
    /// # Errors
    /// Zero or out-of-range tile size, radius, or region caps.
    pub fn validate_region(region: &RegionConfig) -> Result<()> {
        NumericValidator::validate_range(region.tile_size, 1, MAX_TILE_SIZE, "tile_size")?;
        NumericValidator::validate_range(region.fill_radius, 1, MAX_FILL_RADIUS, "fill_radius")?;
        NumericValidator::validate_range(
            region.similarity_threshold,
            0,
            255 * 3,
            "similarity_threshold",
        )?;
        NumericValidator::validate_positive(region.max_region_pixels, "max_region_pixels")?;
        if region.min_region_pixels > region.max_region_pixels {
            return Err(RetouchError::invalid_config(format!(
                "min_region_pixels ({}) must not exceed max_region_pixels ({})",
                region.min_region_pixels, region.max_region_pixels
            )));
        }
        Ok(())
    }

    /// Validate memory thresholds
    ///
    /// # Errors
    /// Non-positive limits, soft above hard, or a zero sampling interval.
    pub fn validate_monitor(monitor: &MonitorConfig) -> Result<()> {
        NumericValidator::validate_positive_finite(monitor.soft_limit_mb, "soft_limit_mb")?;
        NumericValidator::validate_positive_finite(monitor.hard_limit_mb, "hard_limit_mb")?;
        if monitor.soft_limit_mb > monitor.hard_limit_mb {
            return Err(RetouchError::invalid_config(format!(
                "soft_limit_mb ({}) must not exceed hard_limit_mb ({})",
                monitor.soft_limit_mb, monitor.hard_limit_mb
            )));
        }
        if monitor.sample_interval == Duration::ZERO {
            return Err(RetouchError::invalid_config(
                "sample_interval must be greater than zero",
            ));
        }
        Ok(())
    }
}
