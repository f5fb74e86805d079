//! Numeric validation utilities
//!
//! Provides safe numeric conversions and range validation for values that
//! arrive from configuration files and provider responses.

use crate::error::{Result, RetouchError};

/// Validator for numeric operations and conversions
pub struct NumericValidator;

impl NumericValidator {
    /// Convert a finite `f64` coordinate to `i32`, rounding to nearest
    ///
    /// # Errors
    /// Non-finite or out-of-range values.
    pub fn validate_f64_to_i32(value: f64, name: &str) -> Result<i32> {
        if !value.is_finite() {
            return Err(RetouchError::invalid_config(format!(
                "{} must be finite, got {}",
                name, value
            )));
        }
        let rounded = value.round();
        if rounded < f64::from(i32::MIN) || rounded > f64::from(i32::MAX) {
            return Err(RetouchError::invalid_config(format!(
                "{} {} does not fit in a pixel coordinate",
                name, value
            )));
        }
        Ok(rounded as i32)
    }

    /// Convert a finite, non-negative `f64` extent to `u32`
    ///
    /// # Errors
    /// Non-finite, negative or out-of-range values.
    pub fn validate_f64_to_u32(value: f64, name: &str) -> Result<u32> {
        if !value.is_finite() || value < 0.0 {
            return Err(RetouchError::invalid_config(format!(
                "{} must be a finite non-negative number, got {}",
                name, value
            )));
        }
        let rounded = value.round();
        if rounded > f64::from(u32::MAX) {
            return Err(RetouchError::invalid_config(format!(
                "{} {} exceeds u32::MAX",
                name, value
            )));
        }
        Ok(rounded as u32)
    }

    /// Accept a confidence score and clamp it into `[0, 1]`
    ///
    /// # Errors
    /// NaN or infinite scores.
    pub fn validate_confidence(value: f64) -> Result<f32> {
        if !value.is_finite() {
            return Err(RetouchError::invalid_config(format!(
                "confidence must be finite, got {}",
                value
            )));
        }
        Ok(value.clamp(0.0, 1.0) as f32)
    }

    /// Validate that a value lies within `[min, max]`
    ///
    /// # Errors
    /// Values outside the range.
    pub fn validate_range<T>(value: T, min: T, max: T, name: &str) -> Result<T>
    where
        T: PartialOrd + std::fmt::Display + Copy,
    {
        if value < min || value > max {
            return Err(RetouchError::config_value_error(
                name,
                value,
                &format!("{}-{}", min, max),
            ));
        }
        Ok(value)
    }

    /// Validate that a value is strictly positive
    ///
    /// # Errors
    /// Zero, negative or unordered (NaN) values.
    pub fn validate_positive<T>(value: T, name: &str) -> Result<T>
    where
        T: PartialOrd + std::fmt::Display + Copy + Default,
    {
        if value.partial_cmp(&T::default()) != Some(std::cmp::Ordering::Greater) {
            return Err(RetouchError::invalid_config(format!(
                "{} must be positive, got {}",
                name, value
            )));
        }
        Ok(value)
    }

    /// Validate a finite, strictly positive float such as a memory limit
    ///
    /// # Errors
    /// NaN, infinite, zero or negative values.
    pub fn validate_positive_finite(value: f64, name: &str) -> Result<f64> {
        if !value.is_finite() {
            return Err(RetouchError::invalid_config(format!(
                "{} must be a finite number, got {}",
                name, value
            )));
        }
        Self::validate_positive(value, name)
    }
}
