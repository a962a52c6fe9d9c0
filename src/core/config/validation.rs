//! Validation helper functions for configuration types.
//!
//! Every helper reports failures as [`RiskError::Config`] tagged with the
//! dotted path of the offending field.

use crate::core::errors::{Result, RiskError};

/// Tolerance used when checking that weights sum to one.
pub const WEIGHT_SUM_TOLERANCE: f64 = 1e-6;

/// Validate that a usize value is greater than zero.
pub fn validate_positive_usize(value: usize, field: &str) -> Result<()> {
    if value == 0 {
        return Err(RiskError::config_field(
            format!("{field} must be greater than 0"),
            field,
        ));
    }
    Ok(())
}

/// Validate that an f64 value is finite and greater than zero.
pub fn validate_positive_f64(value: f64, field: &str) -> Result<()> {
    if !value.is_finite() || value <= 0.0 {
        return Err(RiskError::config_field(
            format!("{field} must be greater than 0.0, got {value}"),
            field,
        ));
    }
    Ok(())
}

/// Validate that an f64 value is finite and non-negative.
pub fn validate_non_negative(value: f64, field: &str) -> Result<()> {
    if !value.is_finite() || value < 0.0 {
        return Err(RiskError::config_field(
            format!("{field} must be non-negative, got {value}"),
            field,
        ));
    }
    Ok(())
}

/// Validate that an f64 value lies in the half-open unit range (0.0, 1.0].
pub fn validate_open_unit_range(value: f64, field: &str) -> Result<()> {
    if !(value > 0.0 && value <= 1.0) {
        return Err(RiskError::config_field(
            format!("{field} must be in (0.0, 1.0], got {value}"),
            field,
        ));
    }
    Ok(())
}

/// Validate that a usize value is within a bounded range (inclusive).
pub fn validate_bounded_usize(value: usize, min: usize, max: usize, field: &str) -> Result<()> {
    if value < min || value > max {
        return Err(RiskError::config_field(
            format!("{field} must be between {min} and {max}, got {value}"),
            field,
        ));
    }
    Ok(())
}

/// Validate that weights sum to 1.0 within tolerance.
pub fn validate_weights_sum(weights: &[f64], tolerance: f64, field: &str) -> Result<()> {
    let sum: f64 = weights.iter().sum();
    if !sum.is_finite() || (sum - 1.0).abs() > tolerance {
        return Err(RiskError::config_field(
            format!("{field} must sum to 1.0, got {sum}"),
            field,
        ));
    }
    Ok(())
}
