//! Error types for the distribution solver.
//!
//! [`DistributionError`] covers everything a solve can report. Only the
//! malformed-request family ([`DistributionError::is_malformed_request`])
//! ever reaches a caller of the solver façade; degenerate weights and
//! singular systems are recovered inside the solver and show up as
//! diagnostics instead.
//!
//! # Example
//!
//! ```
//! use essdist_core::{DistributionError, DistributionResult};
//!
//! fn check(lower: f64, upper: f64) -> DistributionResult<()> {
//!     if lower > upper {
//!         return Err(DistributionError::InvalidBounds { index: 0, lower, upper });
//!     }
//!     Ok(())
//! }
//!
//! assert!(check(-10.0, 10.0).is_ok());
//! assert!(check(10.0, -10.0).unwrap_err().is_malformed_request());
//! ```

use thiserror::Error;

#[derive(Error, Debug)]
pub enum DistributionError {
    /// A unit's lower bound lies above its upper bound
    #[error("Invalid bounds for unit {index}: lower {lower} W > upper {upper} W")]
    InvalidBounds { index: usize, lower: f64, upper: f64 },

    /// Per-unit input arrays have different lengths
    #[error("Length mismatch: {lower} lower bounds, {upper} upper bounds, {weights} weights")]
    LengthMismatch {
        lower: usize,
        upper: usize,
        weights: usize,
    },

    /// SoC weight outside 0..=100 percent
    #[error("Invalid weight for unit {index}: {weight} (expected 0..=100 %)")]
    InvalidWeight { index: usize, weight: f64 },

    /// NaN or infinite value in the request
    #[error("Non-finite input: {0}")]
    NonFiniteInput(String),

    /// Direction-aware weights sum to zero, proportional split impossible
    #[error("Degenerate weights: direction-aware SoC weights sum to zero")]
    DegenerateWeights,

    /// Proportionality system could not be solved
    #[error("Singular system: {0}")]
    SingularSystem(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Parsing/deserialization errors
    #[error("Parse error: {0}")]
    Parse(String),

    /// I/O errors (config and request files)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience type alias for Results using DistributionError.
pub type DistributionResult<T> = Result<T, DistributionError>;

impl DistributionError {
    /// True for structurally invalid requests. These are fatal for the
    /// control cycle and must be handled by the caller.
    pub fn is_malformed_request(&self) -> bool {
        matches!(
            self,
            DistributionError::InvalidBounds { .. }
                | DistributionError::LengthMismatch { .. }
                | DistributionError::InvalidWeight { .. }
                | DistributionError::NonFiniteInput(_)
        )
    }
}

impl From<serde_json::Error> for DistributionError {
    fn from(err: serde_json::Error) -> Self {
        DistributionError::Parse(err.to_string())
    }
}

impl From<toml::de::Error> for DistributionError {
    fn from(err: toml::de::Error) -> Self {
        DistributionError::Parse(err.to_string())
    }
}

impl From<toml::ser::Error> for DistributionError {
    fn from(err: toml::ser::Error) -> Self {
        DistributionError::Config(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = DistributionError::InvalidBounds {
            index: 2,
            lower: 100.0,
            upper: -100.0,
        };
        assert!(err.to_string().contains("unit 2"));
        assert!(err.to_string().contains("lower 100 W"));
    }

    #[test]
    fn test_malformed_request_family() {
        assert!(DistributionError::LengthMismatch {
            lower: 2,
            upper: 3,
            weights: 2
        }
        .is_malformed_request());
        assert!(DistributionError::NonFiniteInput("setpoint".into()).is_malformed_request());
        assert!(!DistributionError::DegenerateWeights.is_malformed_request());
        assert!(!DistributionError::SingularSystem("pivot".into()).is_malformed_request());
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: DistributionError = io_err.into();
        assert!(matches!(err, DistributionError::Io(_)));
    }

    #[test]
    fn test_json_error_conversion() {
        let err: DistributionError = serde_json::from_str::<f64>("not json").unwrap_err().into();
        assert!(matches!(err, DistributionError::Parse(_)));
    }
}
