//! Solver configuration.
//!
//! [`DistributionConfig`] is an immutable value handed to every solve. It can
//! be loaded from TOML; partial files are fine, unspecified values use the
//! defaults below.
//!
//! ```toml
//! post_check_tolerance_w = 1e-9
//!
//! [proportional]
//! violation_tolerance_w = 1e-9
//!
//! [simplex]
//! max_iterations = 10000
//! max_evaluations = 10000
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{DistributionError, DistributionResult};

/// Top-level configuration for the distribution solver.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DistributionConfig {
    /// SoC-weighted analytic solver settings.
    pub proportional: ProportionalConfig,

    /// Penalized simplex fallback settings.
    pub simplex: SimplexConfig,

    /// Slack allowed at the façade boundary before a value counts as a
    /// bound violation and is re-clamped with a diagnostic.
    pub post_check_tolerance_w: f64,
}

impl Default for DistributionConfig {
    fn default() -> Self {
        Self {
            proportional: ProportionalConfig::default(),
            simplex: SimplexConfig::default(),
            post_check_tolerance_w: 1e-9,
        }
    }
}

/// Settings for the proportional (LU + bound repair) allocator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProportionalConfig {
    /// A solved value further than this outside its bound is clamped and
    /// fixed in the next repair iteration.
    pub violation_tolerance_w: f64,

    /// Relative residual above which a reduced system is treated as singular.
    pub singular_residual_tolerance: f64,
}

impl Default for ProportionalConfig {
    fn default() -> Self {
        Self {
            violation_tolerance_w: 1e-9,
            singular_residual_tolerance: 1e-6,
        }
    }
}

/// Settings for the penalized Nelder-Mead allocator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimplexConfig {
    /// Iteration cap of the simplex search.
    pub max_iterations: u64,

    /// Objective evaluation cap; bounds worst-case latency.
    pub max_evaluations: u64,

    /// Convergence tolerance on the standard deviation of the simplex
    /// vertex costs.
    pub sd_tolerance: f64,

    /// Edge length of the initial simplex around the zero vector.
    pub initial_step_w: f64,

    /// Weight of the residual |setpoint − Σx| in the penalized objective.
    pub equality_penalty: f64,

    /// Weight of the total bound violation in the penalized objective.
    pub bound_penalty: f64,
}

impl Default for SimplexConfig {
    fn default() -> Self {
        Self {
            max_iterations: 10_000,
            max_evaluations: 10_000,
            sd_tolerance: 1e-11,
            initial_step_w: 1.0,
            equality_penalty: 10.0,
            bound_penalty: 10.0,
        }
    }
}

impl DistributionConfig {
    /// Load configuration from a TOML file.
    pub fn load_from(path: &Path) -> DistributionResult<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml_str(&contents)
    }

    /// Parse and validate configuration from a TOML string.
    pub fn from_toml_str(contents: &str) -> DistributionResult<Self> {
        let config: Self = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Render as pretty TOML.
    pub fn to_toml_string(&self) -> DistributionResult<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Save configuration to a specific path.
    pub fn save_to(&self, path: &Path) -> DistributionResult<()> {
        std::fs::write(path, self.to_toml_string()?)?;
        Ok(())
    }

    /// Reject settings the solvers cannot work with.
    pub fn validate(&self) -> DistributionResult<()> {
        let positive = [
            ("post_check_tolerance_w", self.post_check_tolerance_w),
            (
                "proportional.violation_tolerance_w",
                self.proportional.violation_tolerance_w,
            ),
            (
                "proportional.singular_residual_tolerance",
                self.proportional.singular_residual_tolerance,
            ),
            ("simplex.sd_tolerance", self.simplex.sd_tolerance),
            ("simplex.initial_step_w", self.simplex.initial_step_w),
        ];
        for (name, value) in positive {
            if !(value.is_finite() && value > 0.0) {
                return Err(DistributionError::Config(format!(
                    "{} must be a positive finite number, got {}",
                    name, value
                )));
            }
        }

        let non_negative = [
            ("simplex.equality_penalty", self.simplex.equality_penalty),
            ("simplex.bound_penalty", self.simplex.bound_penalty),
        ];
        for (name, value) in non_negative {
            if !(value.is_finite() && value >= 0.0) {
                return Err(DistributionError::Config(format!(
                    "{} must be a non-negative finite number, got {}",
                    name, value
                )));
            }
        }

        if self.simplex.max_iterations == 0 || self.simplex.max_evaluations == 0 {
            return Err(DistributionError::Config(
                "simplex caps (max_iterations, max_evaluations) must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}
