//! Result of a distribution solve.

use serde::{Deserialize, Serialize};

use crate::diagnostics::Diagnostics;
use crate::{ClusterKind, OperationMode};

/// Which path produced an allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DistributionMethod {
    /// No units in the request
    #[default]
    Empty,
    /// Direction KEEP_ZERO
    KeepZero,
    /// Setpoint at or beyond the cluster's discharge capability
    SaturatedUpper,
    /// Setpoint at or beyond the cluster's charge capability
    SaturatedLower,
    /// Single unit, clamped setpoint
    SingleUnit,
    /// SoC-weighted LU solve with bound repair
    Proportional,
    /// Penalized Nelder-Mead equal distribution
    Simplex,
}

impl DistributionMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            DistributionMethod::Empty => "empty",
            DistributionMethod::KeepZero => "keep_zero",
            DistributionMethod::SaturatedUpper => "saturated_upper",
            DistributionMethod::SaturatedLower => "saturated_lower",
            DistributionMethod::SingleUnit => "single_unit",
            DistributionMethod::Proportional => "proportional",
            DistributionMethod::Simplex => "simplex",
        }
    }

    /// True for paths that skip both solvers.
    pub fn is_short_circuit(&self) -> bool {
        !matches!(
            self,
            DistributionMethod::Proportional | DistributionMethod::Simplex
        )
    }
}

impl std::fmt::Display for DistributionMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-unit power targets, index-aligned with the request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Allocation {
    /// Per-unit targets, W
    pub setpoints_w: Vec<f64>,
    pub method: DistributionMethod,
    /// Repair passes (proportional) or completed simplex iterations
    pub iterations: u64,
    /// Penalized objective evaluations (simplex only)
    #[serde(default)]
    pub evaluations: u64,
    /// False when the solver stopped early (singular reduced system,
    /// optimizer cap); the allocation is still bound-safe
    pub converged: bool,
    pub cluster_kind: ClusterKind,
    pub operation_mode: OperationMode,
    #[serde(default)]
    pub diagnostics: Diagnostics,
}

impl Allocation {
    /// Allocation produced without running a solver.
    pub fn short_circuit(
        setpoints_w: Vec<f64>,
        method: DistributionMethod,
        cluster_kind: ClusterKind,
        operation_mode: OperationMode,
    ) -> Self {
        Self {
            setpoints_w,
            method,
            iterations: 0,
            evaluations: 0,
            converged: true,
            cluster_kind,
            operation_mode,
            diagnostics: Diagnostics::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.setpoints_w.len()
    }

    pub fn is_empty(&self) -> bool {
        self.setpoints_w.is_empty()
    }

    /// Sum of all per-unit targets, W
    pub fn total_w(&self) -> f64 {
        self.setpoints_w.iter().sum()
    }

    /// Absolute difference between realized and requested aggregate power
    pub fn tracking_error_w(&self, setpoint_w: f64) -> f64 {
        (self.total_w() - setpoint_w).abs()
    }
}
