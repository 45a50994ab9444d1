//! # essdist-core: ESS Cluster Power Distribution Model
//!
//! Data types shared by the distribution solvers: the per-unit bounds model,
//! the request/result values, errors, diagnostics, the dense linear-system
//! backend and the solver configuration.
//!
//! ## Conventions
//!
//! - Power is signed Watts: charge is negative, discharge is positive.
//! - Every [`Unit`] carries its currently permitted range
//!   `[lower_w, upper_w]` and its state of charge in percent.
//! - Units have no identity beyond their index. Results are index-aligned
//!   with the request.
//!
//! ## Quick Start
//!
//! ```rust
//! use essdist_core::*;
//!
//! let request = SolveRequest::new(
//!     4000.0,
//!     vec![
//!         Unit::new(-5000.0, 5000.0, 50.0),
//!         Unit::new(-3000.0, 3000.0, 80.0),
//!     ],
//!     TargetDirection::Discharge,
//!     true,
//! );
//!
//! assert_eq!(request.len(), 2);
//! assert_eq!(request.total_upper_w(), 8000.0);
//! assert_eq!(ClusterKind::classify(&request.units), ClusterKind::Heterogeneous);
//! ```

pub mod allocation;
pub mod config;
pub mod diagnostics;
pub mod error;
pub mod solver;

pub use allocation::{Allocation, DistributionMethod};
pub use config::{DistributionConfig, ProportionalConfig, SimplexConfig};
pub use diagnostics::{DiagnosticIssue, Diagnostics, Severity};
pub use error::{DistributionError, DistributionResult};

use serde::{Deserialize, Serialize};

/// SoC spread (percentage points) above which a cluster is heterogeneous.
pub const HOMOGENEOUS_SOC_SPREAD_PCT: f64 = 5.0;

/// One controllable battery unit as seen in the current control cycle.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Unit {
    /// Most negative admissible power (maximum charge), W
    pub lower_w: f64,
    /// Most positive admissible power (maximum discharge), W
    pub upper_w: f64,
    /// State of charge, 0..=100 %
    pub soc_pct: f64,
}

impl Unit {
    pub fn new(lower_w: f64, upper_w: f64, soc_pct: f64) -> Self {
        Self {
            lower_w,
            upper_w,
            soc_pct,
        }
    }

    /// Clamp a value into `[lower_w, upper_w]`.
    ///
    /// Unlike `f64::clamp` this never panics; NaN maps to the lower bound.
    #[inline]
    pub fn clamp(&self, value: f64) -> f64 {
        if value.is_nan() {
            return self.lower_w;
        }
        value.max(self.lower_w).min(self.upper_w)
    }

    /// True if `value` lies within the bounds, allowing `slack` W either side.
    #[inline]
    pub fn admits(&self, value: f64, slack: f64) -> bool {
        value >= self.lower_w - slack && value <= self.upper_w + slack
    }
}

/// Direction of the aggregate setpoint.
///
/// Selects the weighting polarity of the proportional split and the
/// trivial short-circuits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetDirection {
    Charge,
    Discharge,
    KeepZero,
}

impl TargetDirection {
    /// Derive the direction from the sign of the setpoint.
    pub fn from_setpoint(setpoint_w: f64) -> Self {
        if setpoint_w < 0.0 {
            TargetDirection::Charge
        } else if setpoint_w > 0.0 {
            TargetDirection::Discharge
        } else {
            TargetDirection::KeepZero
        }
    }

    /// Direction-aware raw weight for a unit's SoC.
    ///
    /// Discharging favours full units (`soc / 100`), charging favours empty
    /// ones (`1 − soc / 100`). Keeping zero weighs nothing.
    pub fn soc_weight(self, soc_pct: f64) -> f64 {
        match self {
            TargetDirection::Discharge => soc_pct / 100.0,
            TargetDirection::Charge => 1.0 - soc_pct / 100.0,
            TargetDirection::KeepZero => 0.0,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TargetDirection::Charge => "charge",
            TargetDirection::Discharge => "discharge",
            TargetDirection::KeepZero => "keep_zero",
        }
    }
}

impl std::fmt::Display for TargetDirection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Homogeneity of the cluster's state of charge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClusterKind {
    /// SoC spread within [`HOMOGENEOUS_SOC_SPREAD_PCT`]
    Homogeneous,
    Heterogeneous,
}

impl ClusterKind {
    pub fn classify(units: &[Unit]) -> Self {
        let (min, max) = units
            .iter()
            .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), u| {
                (lo.min(u.soc_pct), hi.max(u.soc_pct))
            });
        if units.is_empty() || max - min <= HOMOGENEOUS_SOC_SPREAD_PCT {
            ClusterKind::Homogeneous
        } else {
            ClusterKind::Heterogeneous
        }
    }
}

/// Load level of one control cycle relative to the cluster's capability.
///
/// `Pmax` is the cluster's capability in the setpoint's direction: `Σ|upper|`
/// when discharging, `Σ|lower|` when charging.
///
/// | Mode | Condition |
/// |------|-----------|
/// | `One` | `0 < |P| < 0.4 · Pmax / N` |
/// | `Two` | `0.4 · Pmax / N ≤ |P| < Pmax` |
/// | `Three` | everything else (zero setpoint, at or beyond `Pmax`) |
///
/// Reported on the allocation; it does not change how power is split.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationMode {
    /// Light load, below 40 % of one unit's share of `Pmax`
    One,
    /// Partial load
    Two,
    /// Full load, or no load at all
    Three,
}

/// Fraction of the per-unit `Pmax` share below which a cycle is light load.
pub const LIGHT_LOAD_SHARE: f64 = 0.40;

impl OperationMode {
    pub fn classify(setpoint_w: f64, units: &[Unit]) -> Self {
        if units.is_empty() {
            return OperationMode::Three;
        }
        let pmax: f64 = if setpoint_w < 0.0 {
            units.iter().map(|u| u.lower_w.abs()).sum()
        } else {
            units.iter().map(|u| u.upper_w.abs()).sum()
        };
        let light_load = LIGHT_LOAD_SHARE * pmax / units.len() as f64;
        let power = setpoint_w.abs();

        if 0.0 < power && power < light_load {
            OperationMode::One
        } else if light_load <= power && power < pmax {
            OperationMode::Two
        } else {
            OperationMode::Three
        }
    }
}

/// One distribution request: aggregate setpoint plus per-unit snapshots.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SolveRequest {
    /// Aggregate signed setpoint, W
    pub setpoint_w: f64,
    /// Units in a stable order; results keep this order
    pub units: Vec<Unit>,
    pub direction: TargetDirection,
    /// Split proportionally to direction-aware SoC weights
    #[serde(default)]
    pub weighting_enabled: bool,
}

impl SolveRequest {
    pub fn new(
        setpoint_w: f64,
        units: Vec<Unit>,
        direction: TargetDirection,
        weighting_enabled: bool,
    ) -> Self {
        Self {
            setpoint_w,
            units,
            direction,
            weighting_enabled,
        }
    }

    /// Build a request from parallel per-unit arrays.
    pub fn from_arrays(
        setpoint_w: f64,
        lower_w: &[f64],
        upper_w: &[f64],
        soc_pct: &[f64],
        direction: TargetDirection,
        weighting_enabled: bool,
    ) -> DistributionResult<Self> {
        if lower_w.len() != upper_w.len() || lower_w.len() != soc_pct.len() {
            return Err(DistributionError::LengthMismatch {
                lower: lower_w.len(),
                upper: upper_w.len(),
                weights: soc_pct.len(),
            });
        }
        let units = lower_w
            .iter()
            .zip(upper_w)
            .zip(soc_pct)
            .map(|((&lo, &hi), &soc)| Unit::new(lo, hi, soc))
            .collect();
        Ok(Self::new(setpoint_w, units, direction, weighting_enabled))
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    pub fn total_lower_w(&self) -> f64 {
        self.units.iter().map(|u| u.lower_w).sum()
    }

    pub fn total_upper_w(&self) -> f64 {
        self.units.iter().map(|u| u.upper_w).sum()
    }

    pub fn lower_bounds(&self) -> Vec<f64> {
        self.units.iter().map(|u| u.lower_w).collect()
    }

    pub fn upper_bounds(&self) -> Vec<f64> {
        self.units.iter().map(|u| u.upper_w).collect()
    }
}
