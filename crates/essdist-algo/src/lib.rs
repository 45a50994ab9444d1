//! # essdist-algo: Power Distribution Solvers for ESS Clusters
//!
//! Splits one aggregate power setpoint over N battery units without ever
//! leaving any unit's permitted range.
//!
//! ## Solve paths
//!
//! | Method | When | Setpoint tracking |
//! |--------|------|-------------------|
//! | short-circuit | empty, KEEP_ZERO, saturated, single unit | exact or saturated |
//! | [`ProportionalAllocator`] | SoC weighting enabled | exact (< 1e-6 W) |
//! | [`PenalizedSimplexAllocator`] | no weighting, or weights degenerate | soft penalty |
//!
//! The [`DistributionSolver`] façade picks the path and re-clamps the final
//! values against the bounds, recording a diagnostic if that ever changes
//! anything.
//!
//! ## Example
//!
//! ```
//! use essdist_algo::DistributionSolver;
//! use essdist_core::{DistributionConfig, DistributionMethod, SolveRequest, TargetDirection, Unit};
//!
//! let request = SolveRequest::new(
//!     -2000.0,
//!     vec![
//!         Unit::new(-2000.0, 2000.0, 90.0),
//!         Unit::new(-2000.0, 2000.0, 10.0),
//!     ],
//!     TargetDirection::Charge,
//!     true,
//! );
//!
//! let solver = DistributionSolver::new(DistributionConfig::default());
//! let allocation = solver.solve(&request).unwrap();
//!
//! assert_eq!(allocation.method, DistributionMethod::Proportional);
//! // The emptier unit takes the larger charge.
//! assert!(allocation.setpoints_w[1] < allocation.setpoints_w[0]);
//! ```

pub mod distribution;
pub mod proportional;
pub mod simplex;
pub mod validation;

pub use distribution::{enforce_bounds, solve, DistributionSolver};
pub use proportional::{normalized_weights, ProportionalAllocator, ProportionalOutcome};
pub use simplex::{
    penalize, population_std_dev, settle_residual, Evaluation, PenalizedSimplexAllocator,
    PenaltyTerms, SimplexOutcome,
};
pub use validation::{short_circuit, validate};
