//! Distribution solver façade.
//!
//! Runs validation and the short-circuits, dispatches to the proportional or
//! simplex allocator, and re-checks every value against its bounds before
//! the allocation leaves the crate.
//!
//! ```text
//! validate ─► short_circuit ─► weighted? ─yes─► ProportionalAllocator
//!                                  │                  │ DegenerateWeights
//!                                  │                  │ SingularSystem
//!                                  no                 ▼
//!                                  └──────────► PenalizedSimplexAllocator
//!                                                     │
//!                                              enforce_bounds
//! ```
//!
//! Only malformed requests are returned as errors. Everything else degrades
//! to a bound-safe allocation with diagnostics attached.

use essdist_core::{
    Allocation, ClusterKind, Diagnostics, DistributionConfig, DistributionError,
    DistributionMethod, DistributionResult, OperationMode, SolveRequest, TargetDirection, Unit,
};
use tracing::{debug, warn};
use web_time::Instant;

use crate::proportional::ProportionalAllocator;
use crate::simplex::PenalizedSimplexAllocator;
use crate::validation::{short_circuit, validate};

/// Stateless entry point for one distribution solve per control cycle.
///
/// The solver only holds its configuration; every call builds fresh
/// allocator state, so one instance can be shared between threads.
#[derive(Debug, Clone, Default)]
pub struct DistributionSolver {
    config: DistributionConfig,
}

impl DistributionSolver {
    pub fn new(config: DistributionConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &DistributionConfig {
        &self.config
    }

    /// Compute per-unit setpoints for `request`.
    ///
    /// # Errors
    ///
    /// Only malformed requests fail: inverted or non-finite bounds, a
    /// non-finite setpoint, or a SoC outside 0..=100 %.
    pub fn solve(&self, request: &SolveRequest) -> DistributionResult<Allocation> {
        let start = Instant::now();
        validate(request)?;

        if let Some(allocation) = short_circuit(request) {
            debug!(
                units = request.len(),
                method = %allocation.method,
                "short-circuit allocation"
            );
            return Ok(allocation);
        }

        let kind = ClusterKind::classify(&request.units);
        let mut allocation = if request.weighting_enabled
            && request.direction != TargetDirection::KeepZero
        {
            self.weighted(request, kind)
        } else {
            self.equal(request, kind, Diagnostics::new())
        };

        enforce_bounds(
            &mut allocation.setpoints_w,
            &request.units,
            self.config.post_check_tolerance_w,
            &mut allocation.diagnostics,
        );

        debug!(
            units = request.len(),
            method = %allocation.method,
            cluster = ?allocation.cluster_kind,
            mode = ?allocation.operation_mode,
            iterations = allocation.iterations,
            evaluations = allocation.evaluations,
            converged = allocation.converged,
            tracking_error_w = allocation.tracking_error_w(request.setpoint_w),
            elapsed_us = start.elapsed().as_micros() as u64,
            "distribution solved"
        );
        Ok(allocation)
    }

    fn weighted(&self, request: &SolveRequest, kind: ClusterKind) -> Allocation {
        let allocator = ProportionalAllocator::new(&self.config.proportional);
        match allocator.allocate(request.setpoint_w, &request.units, request.direction) {
            Ok(outcome) => Allocation {
                setpoints_w: outcome.setpoints_w,
                method: DistributionMethod::Proportional,
                iterations: outcome.iterations,
                evaluations: 0,
                converged: outcome.converged,
                cluster_kind: kind,
                operation_mode: OperationMode::classify(request.setpoint_w, &request.units),
                diagnostics: outcome.diagnostics,
            },
            Err(
                err @ (DistributionError::DegenerateWeights
                | DistributionError::SingularSystem(_)),
            ) => {
                debug!("weighted split unavailable, using equal split: {}", err);
                let mut diagnostics = Diagnostics::new();
                diagnostics.add_warning(
                    "fallback",
                    &format!("{}; distributed equally instead", err),
                );
                self.equal(request, kind, diagnostics)
            }
            // The allocator only reports the two recoverable errors above.
            Err(err) => {
                warn!("unexpected proportional failure, using equal split: {}", err);
                let mut diagnostics = Diagnostics::new();
                diagnostics.add_error("fallback", &err.to_string());
                self.equal(request, kind, diagnostics)
            }
        }
    }

    fn equal(
        &self,
        request: &SolveRequest,
        kind: ClusterKind,
        mut diagnostics: Diagnostics,
    ) -> Allocation {
        let outcome = PenalizedSimplexAllocator::new(&self.config.simplex)
            .allocate(request.setpoint_w, &request.units);
        diagnostics.merge(outcome.diagnostics);
        Allocation {
            setpoints_w: outcome.setpoints_w,
            method: DistributionMethod::Simplex,
            iterations: outcome.iterations,
            evaluations: outcome.evaluations,
            converged: outcome.converged,
            cluster_kind: kind,
            operation_mode: OperationMode::classify(request.setpoint_w, &request.units),
            diagnostics,
        }
    }
}

/// Solve with the default configuration.
pub fn solve(
    setpoint_w: f64,
    units: &[Unit],
    direction: TargetDirection,
    weighting_enabled: bool,
) -> DistributionResult<Allocation> {
    let request = SolveRequest::new(setpoint_w, units.to_vec(), direction, weighting_enabled);
    DistributionSolver::default().solve(&request)
}

/// Clamp every value into its unit's bounds.
///
/// Values further than `tolerance_w` outside (or non-finite) indicate a
/// solver defect: they are logged and recorded as `post-check` errors.
/// Returns the number of such values.
pub fn enforce_bounds(
    values: &mut [f64],
    units: &[Unit],
    tolerance_w: f64,
    diagnostics: &mut Diagnostics,
) -> usize {
    let mut flagged = 0;
    for (index, (value, unit)) in values.iter_mut().zip(units).enumerate() {
        let clamped = unit.clamp(*value);
        if !value.is_finite() || !unit.admits(*value, tolerance_w) {
            warn!(
                unit = index,
                value_w = *value,
                lower_w = unit.lower_w,
                upper_w = unit.upper_w,
                "allocation outside bounds, re-clamped"
            );
            diagnostics.add_error_for_unit(
                "post-check",
                &format!(
                    "value {} W outside [{}, {}] W, clamped to {} W",
                    value, unit.lower_w, unit.upper_w, clamped
                ),
                index,
            );
            flagged += 1;
        }
        *value = clamped;
    }
    flagged
}
