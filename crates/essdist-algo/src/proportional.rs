//! SoC-weighted proportional allocator.
//!
//! Splits the setpoint in proportion to direction-aware SoC weights so that
//! repeated cycles drive the cluster towards equal state of charge:
//!
//! ```text
//! discharge:  w_i = soc_i / 100          (full units give more)
//! charge:     w_i = 1 − soc_i / 100      (empty units take more)
//! ```
//!
//! ## Linear system
//!
//! For the free units `f_0 … f_{m−1}` the proportional split is the solution
//! of an m×m system with m−1 ratio rows and one sum row:
//!
//! ```text
//! w_{k+1}·x_k − w_k·x_{k+1} = 0      k = 0 … m−2
//! Σ x_k                     = target
//! ```
//!
//! solved by LU decomposition.
//!
//! ## Bound repair
//!
//! After each solve, the free units outside their bounds are clamped and
//! fixed as one batch, the target shrinks by the clamped total, and the
//! system is rebuilt over the remaining free units. A batch holds the
//! violators of one side only, above upper or below lower, whichever has the
//! larger total excess:
//!
//! ```text
//! T − Σ_U hi − Σ_rest lo = Σ_U (x − hi) + Σ_rest (x − lo)
//!                        ≥ E_above − E_below ≥ 0
//! ```
//!
//! so a feasible target stays feasible for the units left free (mirrored for
//! the lower side). Each pass fixes at least one unit, so the loop ends after
//! at most N passes. If every unit ends up fixed with target left over, the
//! outcome is marked not converged with a `repair` diagnostic.
//!
//! A singular reduced system stops the loop early. The values returned at
//! that point are either clamps or values from the last valid solve that
//! were not in violation, so the result stays bound-safe.

use essdist_core::solver::{LinearSystemBackend, LuSolver};
use essdist_core::{
    Diagnostics, DistributionError, DistributionResult, ProportionalConfig, TargetDirection, Unit,
};
use tracing::{debug, warn};

/// Relative residual above which a fully fixed repair counts as unconverged.
const RESIDUAL_TOLERANCE: f64 = 1e-6;

/// Output of one proportional solve.
#[derive(Debug, Clone)]
pub struct ProportionalOutcome {
    pub setpoints_w: Vec<f64>,
    /// Number of linear solves attempted
    pub iterations: u64,
    /// False if the repair loop stopped on a singular reduced system
    pub converged: bool,
    pub diagnostics: Diagnostics,
}

/// Closed-form SoC-weighted allocator with iterative bound repair.
///
/// Holds no state between calls; construct one per solve.
#[derive(Debug, Clone)]
pub struct ProportionalAllocator<B: LinearSystemBackend = LuSolver> {
    backend: B,
    violation_tolerance_w: f64,
}

impl ProportionalAllocator<LuSolver> {
    pub fn new(config: &ProportionalConfig) -> Self {
        Self {
            backend: LuSolver::with_residual_tolerance(config.singular_residual_tolerance),
            violation_tolerance_w: config.violation_tolerance_w,
        }
    }
}

impl<B: LinearSystemBackend> ProportionalAllocator<B> {
    pub fn with_backend(backend: B, config: &ProportionalConfig) -> Self {
        Self {
            backend,
            violation_tolerance_w: config.violation_tolerance_w,
        }
    }

    /// Distribute `setpoint_w` over `units` proportionally to their
    /// direction-aware SoC weights.
    ///
    /// # Errors
    ///
    /// - [`DistributionError::DegenerateWeights`] if the raw weights sum to zero
    /// - [`DistributionError::SingularSystem`] if the very first system is
    ///   singular, so there is no valid solve to fall back on
    pub fn allocate(
        &self,
        setpoint_w: f64,
        units: &[Unit],
        direction: TargetDirection,
    ) -> DistributionResult<ProportionalOutcome> {
        let weights = normalized_weights(units, direction)?;
        let n = units.len();

        let mut values = vec![0.0; n];
        let mut fixed = vec![false; n];
        let mut target = setpoint_w;
        let mut iterations = 0_u64;
        let mut converged = true;
        let mut diagnostics = Diagnostics::new();

        loop {
            let free: Vec<usize> = (0..n).filter(|&i| !fixed[i]).collect();
            if free.is_empty() {
                break;
            }
            iterations += 1;

            let (matrix, rhs) = build_system(&free, &weights, target);
            match self.backend.solve(&matrix, &rhs) {
                Ok(solution) => {
                    for (k, &i) in free.iter().enumerate() {
                        values[i] = solution[k];
                    }
                }
                Err(err) if iterations == 1 => {
                    return Err(DistributionError::SingularSystem(err.to_string()));
                }
                Err(err) => {
                    warn!(
                        iteration = iterations,
                        free = free.len(),
                        "reduced proportional system is singular, keeping last valid solve: {}",
                        err
                    );
                    diagnostics.add_warning(
                        "repair",
                        &format!(
                            "reduced system over {} free units is singular ({}); repair stopped",
                            free.len(),
                            err
                        ),
                    );
                    converged = false;
                    break;
                }
            }

            let violators = batch_violators(&free, &values, units, self.violation_tolerance_w);
            debug!(
                iteration = iterations,
                free = free.len(),
                violators = violators.len(),
                target_w = target,
                "proportional repair pass"
            );
            if violators.is_empty() {
                break;
            }

            for &i in &violators {
                values[i] = units[i].clamp(values[i]);
                fixed[i] = true;
                target -= values[i];
            }
        }

        // Every unit fixed but part of the target left over: the setpoint was
        // not reachable through clamping.
        if converged && fixed.iter().all(|&f| f) {
            let tolerance = RESIDUAL_TOLERANCE * setpoint_w.abs().max(1.0);
            if target.abs() > tolerance {
                warn!(
                    residual_w = target,
                    "all units fixed by bound repair, setpoint not reached"
                );
                diagnostics.add_warning(
                    "repair",
                    &format!("all units fixed with {} W of the setpoint unassigned", target),
                );
                converged = false;
            }
        }

        // Absorb sub-tolerance slack so the values are exactly in range.
        for (value, unit) in values.iter_mut().zip(units) {
            *value = unit.clamp(*value);
        }

        Ok(ProportionalOutcome {
            setpoints_w: values,
            iterations,
            converged,
            diagnostics,
        })
    }
}

/// Violators to clamp in one repair pass.
///
/// Only the side (above upper or below lower) with the larger total excess is
/// clamped. Clamping that side keeps the reduced target reachable by the
/// units left free, which clamping both sides at once does not.
fn batch_violators(
    free: &[usize],
    values: &[f64],
    units: &[Unit],
    tolerance_w: f64,
) -> Vec<usize> {
    let mut above = Vec::new();
    let mut below = Vec::new();
    let mut excess_above = 0.0;
    let mut excess_below = 0.0;

    for &i in free {
        let unit = &units[i];
        if values[i] > unit.upper_w + tolerance_w {
            excess_above += values[i] - unit.upper_w;
            above.push(i);
        } else if values[i] < unit.lower_w - tolerance_w || values[i].is_nan() {
            excess_below += unit.lower_w - values[i];
            below.push(i);
        }
    }

    if excess_above >= excess_below {
        above
    } else {
        below
    }
}

/// Direction-aware SoC weights normalized to sum to one.
pub fn normalized_weights(
    units: &[Unit],
    direction: TargetDirection,
) -> DistributionResult<Vec<f64>> {
    let raw: Vec<f64> = units
        .iter()
        .map(|u| direction.soc_weight(u.soc_pct).max(0.0))
        .collect();
    let sum: f64 = raw.iter().sum();
    if sum.is_nan() || sum <= 0.0 {
        return Err(DistributionError::DegenerateWeights);
    }
    Ok(raw.into_iter().map(|w| w / sum).collect())
}

/// Ratio rows between consecutive free units plus the sum row.
fn build_system(free: &[usize], weights: &[f64], target: f64) -> (Vec<Vec<f64>>, Vec<f64>) {
    let m = free.len();
    let mut matrix = vec![vec![0.0; m]; m];
    let mut rhs = vec![0.0; m];

    for k in 0..m.saturating_sub(1) {
        matrix[k][k] = weights[free[k + 1]];
        matrix[k][k + 1] = -weights[free[k]];
    }
    matrix[m - 1].iter_mut().for_each(|a| *a = 1.0);
    rhs[m - 1] = target;

    (matrix, rhs)
}
