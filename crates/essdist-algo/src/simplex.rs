//! Penalized Nelder-Mead allocator for the equal (unweighted) split.
//!
//! Minimizes the spread of the allocation, measured as the population
//! standard deviation, subject to `Σx = setpoint` and per-unit bounds. The
//! constraints are folded into the objective by composing two closures:
//!
//! ```text
//! objective(p)        = σ(p)
//! repair(x)           = clamp(x + (setpoint − Σx)·s)       s: capacity shares
//! penalized(x)        = objective(repair(x))
//!                     + μ_eq · |setpoint − Σ repair(x)|
//!                     + μ_bd · Σ_i dist(x_i + (setpoint − Σx)·s_i, [lo_i, hi_i])
//! ```
//!
//! Each evaluation returns the repaired point together with its cost, so the
//! search works on raw coordinates while every candidate it reports is
//! already inside the bounds. The returned allocation is the best repaired
//! candidate, i.e. the repaired best vertex of the final simplex, after
//! [`settle_residual`] spreads any remaining sum residual over the units'
//! headroom.
//!
//! The sum constraint is a soft penalty inside the search. Tracking
//! tolerances for a setpoint within `[Σlower, Σupper]`:
//!
//! - no clamp active: `|Σx − setpoint| < 1e-3 · max(1, |setpoint|)`
//!   (exact up to rounding, the redistribution step enforces it)
//! - clamp active: `|Σx − setpoint| < 1e-2 · max(1, Σ(upper − lower))`,
//!   i.e. within 1 % of the cluster's operating range
//!
//! Bound safety holds unconditionally.
//!
//! Worst-case latency is bounded by the iteration and evaluation caps in
//! [`SimplexConfig`]. Hitting a cap is not an error: the best candidate so
//! far is returned and a diagnostic is recorded.

use std::cell::{Cell, RefCell};

use argmin::core::{CostFunction, Error, Executor, State, TerminationReason};
use argmin::solver::neldermead::NelderMead;
use essdist_core::{Diagnostics, SimplexConfig, Unit};
use tracing::{debug, warn};

const EVALUATION_CAP_REACHED: &str = "objective evaluation cap reached";

/// Output of one simplex solve.
#[derive(Debug, Clone)]
pub struct SimplexOutcome {
    pub setpoints_w: Vec<f64>,
    /// Completed Nelder-Mead iterations (0 when the run was cut off by the
    /// evaluation cap)
    pub iterations: u64,
    pub evaluations: u64,
    /// True only if the simplex met its tolerance before any cap
    pub converged: bool,
    pub diagnostics: Diagnostics,
}

/// One evaluation of the penalized objective.
#[derive(Debug, Clone)]
pub struct Evaluation {
    pub cost: f64,
    /// Candidate after redistribution and clamping
    pub point: Vec<f64>,
}

/// Explicit inputs of the penalty wrapper.
#[derive(Debug, Clone)]
pub struct PenaltyTerms<'a> {
    pub units: &'a [Unit],
    pub setpoint_w: f64,
    pub equality_penalty: f64,
    pub bound_penalty: f64,
}

/// Population standard deviation.
pub fn population_std_dev(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let variance = values.iter().map(|v| (v - mean) * (v - mean)).sum::<f64>() / n;
    variance.sqrt()
}

/// Shares used to spread a sum offset over the units.
///
/// A positive offset (more discharge needed) is spread by upper-bound
/// capacity. Negative offsets deliberately depart from that upper-share
/// rule: they are spread by charge capacity `|lower|`, so a charge offset
/// lands on the units able to absorb it. Falls back to equal shares when the
/// relevant capacity sums to zero.
fn offset_shares(units: &[Unit], offset: f64) -> Vec<f64> {
    let capacity: Vec<f64> = if offset >= 0.0 {
        units.iter().map(|u| u.upper_w.max(0.0)).collect()
    } else {
        units.iter().map(|u| (-u.lower_w).max(0.0)).collect()
    };
    let total: f64 = capacity.iter().sum();
    if total > 0.0 {
        capacity.into_iter().map(|c| c / total).collect()
    } else {
        vec![1.0 / units.len() as f64; units.len()]
    }
}

/// Wrap `objective` with the sum and bound penalties.
///
/// The returned closure is pure: it neither mutates its input nor keeps
/// state between calls.
pub fn penalize<'a, F>(
    objective: F,
    terms: PenaltyTerms<'a>,
) -> impl Fn(&[f64]) -> Evaluation + 'a
where
    F: Fn(&[f64]) -> f64 + 'a,
{
    let upward = offset_shares(terms.units, 1.0);
    let downward = offset_shares(terms.units, -1.0);

    move |candidate: &[f64]| {
        let offset = terms.setpoint_w - candidate.iter().sum::<f64>();
        let shares = if offset >= 0.0 { &upward } else { &downward };

        let mut violation = 0.0;
        let point: Vec<f64> = candidate
            .iter()
            .zip(shares)
            .zip(terms.units)
            .map(|((&x, &share), unit)| {
                let shifted = x + offset * share;
                let clamped = unit.clamp(shifted);
                violation += (shifted - clamped).abs();
                clamped
            })
            .collect();

        let residual = (terms.setpoint_w - point.iter().sum::<f64>()).abs();
        let cost = objective(&point)
            + terms.equality_penalty * residual
            + terms.bound_penalty * violation;

        Evaluation { cost, point }
    }
}

/// Per-solve bookkeeping: evaluation count against the cap and the best
/// repaired candidate seen so far. Lives on the stack of one `allocate` call.
struct EvaluationLedger {
    max_evaluations: u64,
    evaluations: Cell<u64>,
    best: RefCell<Option<Evaluation>>,
}

impl EvaluationLedger {
    fn new(max_evaluations: u64) -> Self {
        Self {
            max_evaluations,
            evaluations: Cell::new(0),
            best: RefCell::new(None),
        }
    }
}

/// argmin adapter around the penalized objective.
struct PenalizedProblem<'p, F> {
    evaluate: &'p F,
    ledger: &'p EvaluationLedger,
}

impl<'p, F> CostFunction for PenalizedProblem<'p, F>
where
    F: Fn(&[f64]) -> Evaluation,
{
    type Param = Vec<f64>;
    type Output = f64;

    fn cost(&self, param: &Self::Param) -> Result<Self::Output, Error> {
        let used = self.ledger.evaluations.get();
        if used >= self.ledger.max_evaluations {
            return Err(Error::msg(EVALUATION_CAP_REACHED));
        }
        self.ledger.evaluations.set(used + 1);

        let evaluation = (self.evaluate)(param);
        let cost = evaluation.cost;
        let mut best = self.ledger.best.borrow_mut();
        if best.as_ref().map_or(true, |b| cost < b.cost) {
            *best = Some(evaluation);
        }
        Ok(cost)
    }
}

/// Derivative-free fallback for unweighted distribution.
#[derive(Debug, Clone)]
pub struct PenalizedSimplexAllocator<'a> {
    config: &'a SimplexConfig,
}

impl<'a> PenalizedSimplexAllocator<'a> {
    pub fn new(config: &'a SimplexConfig) -> Self {
        Self { config }
    }

    pub fn allocate(&self, setpoint_w: f64, units: &[Unit]) -> SimplexOutcome {
        let n = units.len();
        let total_upper: f64 = units.iter().map(|u| u.upper_w).sum();
        let total_lower: f64 = units.iter().map(|u| u.lower_w).sum();

        if setpoint_w >= total_upper {
            return SimplexOutcome::direct(units.iter().map(|u| u.upper_w).collect());
        }
        if setpoint_w <= total_lower {
            return SimplexOutcome::direct(units.iter().map(|u| u.lower_w).collect());
        }
        if n == 1 {
            return SimplexOutcome::direct(vec![units[0].clamp(setpoint_w)]);
        }

        let evaluate = penalize(
            population_std_dev,
            PenaltyTerms {
                units,
                setpoint_w,
                equality_penalty: self.config.equality_penalty,
                bound_penalty: self.config.bound_penalty,
            },
        );
        let ledger = EvaluationLedger::new(self.config.max_evaluations);
        let problem = PenalizedProblem {
            evaluate: &evaluate,
            ledger: &ledger,
        };

        let mut diagnostics = Diagnostics::new();
        let mut iterations = 0;
        let mut converged = false;

        match NelderMead::new(initial_simplex(n, self.config.initial_step_w))
            .with_sd_tolerance(self.config.sd_tolerance)
        {
            Ok(solver) => {
                let max_iterations = self.config.max_iterations;
                let result = Executor::new(problem, solver)
                    .configure(|state| state.max_iters(max_iterations))
                    .run();
                match result {
                    Ok(res) => {
                        let state = res.state();
                        iterations = state.get_iter();
                        converged = matches!(
                            state.get_termination_reason(),
                            Some(TerminationReason::SolverConverged)
                        );
                        if !converged {
                            warn!(
                                iterations,
                                "simplex search stopped before convergence: {:?}",
                                state.get_termination_reason()
                            );
                            diagnostics.add_warning(
                                "optimizer",
                                &format!(
                                    "simplex stopped after {} iterations above sd tolerance {:e}",
                                    iterations, self.config.sd_tolerance
                                ),
                            );
                        }
                    }
                    Err(err) => {
                        warn!("simplex search aborted: {}", err);
                        diagnostics.add_warning(
                            "optimizer",
                            &format!(
                                "simplex aborted ({}) after {} evaluations",
                                err,
                                ledger.evaluations.get()
                            ),
                        );
                    }
                }
            }
            Err(err) => {
                warn!("could not set up simplex search: {}", err);
                diagnostics.add_warning("optimizer", &format!("simplex setup failed: {}", err));
            }
        }

        let evaluations = ledger.evaluations.get();
        let mut setpoints_w = match ledger.best.into_inner() {
            Some(best) => best.point,
            // Nothing was evaluated; repair the starting point directly.
            None => evaluate(&vec![0.0; n]).point,
        };
        settle_residual(&mut setpoints_w, units, setpoint_w);

        let realized: f64 = setpoints_w.iter().sum();
        debug!(
            iterations,
            evaluations,
            converged,
            residual_w = (setpoint_w - realized).abs(),
            "simplex allocation finished"
        );

        SimplexOutcome {
            setpoints_w,
            iterations,
            evaluations,
            converged,
            diagnostics,
        }
    }
}

impl SimplexOutcome {
    fn direct(setpoints_w: Vec<f64>) -> Self {
        Self {
            setpoints_w,
            iterations: 0,
            evaluations: 0,
            converged: true,
            diagnostics: Diagnostics::new(),
        }
    }
}

/// Spread what is left of `setpoint − Σvalues` over the units' remaining
/// headroom, proportionally to that headroom.
///
/// Each unit moves by at most its own headroom, so values stay in range;
/// when the setpoint is within the cluster's bounds the sum becomes exact.
pub fn settle_residual(values: &mut [f64], units: &[Unit], setpoint_w: f64) {
    let residual = setpoint_w - values.iter().sum::<f64>();
    if residual == 0.0 || !residual.is_finite() {
        return;
    }
    let headroom: Vec<f64> = values
        .iter()
        .zip(units)
        .map(|(&v, u)| {
            if residual > 0.0 {
                (u.upper_w - v).max(0.0)
            } else {
                (v - u.lower_w).max(0.0)
            }
        })
        .collect();
    let total: f64 = headroom.iter().sum();
    if total <= 0.0 {
        return;
    }
    let fraction = (residual.abs() / total).min(1.0);
    for ((value, room), unit) in values.iter_mut().zip(&headroom).zip(units) {
        let step = room * fraction;
        let moved = if residual > 0.0 { *value + step } else { *value - step };
        *value = unit.clamp(moved);
    }
    debug!(residual_w = residual, "settled simplex residual over headroom");
}

/// Zero vector plus one unit step along each axis.
fn initial_simplex(n: usize, step: f64) -> Vec<Vec<f64>> {
    let mut vertices = Vec::with_capacity(n + 1);
    vertices.push(vec![0.0; n]);
    for i in 0..n {
        let mut vertex = vec![0.0; n];
        vertex[i] = step;
        vertices.push(vertex);
    }
    vertices
}

#[cfg(test)]
mod tests {
    use super::*;

    fn units3() -> Vec<Unit> {
        vec![Unit::new(-1000.0, 1000.0, 50.0); 3]
    }

    #[test]
    fn std_dev_of_known_values() {
        assert_eq!(population_std_dev(&[]), 0.0);
        assert_eq!(population_std_dev(&[5.0, 5.0, 5.0]), 0.0);
        let values = [2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0];
        assert!((population_std_dev(&values) - 2.0).abs() < 1e-12);
    }

    #[test]
    fn shares_follow_offset_direction() {
        let units = [Unit::new(-300.0, 100.0, 0.0), Unit::new(-100.0, 300.0, 0.0)];
        assert_eq!(offset_shares(&units, 10.0), vec![0.25, 0.75]);
        assert_eq!(offset_shares(&units, -10.0), vec![0.75, 0.25]);

        let no_discharge = [Unit::new(-300.0, 0.0, 0.0), Unit::new(-100.0, 0.0, 0.0)];
        assert_eq!(offset_shares(&no_discharge, 10.0), vec![0.5, 0.5]);
    }

    #[test]
    fn penalty_repairs_without_mutating_input() {
        let units = units3();
        let evaluate = penalize(
            population_std_dev,
            PenaltyTerms {
                units: &units,
                setpoint_w: 1500.0,
                equality_penalty: 10.0,
                bound_penalty: 10.0,
            },
        );

        let candidate = vec![0.0, 0.0, 0.0];
        let eval = evaluate(&candidate);
        assert_eq!(candidate, vec![0.0, 0.0, 0.0]);
        assert_eq!(eval.point, vec![500.0, 500.0, 500.0]);
        assert!(eval.cost.abs() < 1e-9);

        // Same input, same output.
        let again = evaluate(&candidate);
        assert_eq!(again.point, eval.point);
        assert_eq!(again.cost, eval.cost);
    }

    #[test]
    fn penalty_clamps_and_charges_violations() {
        let units = units3();
        let evaluate = penalize(
            population_std_dev,
            PenaltyTerms {
                units: &units,
                setpoint_w: 1500.0,
                equality_penalty: 10.0,
                bound_penalty: 10.0,
            },
        );

        let eval = evaluate(&[1200.0, 0.0, 0.0]);
        // shift by +100 each, first coordinate clamped from 1300 to 1000
        assert_eq!(eval.point, vec![1000.0, 100.0, 100.0]);
        let expected = population_std_dev(&[1000.0, 100.0, 100.0]) + 10.0 * 300.0 + 10.0 * 300.0;
        assert!((eval.cost - expected).abs() < 1e-9);
    }

    #[test]
    fn equal_units_split_equally() {
        let config = SimplexConfig::default();
        let out = PenalizedSimplexAllocator::new(&config).allocate(1500.0, &units3());

        for value in &out.setpoints_w {
            assert!((value - 500.0).abs() < 1e-3, "got {:?}", out.setpoints_w);
        }
        assert!((out.setpoints_w.iter().sum::<f64>() - 1500.0).abs() < 1e-6);
        assert!(out.evaluations > 0);
    }

    #[test]
    fn narrow_unit_saturates_and_rest_is_shared() {
        let units = vec![
            Unit::new(-100.0, 100.0, 50.0),
            Unit::new(-1000.0, 1000.0, 50.0),
            Unit::new(-1000.0, 1000.0, 50.0),
        ];
        let config = SimplexConfig::default();
        let out = PenalizedSimplexAllocator::new(&config).allocate(1300.0, &units);

        for (value, unit) in out.setpoints_w.iter().zip(&units) {
            assert!(unit.admits(*value, 0.0));
        }
        assert!((out.setpoints_w.iter().sum::<f64>() - 1300.0).abs() < 1.0);
        assert!((out.setpoints_w[0] - 100.0).abs() < 1.0);
        assert!((out.setpoints_w[1] - out.setpoints_w[2]).abs() < 1.0);
    }

    #[test]
    fn saturation_skips_the_optimizer() {
        let config = SimplexConfig::default();
        let allocator = PenalizedSimplexAllocator::new(&config);

        let out = allocator.allocate(5000.0, &units3());
        assert_eq!(out.setpoints_w, vec![1000.0; 3]);
        assert_eq!(out.evaluations, 0);

        let out = allocator.allocate(-5000.0, &units3());
        assert_eq!(out.setpoints_w, vec![-1000.0; 3]);
        assert_eq!(out.evaluations, 0);
    }

    #[test]
    fn evaluation_cap_returns_best_so_far() {
        let config = SimplexConfig {
            max_evaluations: 8,
            ..SimplexConfig::default()
        };
        let units = vec![
            Unit::new(-100.0, 100.0, 50.0),
            Unit::new(-1000.0, 1000.0, 50.0),
            Unit::new(-1000.0, 1000.0, 50.0),
        ];
        let out = PenalizedSimplexAllocator::new(&config).allocate(1300.0, &units);

        assert!(!out.converged);
        assert_eq!(out.evaluations, 8);
        assert_eq!(out.diagnostics.issues_by_category("optimizer").count(), 1);
        for (value, unit) in out.setpoints_w.iter().zip(&units) {
            assert!(unit.admits(*value, 0.0));
        }
    }

    #[test]
    fn residual_is_settled_over_headroom() {
        let units = vec![
            Unit::new(0.0, 100.0, 50.0),
            Unit::new(500.0, 1000.0, 50.0),
            Unit::new(-200.0, 200.0, 50.0),
        ];
        // headroom up: 0, 400, 100
        let mut values = vec![100.0, 600.0, 100.0];
        settle_residual(&mut values, &units, 1050.0);
        assert_eq!(values[0], 100.0);
        assert!((values[1] - 800.0).abs() < 1e-9);
        assert!((values[2] - 150.0).abs() < 1e-9);

        // headroom down: 100, 100, 300
        let mut values = vec![100.0, 600.0, 100.0];
        settle_residual(&mut values, &units, 550.0);
        assert!((values.iter().sum::<f64>() - 550.0).abs() < 1e-9);
        for (value, unit) in values.iter().zip(&units) {
            assert!(unit.admits(*value, 0.0));
        }
    }

    #[test]
    fn clamped_equal_split_tracks_setpoint() {
        let units = vec![
            Unit::new(0.0, 100.0, 50.0),
            Unit::new(500.0, 1000.0, 50.0),
        ];
        let config = SimplexConfig::default();
        let out = PenalizedSimplexAllocator::new(&config).allocate(700.0, &units);

        for (value, unit) in out.setpoints_w.iter().zip(&units) {
            assert!(unit.admits(*value, 0.0));
        }
        assert!((out.setpoints_w.iter().sum::<f64>() - 700.0).abs() < 1e-6);
    }

    #[test]
    fn initial_simplex_shape() {
        let simplex = initial_simplex(2, 1.0);
        assert_eq!(simplex, vec![vec![0.0, 0.0], vec![1.0, 0.0], vec![0.0, 1.0]]);
    }
}
