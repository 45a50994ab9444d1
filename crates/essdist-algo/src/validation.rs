//! Request validation and the trivial/saturated short-circuits.
//!
//! Both run before any solver. Validation is the only place a request can
//! fail; every short-circuit returns a bound-safe allocation directly.

use essdist_core::{
    Allocation, ClusterKind, DistributionError, DistributionMethod, DistributionResult,
    OperationMode, SolveRequest, TargetDirection,
};

/// Reject structurally invalid requests.
///
/// - setpoint and all bounds must be finite
/// - `lower_w <= upper_w` for every unit
/// - SoC must be within 0..=100 %
pub fn validate(request: &SolveRequest) -> DistributionResult<()> {
    if !request.setpoint_w.is_finite() {
        return Err(DistributionError::NonFiniteInput(format!(
            "setpoint {}",
            request.setpoint_w
        )));
    }

    for (index, unit) in request.units.iter().enumerate() {
        if !unit.lower_w.is_finite() || !unit.upper_w.is_finite() {
            return Err(DistributionError::NonFiniteInput(format!(
                "bounds of unit {}: [{}, {}]",
                index, unit.lower_w, unit.upper_w
            )));
        }
        if unit.lower_w > unit.upper_w {
            return Err(DistributionError::InvalidBounds {
                index,
                lower: unit.lower_w,
                upper: unit.upper_w,
            });
        }
        if !(0.0..=100.0).contains(&unit.soc_pct) {
            return Err(DistributionError::InvalidWeight {
                index,
                weight: unit.soc_pct,
            });
        }
    }
    Ok(())
}

/// Resolve requests that need no solver.
///
/// Checked in order: empty cluster, KEEP_ZERO, discharge saturation, charge
/// saturation, single unit. Returns `None` when a solver has to run.
pub fn short_circuit(request: &SolveRequest) -> Option<Allocation> {
    let kind = ClusterKind::classify(&request.units);
    let setpoint = request.setpoint_w;
    let mode = OperationMode::classify(setpoint, &request.units);

    if request.is_empty() {
        return Some(Allocation::short_circuit(
            Vec::new(),
            DistributionMethod::Empty,
            kind,
            mode,
        ));
    }

    match request.direction {
        TargetDirection::KeepZero => {
            // Zero whenever zero is admissible; otherwise the nearest bound.
            let zeros = request.units.iter().map(|u| u.clamp(0.0)).collect();
            return Some(Allocation::short_circuit(
                zeros,
                DistributionMethod::KeepZero,
                kind,
                mode,
            ));
        }
        TargetDirection::Discharge if setpoint >= request.total_upper_w() => {
            return Some(Allocation::short_circuit(
                request.upper_bounds(),
                DistributionMethod::SaturatedUpper,
                kind,
                mode,
            ));
        }
        TargetDirection::Charge => {
            let charge_capability: f64 = request.units.iter().map(|u| u.lower_w.abs()).sum();
            if setpoint.abs() >= charge_capability {
                return Some(Allocation::short_circuit(
                    request.lower_bounds(),
                    DistributionMethod::SaturatedLower,
                    kind,
                    mode,
                ));
            }
        }
        TargetDirection::Discharge => {}
    }

    if request.len() == 1 {
        let unit = &request.units[0];
        return Some(Allocation::short_circuit(
            vec![unit.clamp(setpoint)],
            DistributionMethod::SingleUnit,
            kind,
            mode,
        ));
    }

    None
}
