//! Frame-level feasibility checking.
//!
//! The convergence decision in the SWO loop is a feasibility test on the
//! just-written frame: state indicators one-hot, operating bounds satisfied
//! for the active state, transitions legal, ramp within limits. Tolerances
//! are bounded relative with an absolute floor, so tiny units are not held
//! to impossible precision.

use std::collections::BTreeSet;

use elyx_core::{Registry, State, UnitId};

use crate::store::IterationFrame;

/// Tolerances for the feasibility test.
#[derive(Debug, Clone, Copy)]
pub struct Tolerances {
    /// Allowed deviation of a state indicator from {0, 1}.
    pub one_hot: f64,
    /// Relative operating-bound tolerance.
    pub op_rel: f64,
    /// Absolute operating-bound floor.
    pub op_abs: f64,
}

impl Default for Tolerances {
    fn default() -> Self {
        Self {
            one_hot: 0.01,
            op_rel: 0.005,
            op_abs: 0.01,
        }
    }
}

impl Tolerances {
    fn op_tol(&self, bound: f64) -> f64 {
        (self.op_rel * bound.abs()).max(self.op_abs)
    }
}

/// Outcome of a feasibility check; feasible iff no violations were found.
#[derive(Debug, Clone, Default)]
pub struct FeasibilityReport {
    pub violations: Vec<String>,
}

impl FeasibilityReport {
    pub fn is_feasible(&self) -> bool {
        self.violations.is_empty()
    }
}

/// Check one frame for the owned units against the registry's constraints.
pub fn check_frame(
    registry: &Registry,
    frame: &IterationFrame,
    owned: &BTreeSet<UnitId>,
    tol: &Tolerances,
) -> FeasibilityReport {
    let mut report = FeasibilityReport::default();

    for &unit_id in owned {
        let Some(unit) = registry.unit(unit_id) else {
            report
                .violations
                .push(format!("unit {unit_id} missing from registry"));
            continue;
        };

        let mut prev: Option<(State, f64)> = None;
        for period in registry.periods() {
            let rec = frame.record_or_default(unit_id, period.index);

            if !rec.y.is_one_hot(tol.one_hot) {
                report.violations.push(format!(
                    "unit {unit_id} period {}: state indicators {:?} are not one-hot",
                    period.index, rec.y.0
                ));
            }
            let state = rec.y.active_state();

            if state == State::Production {
                let lo = unit.op_min - tol.op_tol(unit.op_min);
                let hi = unit.op_max + tol.op_tol(unit.op_max);
                if rec.x < lo || rec.x > hi {
                    report.violations.push(format!(
                        "unit {unit_id} period {}: x = {} outside producing range [{}, {}]",
                        period.index, rec.x, unit.op_min, unit.op_max
                    ));
                }
            } else if rec.x.abs() > tol.op_abs {
                report.violations.push(format!(
                    "unit {unit_id} period {}: x = {} while not producing",
                    period.index, rec.x
                ));
            }

            if let Some((prev_state, prev_x)) = prev {
                if !state.can_follow(prev_state) {
                    report.violations.push(format!(
                        "unit {unit_id} period {}: illegal transition {prev_state} -> {state}",
                        period.index
                    ));
                }
                if (rec.x - prev_x).abs() > unit.ramp_limit + tol.op_abs {
                    report.violations.push(format!(
                        "unit {unit_id} period {}: ramp {} exceeds limit {}",
                        period.index,
                        (rec.x - prev_x).abs(),
                        unit.ramp_limit
                    ));
                }
            }
            prev = Some((state, rec.x));
        }
    }

    report
}

/// Verify minimum dwell and the startup hold over a converged frame.
///
/// Runs truncated by the end of the horizon are exempt, matching the
/// transition rules (dwell binds exits, not the final partial run).
pub fn check_dwell(
    registry: &Registry,
    frame: &IterationFrame,
    owned: &BTreeSet<UnitId>,
) -> FeasibilityReport {
    let mut report = FeasibilityReport::default();

    for &unit_id in owned {
        let Some(unit) = registry.unit(unit_id) else {
            continue;
        };
        let states: Vec<State> = registry
            .periods()
            .iter()
            .map(|p| frame.record_or_default(unit_id, p.index).y.active_state())
            .collect();

        let mut run_start = 0;
        for t in 1..=states.len() {
            let run_ended = t == states.len() || states[t] != states[run_start];
            if !run_ended {
                continue;
            }
            let s = states[run_start];
            let run_len = t - run_start;
            if t < states.len() && run_len < unit.min_dwell[s.index()].max(1) as usize {
                report.violations.push(format!(
                    "unit {unit_id}: state {s} held {run_len} periods, dwell requires {}",
                    unit.min_dwell[s.index()]
                ));
            }
            if t < states.len()
                && s == State::Starting
                && states[t] == State::Production
                && run_len < unit.startup_hold.max(1) as usize
            {
                report.violations.push(format!(
                    "unit {unit_id}: PRODUCTION after only {run_len} STARTING periods, hold is {}",
                    unit.startup_hold
                ));
            }
            run_start = t;
        }
    }

    report
}
