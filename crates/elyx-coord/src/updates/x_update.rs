//! x-update: one joint dispatch problem per agent.
//!
//! The ADMM penalty `(ρ/2)[(x − opMin·yP − s1 + u1)² + (opMax·yP − x − s2 + u2)²]`
//! expands into a diagonal quadratic coefficient ρ and a linear coefficient
//! `−ρ(a + c)` with `a = opMin·yP + s1 − u1` and `c = opMax·yP − s2 + u2`,
//! all evaluated at iteration k. The subproblem is therefore a plain QP
//! handed across the solver boundary.

use std::collections::{BTreeSet, HashMap};

use elyx_core::{PeriodIdx, Registry, State, UnitId};
use elyx_solver::{
    diagnose_infeasible, DemandRow, DispatchProblem, DispatchVar, SolveStatus, SubproblemSolver,
};
use tracing::warn;

use crate::codec::XUpdateRecord;
use crate::store::IterationStore;

/// Penalty anchors from iteration k's record.
fn anchors(rec: &crate::store::IterationRecord, op_min: f64, op_max: f64) -> (f64, f64) {
    let y_p = rec.y.get(State::Production);
    let a = op_min * y_p + rec.s.s1 - rec.u.u1;
    let c = op_max * y_p - rec.s.s2 + rec.u.u2;
    (a, c)
}

/// Interior-point backends can leave a variable a hair outside its box,
/// including pinned variables. Snap tiny values to zero and clamp to the
/// variable's own bounds before persisting.
fn sanitize(x: f64, lower: f64, upper: f64) -> f64 {
    let x = if x.abs() < 1e-6 { 0.0 } else { x };
    x.clamp(lower, upper)
}

/// SWO x-update: minimize energy cost plus demand-deviation penalty plus
/// the ADMM penalty, jointly over owned units and the agent's assigned
/// periods. Persists x and derived production at iteration k+1 and returns
/// the records to broadcast.
#[allow(clippy::too_many_arguments)]
pub fn swo_x_update<S: SubproblemSolver>(
    registry: &Registry,
    store: &mut IterationStore,
    iteration: usize,
    owned: &BTreeSet<UnitId>,
    assigned: &BTreeSet<PeriodIdx>,
    rho: f64,
    demand_weight: f64,
    time_limit: Option<f64>,
    solver: &S,
) -> Vec<XUpdateRecord> {
    let mut problem = DispatchProblem {
        time_limit,
        ..Default::default()
    };

    for &unit_id in owned {
        let Some(unit) = registry.unit(unit_id) else {
            continue;
        };
        for period in registry.periods() {
            if !assigned.contains(&period.index) {
                continue;
            }
            let prev = store.record_or_default(iteration, unit_id, period.index);
            let (a, c) = anchors(&prev, unit.op_min, unit.op_max);
            problem.vars.push(DispatchVar {
                unit: unit_id,
                period: period.index,
                linear: period.price * unit.rated_power.value() - rho * (a + c),
                quad: rho,
                lower: 0.0,
                upper: 1.0,
            });
        }
    }

    for period in registry.periods() {
        if period.demand == 0.0 || !assigned.contains(&period.index) {
            continue;
        }
        let mut members = Vec::new();
        let mut target = period.demand;
        for unit in registry.units() {
            let prev = store.record_or_default(iteration, unit.id, period.index);
            if owned.contains(&unit.id) {
                let idx = problem
                    .var_index(unit.id, period.index)
                    .expect("owned variable was just pushed");
                members.push((idx, unit.production_slope * unit.rated_power.value()));
                // Intercept contributes only while producing; estimated
                // with iteration k's indicator.
                target -= unit.production_intercept * prev.y.get(State::Production);
            } else {
                // Peers' output is a constant at their previous broadcast.
                target -= prev.production;
            }
        }
        if !members.is_empty() {
            problem.demand_rows.push(DemandRow {
                period: period.index,
                target,
                weight: demand_weight,
                members,
            });
        }
    }

    let solution = solver.solve_dispatch(&problem);
    if !solution.is_optimal() {
        warn!(
            iteration,
            status = %solution.status,
            "dispatch solve failed, falling back to previous x"
        );
        if solution.status == SolveStatus::Infeasible {
            for finding in diagnose_infeasible(&problem) {
                warn!(iteration, "{finding}");
            }
        }
    }

    let mut records = Vec::with_capacity(problem.vars.len());
    for (i, var) in problem.vars.iter().enumerate() {
        let prev = store.record_or_default(iteration, var.unit, var.period);
        let x = if solution.is_optimal() {
            sanitize(solution.x[i], var.lower, var.upper)
        } else {
            prev.x
        };
        let unit = registry.unit(var.unit).expect("var built from registry");
        let producing = prev.y.active_state() == State::Production;
        let production = unit.production(x, producing);

        let rec = store.frame_mut(iteration + 1).record_mut(var.unit, var.period);
        rec.x = x;
        rec.production = production;
        records.push(XUpdateRecord {
            unit: var.unit,
            period: var.period,
            x,
            production,
        });
    }
    records
}

/// Inputs specific to the fine-grained loop's x-update.
pub struct RtoXContext<'a> {
    /// Current global energy-balance dual price.
    pub lambda: f64,
    /// Frozen values per (unit, sub-period); `Some` pins the variable.
    pub fixed: &'a HashMap<UnitId, Vec<Option<f64>>>,
    /// Units producing in the seeding schedule's target period. Others are
    /// pinned to zero for the whole fine horizon.
    pub producing: &'a BTreeSet<UnitId>,
    pub sub_periods: usize,
}

/// RTO x-update: maximize production with the balance price tying local
/// consumption to the fleet-wide energy budget, regularized toward the
/// seeding schedule's operating fraction so the dual iteration contracts.
/// The pinned schedule makes the operating bounds hard here; already-fixed
/// sub-periods keep their frozen value through pinned bounds.
#[allow(clippy::too_many_arguments)]
pub fn rto_x_update<S: SubproblemSolver>(
    registry: &Registry,
    store: &mut IterationStore,
    iteration: usize,
    owned: &BTreeSet<UnitId>,
    rho: f64,
    ctx: &RtoXContext<'_>,
    time_limit: Option<f64>,
    solver: &S,
) -> Vec<XUpdateRecord> {
    let mut problem = DispatchProblem {
        time_limit,
        ..Default::default()
    };

    for &unit_id in owned {
        let Some(unit) = registry.unit(unit_id) else {
            continue;
        };
        let producing = ctx.producing.contains(&unit_id);
        for j in 1..=ctx.sub_periods {
            let period = elyx_core::PeriodIdx::new(j);
            // The schedule value seeded into frame 0 is the anchor.
            let x_ref = store.record_or_default(0, unit_id, period).x;
            let rated = unit.rated_power.value();

            let (lower, upper) = match ctx
                .fixed
                .get(&unit_id)
                .and_then(|f| f.get(j - 1))
                .copied()
                .flatten()
            {
                Some(v) => (v, v),
                None if producing => (unit.op_min, unit.op_max),
                None => (0.0, 0.0),
            };

            problem.vars.push(DispatchVar {
                unit: unit_id,
                period,
                linear: (ctx.lambda - unit.production_slope) * rated - 2.0 * rho * x_ref,
                quad: rho,
                lower,
                upper,
            });
        }
    }

    let solution = solver.solve_dispatch(&problem);
    if !solution.is_optimal() {
        warn!(
            iteration,
            status = %solution.status,
            "fine dispatch solve failed, falling back to previous x"
        );
        if solution.status == SolveStatus::Infeasible {
            for finding in diagnose_infeasible(&problem) {
                warn!(iteration, "{finding}");
            }
        }
    }

    let mut records = Vec::with_capacity(problem.vars.len());
    for (i, var) in problem.vars.iter().enumerate() {
        let prev = store.record_or_default(iteration, var.unit, var.period);
        let x = if solution.is_optimal() {
            sanitize(solution.x[i], var.lower, var.upper)
        } else {
            prev.x
        };
        let unit = registry.unit(var.unit).expect("var built from registry");
        let producing = ctx.producing.contains(&var.unit);
        let production = unit.production(x, producing);

        let rec = store.frame_mut(iteration + 1).record_mut(var.unit, var.period);
        rec.x = x;
        rec.production = production;
        // The fine loop pins the schedule to the seeding state.
        rec.y = prev.y;
        records.push(XUpdateRecord {
            unit: var.unit,
            period: var.period,
            x,
            production,
        });
    }
    records
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::StateVector;
    use elyx_core::{Megawatts, PeriodIdx, PeriodProfile, Unit};
    use elyx_solver::ClarabelBackend;

    fn registry(demand: f64) -> Registry {
        Registry::new(
            vec![Unit::new(UnitId::new(1), "A".into(), Megawatts(1.0)).with_op_range(0.2, 1.0)],
            vec![PeriodProfile::new(PeriodIdx::new(1), 0.0, Megawatts(1.0)).with_demand(demand)],
        )
    }

    fn owned() -> BTreeSet<UnitId> {
        [UnitId::new(1)].into_iter().collect()
    }

    fn all_periods(reg: &Registry) -> BTreeSet<PeriodIdx> {
        reg.periods().iter().map(|p| p.index).collect()
    }

    #[test]
    fn test_first_iteration_moves_toward_demand() {
        // Zero price, positive demand weight: x rises from zero, capped by
        // the proximal step w/(2ρ).
        let reg = registry(0.5);
        let mut store = IterationStore::new(4);
        let records = swo_x_update(
            &reg,
            &mut store,
            0,
            &owned(),
            &all_periods(&reg),
            1.0,
            0.2,
            None,
            &ClarabelBackend::new(),
        );
        assert_eq!(records.len(), 1);
        assert!(records[0].x > 0.05, "x = {}", records[0].x);
        assert!(records[0].x <= 0.11, "x = {}", records[0].x);
        // Persisted at iteration 1.
        let rec = store.record(1, UnitId::new(1), PeriodIdx::new(1)).unwrap();
        assert_eq!(rec.x, records[0].x);
    }

    #[test]
    fn test_production_derived_from_previous_state() {
        let reg = registry(0.5);
        let mut store = IterationStore::new(4);
        {
            let rec = store
                .frame_mut(0)
                .record_mut(UnitId::new(1), PeriodIdx::new(1));
            rec.y = StateVector::one_hot(State::Production);
            rec.x = 0.5;
            rec.s.s1 = 0.3; // projection of x - opMin at u = 0
            rec.s.s2 = 0.5;
        }
        let records = swo_x_update(
            &reg,
            &mut store,
            0,
            &owned(),
            &all_periods(&reg),
            1.0,
            0.2,
            None,
            &ClarabelBackend::new(),
        );
        assert!(records[0].production > 0.0);
        assert!((records[0].production - records[0].x).abs() < 1e-9);
    }

    #[test]
    fn test_unassigned_periods_are_skipped() {
        let reg = Registry::new(
            vec![Unit::new(UnitId::new(1), "A".into(), Megawatts(1.0)).with_op_range(0.2, 1.0)],
            (1..=2)
                .map(|t| {
                    PeriodProfile::new(PeriodIdx::new(t), 0.0, Megawatts(1.0)).with_demand(0.5)
                })
                .collect(),
        );
        let assigned: BTreeSet<PeriodIdx> = [PeriodIdx::new(1)].into_iter().collect();
        let mut store = IterationStore::new(4);
        let records = swo_x_update(
            &reg,
            &mut store,
            0,
            &owned(),
            &assigned,
            1.0,
            0.2,
            None,
            &ClarabelBackend::new(),
        );
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].period, PeriodIdx::new(1));
    }

    #[test]
    fn test_rto_pins_fixed_sub_periods() {
        let reg = registry(0.0);
        let mut store = IterationStore::new(4);
        let mut fixed = HashMap::new();
        fixed.insert(UnitId::new(1), vec![Some(0.4), None]);
        let producing: BTreeSet<UnitId> = owned();
        let ctx = RtoXContext {
            lambda: 0.0,
            fixed: &fixed,
            producing: &producing,
            sub_periods: 2,
        };
        let records = rto_x_update(
            &reg,
            &mut store,
            0,
            &owned(),
            1.0,
            &ctx,
            None,
            &ClarabelBackend::new(),
        );
        // A pinned variable persists the frozen value exactly, free of
        // solver round-off.
        assert_eq!(records[0].x, 0.4);
        // Unfixed sub-period takes a proximal step toward more production.
        assert!(records[1].x > 0.4);
    }

    #[test]
    fn test_rto_non_producing_unit_stays_at_zero() {
        let reg = registry(0.0);
        let mut store = IterationStore::new(4);
        let fixed = HashMap::new();
        let producing = BTreeSet::new();
        let ctx = RtoXContext {
            lambda: 0.0,
            fixed: &fixed,
            producing: &producing,
            sub_periods: 2,
        };
        let records = rto_x_update(
            &reg,
            &mut store,
            0,
            &owned(),
            1.0,
            &ctx,
            None,
            &ClarabelBackend::new(),
        );
        // Variables pinned to (0, 0) can come back from the interior-point
        // backend as tiny negatives; persisted values must be exactly zero
        // so downstream freezes stay inside [0, 1].
        assert!(records.iter().all(|r| r.x == 0.0));
        for j in 1..=2 {
            let rec = store.record(1, UnitId::new(1), PeriodIdx::new(j)).unwrap();
            assert_eq!(rec.x, 0.0);
        }
    }
}
