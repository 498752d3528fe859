//! y-update: one schedule problem per owned unit.
//!
//! Stage costs combine startup/standby cost, the ADMM penalties, and the
//! demand-deviation penalty, all evaluated at the just-updated x
//! (iteration k+1), with `yP = [state == PRODUCTION]`. Each candidate
//! state is costed at its own projected slacks (the s-update that follows
//! is exactly that projection), so a wide feasible band never reads as a
//! penalty against entering PRODUCTION. The state-sum penalty
//! `(ρ/2)(Σy − 1 + u3)²` is constant across integral states and enters only
//! as bookkeeping. Structural legality (period 1 IDLE, reachability, dwell,
//! startup hold) lives in the solver's transition rules, not in the costs.

use std::collections::BTreeSet;

use elyx_core::{Registry, State, UnitId};
use elyx_solver::{ScheduleProblem, SubproblemSolver};
use tracing::warn;

use crate::store::{IterationStore, StateVector};

/// Penalty of choosing `state` at (unit, period) given the surrounding
/// iterate values. The slacks are projected per candidate state, which
/// reduces each bound penalty to the negative part of its shifted
/// violation: `min(0, g + u)²`.
fn stage_cost(
    unit: &elyx_core::Unit,
    state: State,
    x_new: f64,
    rec_prev: &crate::store::IterationRecord,
    rho: f64,
) -> f64 {
    let y_p = if state == State::Production { 1.0 } else { 0.0 };
    let lower = (x_new - unit.op_min * y_p + rec_prev.u.u1).min(0.0);
    let upper = (unit.op_max * y_p - x_new + rec_prev.u.u2).min(0.0);
    let state_sum = rec_prev.u.u3;

    let mut cost = (rho / 2.0) * (lower * lower + upper * upper + state_sum * state_sum);
    match state {
        State::Starting => cost += unit.cost_startup,
        State::Standby => cost += unit.cost_standby,
        _ => {}
    }
    cost
}

/// Run the schedule update for every owned unit, writing one-hot state
/// indicators and the implied production at iteration k+1. On solver
/// failure the unit keeps iteration k's states (IDLE where none exist).
pub fn swo_y_update<S: SubproblemSolver>(
    registry: &Registry,
    store: &mut IterationStore,
    iteration: usize,
    owned: &BTreeSet<UnitId>,
    rho: f64,
    demand_weight: f64,
    solver: &S,
) {
    let horizon = registry.horizon();

    // Fleet production per period from the merged frame, so each unit's
    // candidate states can be costed against the shortfall they leave.
    let fleet_production: Vec<f64> = registry
        .periods()
        .iter()
        .map(|p| {
            registry
                .units()
                .iter()
                .map(|u| store.record_or_default(iteration + 1, u.id, p.index).production)
                .sum()
        })
        .collect();

    for &unit_id in owned {
        let Some(unit) = registry.unit(unit_id) else {
            continue;
        };

        let mut cost = Vec::with_capacity(horizon);
        for (t, period) in registry.periods().iter().enumerate() {
            let rec_new = store.record_or_default(iteration + 1, unit_id, period.index);
            let x_new = rec_new.x;
            let others = fleet_production[t] - rec_new.production;
            let prev = store.record_or_default(iteration, unit_id, period.index);
            let mut row = [0.0; 4];
            for state in State::ALL {
                let mut c = stage_cost(unit, state, x_new, &prev, rho);
                if period.demand > 0.0 {
                    let own = unit.production(x_new, state == State::Production);
                    c += demand_weight * (others + own - period.demand).abs();
                }
                row[state.index()] = c;
            }
            cost.push(row);
        }

        let problem = ScheduleProblem {
            unit: unit_id,
            periods: horizon,
            cost,
            min_dwell: unit.min_dwell,
            startup_hold: unit.startup_hold,
            first_period_idle: true,
        };

        let solution = solver.solve_schedule(&problem);
        if solution.is_optimal() {
            for (t, period) in registry.periods().iter().enumerate() {
                let rec = store
                    .frame_mut(iteration + 1)
                    .record_mut(unit_id, period.index);
                rec.y = StateVector::one_hot(solution.states[t]);
                rec.production = unit.production(rec.x, solution.states[t] == State::Production);
            }
        } else {
            warn!(
                iteration,
                unit = unit_id.value(),
                status = %solution.status,
                "schedule solve failed, keeping previous states"
            );
            for period in registry.periods() {
                let prev_y = store.record_or_default(iteration, unit_id, period.index).y;
                let fallback = if prev_y.sum() > 0.0 {
                    prev_y
                } else {
                    StateVector::one_hot(State::Idle)
                };
                let rec = store
                    .frame_mut(iteration + 1)
                    .record_mut(unit_id, period.index);
                rec.y = fallback;
                rec.production =
                    unit.production(rec.x, fallback.active_state() == State::Production);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use elyx_core::{Megawatts, PeriodIdx, PeriodProfile, Unit};
    use elyx_solver::ClarabelBackend;

    fn registry() -> Registry {
        Registry::new(
            vec![Unit::new(UnitId::new(1), "A".into(), Megawatts(1.0))
                .with_op_range(0.2, 1.0)
                .with_costs(0.1, 0.05)],
            (1..=4)
                .map(|t| PeriodProfile::new(PeriodIdx::new(t), 10.0, Megawatts(1.0)))
                .collect(),
        )
    }

    fn owned() -> BTreeSet<UnitId> {
        [UnitId::new(1)].into_iter().collect()
    }

    #[test]
    fn test_zero_x_keeps_unit_idle() {
        let reg = registry();
        let mut store = IterationStore::new(4);
        swo_y_update(
            &reg,
            &mut store,
            0,
            &owned(),
            1.0,
            0.0,
            &ClarabelBackend::new(),
        );
        for t in 1..=4 {
            let rec = store.record(1, UnitId::new(1), PeriodIdx::new(t)).unwrap();
            assert_eq!(rec.y.active_state(), State::Idle);
        }
    }

    #[test]
    fn test_high_x_pulls_unit_into_production() {
        let reg = registry();
        let mut store = IterationStore::new(4);
        for t in 1..=4 {
            store
                .frame_mut(1)
                .record_mut(UnitId::new(1), PeriodIdx::new(t))
                .x = 0.6;
        }
        swo_y_update(
            &reg,
            &mut store,
            0,
            &owned(),
            1.0,
            0.0,
            &ClarabelBackend::new(),
        );
        // Period 1 is structurally IDLE; the unit must pass through
        // STARTING before producing.
        let s1 = store
            .record(1, UnitId::new(1), PeriodIdx::new(1))
            .unwrap()
            .y
            .active_state();
        assert_eq!(s1, State::Idle);
        let s4 = store
            .record(1, UnitId::new(1), PeriodIdx::new(4))
            .unwrap()
            .y
            .active_state();
        assert_eq!(s4, State::Production);
    }

    #[test]
    fn test_stage_cost_prefers_production_for_high_x() {
        let unit = Unit::new(UnitId::new(1), "A".into(), Megawatts(1.0)).with_op_range(0.2, 1.0);
        let prev = crate::store::IterationRecord::default();
        let idle = stage_cost(&unit, State::Idle, 0.8, &prev, 1.0);
        let production = stage_cost(&unit, State::Production, 0.8, &prev, 1.0);
        assert!(production < idle);
    }

    #[test]
    fn test_unmet_demand_draws_low_x_into_production() {
        // x well below op_min: the bound penalties alone tie IDLE and
        // PRODUCTION, so the shortfall term must decide. Without it a
        // demand-starved fleet settles all-idle.
        let reg = Registry::new(
            vec![Unit::new(UnitId::new(1), "A".into(), Megawatts(1.0)).with_op_range(0.2, 1.0)],
            (1..=4)
                .map(|t| {
                    PeriodProfile::new(PeriodIdx::new(t), 0.0, Megawatts(1.0)).with_demand(0.5)
                })
                .collect(),
        );
        let mut store = IterationStore::new(4);
        for t in 1..=4 {
            store
                .frame_mut(1)
                .record_mut(UnitId::new(1), PeriodIdx::new(t))
                .x = 0.1;
        }
        swo_y_update(
            &reg,
            &mut store,
            0,
            &owned(),
            1.0,
            0.2,
            &ClarabelBackend::new(),
        );
        let last = store.record(1, UnitId::new(1), PeriodIdx::new(4)).unwrap();
        assert_eq!(last.y.active_state(), State::Production);
        // Production now reflects the new state, not the pre-update one.
        assert!(last.production > 0.0);
        let first = store.record(1, UnitId::new(1), PeriodIdx::new(1)).unwrap();
        assert_eq!(first.y.active_state(), State::Idle);
    }
}
