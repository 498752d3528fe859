//! s-update: closed-form non-negative projection.
//!
//! The slack minimization `min_{s ≥ 0} (ρ/2)(violation − s + u)²` has the
//! closed-form solution `s = max(0, violation + u)`; both loops use this
//! projection, never a re-solved program. Evaluated at iteration k+1's x
//! and y and iteration k's duals.

use std::collections::BTreeSet;

use elyx_core::{Registry, State, UnitId};

use crate::store::IterationStore;

pub fn s_update(
    registry: &Registry,
    store: &mut IterationStore,
    iteration: usize,
    owned: &BTreeSet<UnitId>,
    sub_periods: Option<usize>,
) {
    let periods: Vec<elyx_core::PeriodIdx> = match sub_periods {
        Some(n) => (1..=n).map(elyx_core::PeriodIdx::new).collect(),
        None => registry.periods().iter().map(|p| p.index).collect(),
    };

    for &unit_id in owned {
        let Some(unit) = registry.unit(unit_id) else {
            continue;
        };
        for &period in &periods {
            let u = store.record_or_default(iteration, unit_id, period).u;
            let rec = store.frame_mut(iteration + 1).record_mut(unit_id, period);
            let y_p = rec.y.get(State::Production);
            rec.s.s1 = (rec.x - unit.op_min * y_p + u.u1).max(0.0);
            rec.s.s2 = (unit.op_max * y_p - rec.x + u.u2).max(0.0);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::StateVector;
    use elyx_core::{Megawatts, PeriodIdx, PeriodProfile, Unit};

    fn registry() -> Registry {
        Registry::new(
            vec![Unit::new(UnitId::new(1), "A".into(), Megawatts(1.0)).with_op_range(0.2, 0.9)],
            vec![PeriodProfile::new(PeriodIdx::new(1), 0.0, Megawatts(1.0))],
        )
    }

    fn owned() -> BTreeSet<UnitId> {
        [UnitId::new(1)].into_iter().collect()
    }

    #[test]
    fn test_interior_point_gets_both_slacks() {
        let reg = registry();
        let mut store = IterationStore::new(2);
        {
            let rec = store
                .frame_mut(1)
                .record_mut(UnitId::new(1), PeriodIdx::new(1));
            rec.x = 0.5;
            rec.y = StateVector::one_hot(State::Production);
        }
        s_update(&reg, &mut store, 0, &owned(), None);
        let rec = store.record(1, UnitId::new(1), PeriodIdx::new(1)).unwrap();
        assert!((rec.s.s1 - 0.3).abs() < 1e-12);
        assert!((rec.s.s2 - 0.4).abs() < 1e-12);
    }

    #[test]
    fn test_violation_clamps_to_zero() {
        // x below the producing minimum: the lower slack projects to zero.
        let reg = registry();
        let mut store = IterationStore::new(2);
        {
            let rec = store
                .frame_mut(1)
                .record_mut(UnitId::new(1), PeriodIdx::new(1));
            rec.x = 0.1;
            rec.y = StateVector::one_hot(State::Production);
        }
        s_update(&reg, &mut store, 0, &owned(), None);
        let rec = store.record(1, UnitId::new(1), PeriodIdx::new(1)).unwrap();
        assert_eq!(rec.s.s1, 0.0);
        assert!((rec.s.s2 - 0.8).abs() < 1e-12);
    }

    #[test]
    fn test_duals_shift_the_projection() {
        let reg = registry();
        let mut store = IterationStore::new(2);
        store
            .frame_mut(0)
            .record_mut(UnitId::new(1), PeriodIdx::new(1))
            .u
            .u1 = 0.2;
        {
            let rec = store
                .frame_mut(1)
                .record_mut(UnitId::new(1), PeriodIdx::new(1));
            rec.x = 0.5;
            rec.y = StateVector::one_hot(State::Production);
        }
        s_update(&reg, &mut store, 0, &owned(), None);
        let rec = store.record(1, UnitId::new(1), PeriodIdx::new(1)).unwrap();
        assert!((rec.s.s1 - 0.5).abs() < 1e-12);
    }
}
