//! dual-update: scaled dual ascent per owned (unit, period).
//!
//! Residuals are evaluated at iteration k+1's primal values (x, y, s) and
//! the duals stepped by `u += ρ·r` from iteration k. Values below the snap
//! threshold are zeroed to keep numerical noise from oscillating the
//! convergence decision.

use std::collections::BTreeSet;

use elyx_core::{Registry, State, UnitId};

use crate::codec::DualUpdateRecord;
use crate::store::{IterationStore, ResidualTriple};

fn snap(value: f64, threshold: f64) -> f64 {
    if value.abs() < threshold {
        0.0
    } else {
        value
    }
}

/// Run the dual step for all owned units, writing duals and residuals at
/// iteration k+1 and returning the records to broadcast.
pub fn dual_update(
    registry: &Registry,
    store: &mut IterationStore,
    iteration: usize,
    owned: &BTreeSet<UnitId>,
    rho: f64,
    zero_snap: f64,
    sub_periods: Option<usize>,
) -> Vec<DualUpdateRecord> {
    let periods: Vec<elyx_core::PeriodIdx> = match sub_periods {
        Some(n) => (1..=n).map(elyx_core::PeriodIdx::new).collect(),
        None => registry.periods().iter().map(|p| p.index).collect(),
    };

    let mut records = Vec::new();
    for &unit_id in owned {
        let Some(unit) = registry.unit(unit_id) else {
            continue;
        };
        for &period in &periods {
            let u_prev = store.record_or_default(iteration, unit_id, period).u;
            let rec = store.frame_mut(iteration + 1).record_mut(unit_id, period);
            let y_p = rec.y.get(State::Production);

            let residuals = ResidualTriple {
                r1: snap(rec.x - unit.op_min * y_p - rec.s.s1, zero_snap),
                r2: snap(unit.op_max * y_p - rec.x - rec.s.s2, zero_snap),
                r3: snap(rec.y.sum() - 1.0, zero_snap),
            };
            rec.residuals = residuals;
            rec.u.u1 = snap(u_prev.u1 + rho * residuals.r1, zero_snap);
            rec.u.u2 = snap(u_prev.u2 + rho * residuals.r2, zero_snap);
            rec.u.u3 = snap(u_prev.u3 + rho * residuals.r3, zero_snap);

            records.push(DualUpdateRecord {
                unit: unit_id,
                period,
                u: rec.u,
                s: rec.s,
                residuals,
                y: rec.y,
            });
        }
    }
    records
}
