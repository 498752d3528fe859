//! Subproblem descriptions handed across the solver boundary.
//!
//! Problems are flat batches of plain numbers, not an algebraic IR: the
//! caller has already expanded its penalty terms into per-variable linear
//! and quadratic coefficients. This keeps the boundary serializable and the
//! backend free of coordination concepts.

use elyx_core::{PeriodIdx, UnitId};
use serde::{Deserialize, Serialize};

/// One continuous variable of a dispatch problem: the operating fraction of
/// one unit in one period.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchVar {
    pub unit: UnitId,
    pub period: PeriodIdx,
    /// Coefficient of x in the objective.
    pub linear: f64,
    /// Coefficient of x² in the objective (must be >= 0).
    pub quad: f64,
    /// Lower bound; pinning a variable means `lower == upper`.
    pub lower: f64,
    pub upper: f64,
}

/// A soft aggregate-production target for one period.
///
/// Introduces two non-negative deviation slacks (over/under production),
/// each charged `weight` per unit of deviation, tied to the member
/// variables by an equality row `Σ coeff·x + d⁻ − d⁺ = target`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DemandRow {
    pub period: PeriodIdx,
    /// Production target net of any constant contributions (production
    /// intercepts, peers' fixed output).
    pub target: f64,
    /// Linear penalty per unit of deviation in either direction.
    pub weight: f64,
    /// (variable index, production per unit of x) for each member.
    pub members: Vec<(usize, f64)>,
}

/// A joint dispatch problem over one agent's owned units and periods.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DispatchProblem {
    pub vars: Vec<DispatchVar>,
    pub demand_rows: Vec<DemandRow>,
    /// Wall-clock budget for the solve, in seconds. This is the only
    /// bounded-time guarantee in the whole coordination protocol.
    pub time_limit: Option<f64>,
}

impl DispatchProblem {
    pub fn num_vars(&self) -> usize {
        self.vars.len()
    }

    /// Index of the variable for (unit, period), if present.
    pub fn var_index(&self, unit: UnitId, period: PeriodIdx) -> Option<usize> {
        self.vars
            .iter()
            .position(|v| v.unit == unit && v.period == period)
    }
}

/// A single-unit state-schedule problem over the horizon.
///
/// Stage costs are fully evaluated by the caller; the backend only knows
/// the transition structure (adjacency, dwell, startup hold).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleProblem {
    pub unit: UnitId,
    /// Number of periods in the horizon.
    pub periods: usize,
    /// `cost[t][state_index]`, one row per period in order.
    pub cost: Vec<[f64; 4]>,
    /// Minimum dwell per state, indexed by `State::index`.
    pub min_dwell: [u32; 4],
    /// Consecutive STARTING periods required before PRODUCTION.
    pub startup_hold: u32,
    /// Force period 1 to IDLE.
    pub first_period_idle: bool,
}
