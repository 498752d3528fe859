//! # elyx-core: Electrolyzer Fleet Modeling Core
//!
//! Fundamental data structures for distributed electrolyzer fleet
//! coordination: the static unit/period registry, the discrete operating
//! [`State`] machine, type-safe ids, and unified error/diagnostics types.
//!
//! ## Design Philosophy
//!
//! The registry is **immutable after load**. Coordination agents receive a
//! shared reference and never mutate it; everything dynamic lives in the
//! per-agent iteration stores of `elyx-coord`. Type-safe newtype ids keep
//! unit, agent, and period indices from being confused at compile time.
//!
//! ## Quick Start
//!
//! ```rust
//! use elyx_core::*;
//!
//! let unit = Unit::new(UnitId::new(1), "PEM-A".to_string(), Megawatts(2.0))
//!     .with_op_range(0.2, 1.0)
//!     .with_production_curve(0.8, 0.0)
//!     .with_costs(5.0, 1.0)
//!     .with_startup_hold(2);
//!
//! let periods = vec![
//!     PeriodProfile::new(PeriodIdx::new(1), 42.0, Megawatts(1.0)).with_demand(0.5),
//! ];
//!
//! let registry = Registry::new(vec![unit], periods);
//! assert_eq!(registry.horizon(), 1);
//! ```

use serde::{Deserialize, Serialize};

pub mod diagnostics;
pub mod error;
pub mod state;
pub mod units;

pub use diagnostics::{DiagnosticIssue, Diagnostics, Severity};
pub use error::{ElyxError, ElyxResult};
pub use state::State;
pub use units::{MegawattHours, Megawatts};

// Newtype wrappers for IDs for type safety
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UnitId(usize);
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AgentId(usize);
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PeriodIdx(usize);

impl UnitId {
    #[inline]
    pub fn new(value: usize) -> Self {
        UnitId(value)
    }
    #[inline]
    pub fn value(&self) -> usize {
        self.0
    }
}

impl AgentId {
    #[inline]
    pub fn new(value: usize) -> Self {
        AgentId(value)
    }
    #[inline]
    pub fn value(&self) -> usize {
        self.0
    }
}

impl PeriodIdx {
    /// Period indices are 1-based; index 0 is reserved as "before the
    /// horizon" in ramp and transition checks.
    #[inline]
    pub fn new(value: usize) -> Self {
        PeriodIdx(value)
    }
    #[inline]
    pub fn value(&self) -> usize {
        self.0
    }
}

impl std::fmt::Display for UnitId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::fmt::Display for AgentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::fmt::Display for PeriodIdx {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Static description of one electrolyzer. Immutable after load.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Unit {
    pub id: UnitId,
    pub name: String,
    /// Nameplate electrical power draw at full operating fraction.
    pub rated_power: Megawatts,
    /// Minimum operating fraction while in PRODUCTION.
    pub op_min: f64,
    /// Maximum operating fraction while in PRODUCTION.
    pub op_max: f64,
    /// Production-curve slope: production per (fraction · rated MW).
    pub production_slope: f64,
    /// Production-curve intercept, added while producing.
    pub production_intercept: f64,
    /// Cost per period spent in STARTING.
    pub cost_startup: f64,
    /// Cost per period spent in STANDBY.
    pub cost_standby: f64,
    /// Minimum dwell time per state, indexed by [`State::index`].
    pub min_dwell: [u32; 4],
    /// Maximum |Δ operating fraction| between consecutive periods.
    pub ramp_limit: f64,
    /// Periods STARTING must persist before PRODUCTION is reachable.
    pub startup_hold: u32,
}

impl Unit {
    /// Create a unit with permissive defaults (full operating range, unit
    /// slope, no costs, single-period dwells).
    pub fn new(id: UnitId, name: String, rated_power: Megawatts) -> Self {
        Self {
            id,
            name,
            rated_power,
            op_min: 0.0,
            op_max: 1.0,
            production_slope: 1.0,
            production_intercept: 0.0,
            cost_startup: 0.0,
            cost_standby: 0.0,
            min_dwell: [1, 1, 1, 1],
            ramp_limit: 1.0,
            startup_hold: 1,
        }
    }

    /// Set the PRODUCTION operating-fraction range.
    pub fn with_op_range(mut self, op_min: f64, op_max: f64) -> Self {
        self.op_min = op_min;
        self.op_max = op_max;
        self
    }

    /// Set the production curve (slope, intercept).
    pub fn with_production_curve(mut self, slope: f64, intercept: f64) -> Self {
        self.production_slope = slope;
        self.production_intercept = intercept;
        self
    }

    /// Set startup and standby costs per period.
    pub fn with_costs(mut self, startup: f64, standby: f64) -> Self {
        self.cost_startup = startup;
        self.cost_standby = standby;
        self
    }

    /// Set the minimum dwell time for one state.
    pub fn with_min_dwell(mut self, state: State, periods: u32) -> Self {
        self.min_dwell[state.index()] = periods.max(1);
        self
    }

    /// Set the per-period ramp limit on the operating fraction.
    pub fn with_ramp_limit(mut self, limit: f64) -> Self {
        self.ramp_limit = limit;
        self
    }

    /// Set the startup-hold duration.
    pub fn with_startup_hold(mut self, periods: u32) -> Self {
        self.startup_hold = periods.max(1);
        self
    }

    /// Electrical consumption at operating fraction `x`.
    pub fn consumption(&self, x: f64) -> Megawatts {
        self.rated_power * x
    }

    /// Production output at operating fraction `x`; zero unless producing.
    pub fn production(&self, x: f64, producing: bool) -> f64 {
        if producing {
            self.production_slope * self.rated_power.value() * x + self.production_intercept
        } else {
            0.0
        }
    }
}

/// Per-period market and forecast data. SWO-level demand is an aggregate
/// production target across the whole fleet.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeriodProfile {
    pub index: PeriodIdx,
    /// Energy price per MWh consumed.
    pub price: f64,
    /// Forecast renewable-energy availability.
    pub renewable: Megawatts,
    /// Aggregate production demand (SWO level).
    pub demand: f64,
}

impl PeriodProfile {
    pub fn new(index: PeriodIdx, price: f64, renewable: Megawatts) -> Self {
        Self {
            index,
            price,
            renewable,
            demand: 0.0,
        }
    }

    pub fn with_demand(mut self, demand: f64) -> Self {
        self.demand = demand;
        self
    }
}

/// The static unit & period registry. Loaded once and shared read-only with
/// every coordinator.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Registry {
    units: Vec<Unit>,
    periods: Vec<PeriodProfile>,
}

impl Registry {
    pub fn new(units: Vec<Unit>, periods: Vec<PeriodProfile>) -> Self {
        Self { units, periods }
    }

    pub fn units(&self) -> &[Unit] {
        &self.units
    }

    pub fn periods(&self) -> &[PeriodProfile] {
        &self.periods
    }

    /// Number of periods in the schedule horizon.
    pub fn horizon(&self) -> usize {
        self.periods.len()
    }

    pub fn unit(&self, id: UnitId) -> Option<&Unit> {
        self.units.iter().find(|u| u.id == id)
    }

    pub fn period(&self, index: PeriodIdx) -> Option<&PeriodProfile> {
        self.periods.iter().find(|p| p.index == index)
    }

    /// Sum of nameplate power over the fleet.
    pub fn total_rated_power(&self) -> Megawatts {
        Megawatts(self.units.iter().map(|u| u.rated_power.value()).sum())
    }

    /// Compute basic statistics about the registry.
    pub fn stats(&self) -> RegistryStats {
        RegistryStats {
            num_units: self.units.len(),
            num_periods: self.periods.len(),
            total_rated_mw: self.total_rated_power().value(),
            total_demand: self.periods.iter().map(|p| p.demand).sum(),
        }
    }

    /// Validate registry data for issues that break coordination.
    ///
    /// Populates the provided `Diagnostics` with any warnings/errors found.
    pub fn validate_into(&self, diag: &mut Diagnostics) {
        if self.units.is_empty() {
            diag.add_error("structure", "Registry has no units");
        }
        if self.periods.is_empty() {
            diag.add_error("structure", "Registry has no periods");
        }

        for unit in &self.units {
            let entity = format!("Unit {}", unit.id);
            if unit.rated_power.value() <= 0.0 {
                diag.add_error_with_entity("validation", "rated power must be positive", &entity);
            }
            if unit.op_min > unit.op_max {
                diag.add_error_with_entity("validation", "op_min exceeds op_max", &entity);
            }
            if !(0.0..=1.0).contains(&unit.op_min) || !(0.0..=1.0).contains(&unit.op_max) {
                diag.add_error_with_entity(
                    "validation",
                    "operating fractions must lie in [0, 1]",
                    &entity,
                );
            }
            if unit.ramp_limit <= 0.0 {
                diag.add_warning("validation", &format!("{entity} has a non-positive ramp limit"));
            }
        }

        let mut expected = 1;
        for period in &self.periods {
            if period.index.value() != expected {
                diag.add_error_with_entity(
                    "structure",
                    "period indices must be contiguous and 1-based",
                    &format!("Period {}", period.index),
                );
            }
            expected += 1;
            if period.renewable.value() < 0.0 {
                diag.add_error_with_entity(
                    "validation",
                    "renewable availability cannot be negative",
                    &format!("Period {}", period.index),
                );
            }
        }

        if !self.periods.is_empty() && self.periods.iter().all(|p| p.demand == 0.0) {
            diag.add_warning("validation", "no period carries demand");
        }
    }
}

/// Statistics about a registry's size.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RegistryStats {
    pub num_units: usize,
    pub num_periods: usize,
    pub total_rated_mw: f64,
    pub total_demand: f64,
}

impl std::fmt::Display for RegistryStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} units ({:.1} MW rated), {} periods ({:.2} total demand)",
            self.num_units, self.total_rated_mw, self.num_periods, self.total_demand
        )
    }
}
