//! # elyx-io: Tabular Import/Export
//!
//! The pure data boundary: unit and period registries come in from
//! headered CSV files, converged schedules and full iteration trajectories
//! go out the same way. Nothing here touches coordination logic.

use std::path::Path;

use elyx_coord::{IterationStore, SwoOutcome};
use elyx_core::{
    ElyxError, ElyxResult, Megawatts, PeriodIdx, PeriodProfile, Registry, State, Unit, UnitId,
};
use serde::{Deserialize, Serialize};
use tracing::info;

/// One row of a unit registry file.
#[derive(Debug, Serialize, Deserialize)]
struct UnitRow {
    id: usize,
    name: String,
    rated_power: f64,
    op_min: f64,
    op_max: f64,
    #[serde(default = "one")]
    production_slope: f64,
    #[serde(default)]
    production_intercept: f64,
    #[serde(default)]
    cost_startup: f64,
    #[serde(default)]
    cost_standby: f64,
    #[serde(default = "one")]
    ramp_limit: f64,
    #[serde(default = "one_u32")]
    startup_hold: u32,
    #[serde(default = "one_u32")]
    dwell_idle: u32,
    #[serde(default = "one_u32")]
    dwell_starting: u32,
    #[serde(default = "one_u32")]
    dwell_production: u32,
    #[serde(default = "one_u32")]
    dwell_standby: u32,
}

fn one() -> f64 {
    1.0
}

fn one_u32() -> u32 {
    1
}

/// One row of a period registry file.
#[derive(Debug, Serialize, Deserialize)]
struct PeriodRow {
    index: usize,
    price: f64,
    renewable: f64,
    #[serde(default)]
    demand: f64,
}

pub fn read_units(path: &Path) -> ElyxResult<Vec<Unit>> {
    let mut reader = csv::Reader::from_path(path).map_err(csv_err)?;
    let mut units = Vec::new();
    for row in reader.deserialize() {
        let row: UnitRow = row.map_err(csv_err)?;
        let unit = Unit::new(UnitId::new(row.id), row.name, Megawatts(row.rated_power))
            .with_op_range(row.op_min, row.op_max)
            .with_production_curve(row.production_slope, row.production_intercept)
            .with_costs(row.cost_startup, row.cost_standby)
            .with_ramp_limit(row.ramp_limit)
            .with_startup_hold(row.startup_hold)
            .with_min_dwell(State::Idle, row.dwell_idle)
            .with_min_dwell(State::Starting, row.dwell_starting)
            .with_min_dwell(State::Production, row.dwell_production)
            .with_min_dwell(State::Standby, row.dwell_standby);
        units.push(unit);
    }
    info!(count = units.len(), path = %path.display(), "units loaded");
    Ok(units)
}

pub fn read_periods(path: &Path) -> ElyxResult<Vec<PeriodProfile>> {
    let mut reader = csv::Reader::from_path(path).map_err(csv_err)?;
    let mut periods = Vec::new();
    for row in reader.deserialize() {
        let row: PeriodRow = row.map_err(csv_err)?;
        periods.push(
            PeriodProfile::new(
                PeriodIdx::new(row.index),
                row.price,
                Megawatts(row.renewable),
            )
            .with_demand(row.demand),
        );
    }
    info!(count = periods.len(), path = %path.display(), "periods loaded");
    Ok(periods)
}

#[derive(Debug, Serialize)]
struct ScheduleRow<'a> {
    unit: usize,
    period: usize,
    state: &'a str,
    x: f64,
    production: f64,
}

/// Export a converged schedule, one row per (unit, period).
pub fn write_schedule(path: &Path, outcome: &SwoOutcome) -> ElyxResult<()> {
    let mut writer = csv::Writer::from_path(path).map_err(csv_err)?;
    for entry in &outcome.schedule {
        writer
            .serialize(ScheduleRow {
                unit: entry.unit.value(),
                period: entry.period.value(),
                state: entry.state.wire_label(),
                x: entry.x,
                production: entry.production,
            })
            .map_err(csv_err)?;
    }
    writer.flush()?;
    Ok(())
}

#[derive(Debug, Serialize)]
struct TrajectoryRow<'a> {
    iteration: usize,
    unit: usize,
    period: usize,
    x: f64,
    production: f64,
    state: &'a str,
    s1: f64,
    s2: f64,
    u1: f64,
    u2: f64,
    u3: f64,
    r1: f64,
    r2: f64,
    r3: f64,
}

/// Export the full iteration trajectory of a store, one row per
/// (iteration, unit, period).
pub fn write_trajectory(
    path: &Path,
    store: &IterationStore,
    registry: &Registry,
) -> ElyxResult<()> {
    let mut writer = csv::Writer::from_path(path).map_err(csv_err)?;
    for iteration in 0..store.len() {
        for unit in registry.units() {
            for period in registry.periods() {
                let Some(rec) = store.record(iteration, unit.id, period.index) else {
                    continue;
                };
                writer
                    .serialize(TrajectoryRow {
                        iteration,
                        unit: unit.id.value(),
                        period: period.index.value(),
                        x: rec.x,
                        production: rec.production,
                        state: rec.y.active_state().wire_label(),
                        s1: rec.s.s1,
                        s2: rec.s.s2,
                        u1: rec.u.u1,
                        u2: rec.u.u2,
                        u3: rec.u.u3,
                        r1: rec.residuals.r1,
                        r2: rec.residuals.r2,
                        r3: rec.residuals.r3,
                    })
                    .map_err(csv_err)?;
            }
        }
    }
    writer.flush()?;
    Ok(())
}

fn csv_err(err: csv::Error) -> ElyxError {
    ElyxError::Parse(err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_read_units_with_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "id,name,rated_power,op_min,op_max").unwrap();
        writeln!(file, "1,PEM-1,2.5,0.2,1.0").unwrap();
        writeln!(file, "2,PEM-2,1.0,0.1,0.9").unwrap();

        let units = read_units(file.path()).unwrap();
        assert_eq!(units.len(), 2);
        assert_eq!(units[0].name, "PEM-1");
        assert!((units[0].rated_power.value() - 2.5).abs() < 1e-12);
        assert_eq!(units[1].startup_hold, 1);
        assert_eq!(units[0].production_slope, 1.0);
    }

    #[test]
    fn test_read_units_full_columns() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "id,name,rated_power,op_min,op_max,production_slope,production_intercept,\
             cost_startup,cost_standby,ramp_limit,startup_hold,dwell_idle,dwell_starting,\
             dwell_production,dwell_standby"
        )
        .unwrap();
        writeln!(file, "3,ALK-1,4.0,0.3,0.95,0.8,0.05,12.5,2.0,0.4,2,1,2,3,1").unwrap();

        let units = read_units(file.path()).unwrap();
        let u = &units[0];
        assert_eq!(u.startup_hold, 2);
        assert_eq!(u.min_dwell[State::Production.index()], 3);
        assert!((u.production_intercept - 0.05).abs() < 1e-12);
        assert!((u.ramp_limit - 0.4).abs() < 1e-12);
    }

    #[test]
    fn test_read_periods() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "index,price,renewable,demand").unwrap();
        writeln!(file, "1,42.5,1.2,0.5").unwrap();
        writeln!(file, "2,38.0,0.9,0.6").unwrap();

        let periods = read_periods(file.path()).unwrap();
        assert_eq!(periods.len(), 2);
        assert_eq!(periods[1].index, PeriodIdx::new(2));
        assert!((periods[0].renewable.value() - 1.2).abs() < 1e-12);
        assert!((periods[1].demand - 0.6).abs() < 1e-12);
    }

    #[test]
    fn test_read_units_rejects_malformed() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "id,name,rated_power,op_min,op_max").unwrap();
        writeln!(file, "x,broken,not_a_number,0.2,1.0").unwrap();
        assert!(read_units(file.path()).is_err());
    }

    #[test]
    fn test_trajectory_export_round_trip() {
        use elyx_coord::{IterationStore, StateVector};

        let registry = Registry::new(
            vec![Unit::new(UnitId::new(1), "A".into(), Megawatts(1.0))],
            vec![PeriodProfile::new(PeriodIdx::new(1), 0.0, Megawatts(1.0))],
        );
        let mut store = IterationStore::new(2);
        {
            let rec = store
                .frame_mut(1)
                .record_mut(UnitId::new(1), PeriodIdx::new(1));
            rec.x = 0.5;
            rec.y = StateVector::one_hot(State::Production);
            rec.s.s1 = 0.25;
        }

        let file = tempfile::NamedTempFile::new().unwrap();
        write_trajectory(file.path(), &store, &registry).unwrap();

        let content = std::fs::read_to_string(file.path()).unwrap();
        let mut lines = content.lines();
        assert!(lines.next().unwrap().starts_with("iteration,unit,period"));
        let row = lines.next().unwrap();
        assert!(row.starts_with("1,1,1,0.5,"));
        assert!(row.contains("PRODUCTION"));
    }
}
