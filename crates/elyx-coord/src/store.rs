//! Per-agent, append-only, iteration-indexed storage.
//!
//! Each agent owns exactly one [`IterationStore`]. Phase k+1 reads frame k
//! and writes frame k+1; once a phase finishes writing, its frame entries
//! are treated as immutable (a usage contract asserted by tests, not a
//! type-level guarantee). Peer broadcasts are merged under disjoint
//! (unit, period) keys, so no locking is ever needed.
//!
//! Reads of entries that no phase has populated yet default to zero; the
//! coordination protocol leans on this instead of raising on missing data.

use std::collections::HashMap;

use elyx_core::{PeriodIdx, State, UnitId};
use serde::{Deserialize, Serialize};

/// Relaxed per-state indicator, indexed by [`State::index`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct StateVector(pub [f64; 4]);

impl StateVector {
    /// One-hot vector for a definite state.
    pub fn one_hot(state: State) -> Self {
        let mut v = [0.0; 4];
        v[state.index()] = 1.0;
        StateVector(v)
    }

    #[inline]
    pub fn get(&self, state: State) -> f64 {
        self.0[state.index()]
    }

    #[inline]
    pub fn set(&mut self, state: State, value: f64) {
        self.0[state.index()] = value;
    }

    pub fn sum(&self) -> f64 {
        self.0.iter().sum()
    }

    /// Threshold the relaxed indicator back to a definite state: the argmax,
    /// with values below 1e-6 snapped to zero first. An all-zero vector
    /// reads as IDLE.
    pub fn active_state(&self) -> State {
        let mut best = State::Idle;
        let mut best_v = 0.0;
        for s in State::ALL {
            let v = if self.get(s) < 1e-6 { 0.0 } else { self.get(s) };
            if v > best_v {
                best_v = v;
                best = s;
            }
        }
        best
    }

    /// Exactly one indicator within `tol` of 1, the rest within `tol` of 0.
    pub fn is_one_hot(&self, tol: f64) -> bool {
        let mut ones = 0;
        for s in State::ALL {
            let v = self.get(s);
            if (v - 1.0).abs() <= tol {
                ones += 1;
            } else if v.abs() > tol {
                return false;
            }
        }
        ones == 1
    }
}

/// Scaled duals for the operating-bound couplings plus one extra scalar
/// (state-sum residual in SWO, bookkeeping share in RTO).
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct DualVector {
    pub u1: f64,
    pub u2: f64,
    pub u3: f64,
}

/// Non-negative slacks for the lower/upper operating-bound couplings.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct SlackPair {
    pub s1: f64,
    pub s2: f64,
}

/// Constraint violations recorded at the dual update.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ResidualTriple {
    pub r1: f64,
    pub r2: f64,
    pub r3: f64,
}

impl ResidualTriple {
    pub fn norm_sq(&self) -> f64 {
        self.r1 * self.r1 + self.r2 * self.r2 + self.r3 * self.r3
    }
}

/// Everything one iteration knows about one (unit, period).
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct IterationRecord {
    pub x: f64,
    pub production: f64,
    pub y: StateVector,
    pub s: SlackPair,
    pub u: DualVector,
    pub residuals: ResidualTriple,
}

/// One iteration's records plus per-iteration scalars.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IterationFrame {
    records: HashMap<(UnitId, PeriodIdx), IterationRecord>,
    pub objective: f64,
    pub penalty: f64,
    pub dual_residual: f64,
    /// RTO only: the global energy-balance dual price.
    pub balance_dual: f64,
    /// RTO only: the global energy-balance residual.
    pub balance_residual: f64,
}

impl IterationFrame {
    pub fn record(&self, unit: UnitId, period: PeriodIdx) -> Option<&IterationRecord> {
        self.records.get(&(unit, period))
    }

    pub fn record_mut(&mut self, unit: UnitId, period: PeriodIdx) -> &mut IterationRecord {
        self.records.entry((unit, period)).or_default()
    }

    /// Copy of the record, defaulted to zeros when absent.
    pub fn record_or_default(&self, unit: UnitId, period: PeriodIdx) -> IterationRecord {
        self.records
            .get(&(unit, period))
            .copied()
            .unwrap_or_default()
    }

    pub fn keys(&self) -> impl Iterator<Item = &(UnitId, PeriodIdx)> {
        self.records.keys()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Iteration-indexed frames, pre-sized for the full iteration budget at
/// coordinator start and populated lazily. Nothing is deleted until the
/// coordinator terminates; the final frame is what gets exported.
#[derive(Debug, Default)]
pub struct IterationStore {
    frames: Vec<IterationFrame>,
}

impl IterationStore {
    pub fn new(iteration_budget: usize) -> Self {
        Self {
            frames: Vec::with_capacity(iteration_budget + 1),
        }
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn frame(&self, iteration: usize) -> Option<&IterationFrame> {
        self.frames.get(iteration)
    }

    /// Mutable frame at `iteration`, growing the store with empty frames as
    /// needed.
    pub fn frame_mut(&mut self, iteration: usize) -> &mut IterationFrame {
        if iteration >= self.frames.len() {
            self.frames.resize_with(iteration + 1, IterationFrame::default);
        }
        &mut self.frames[iteration]
    }

    pub fn record(
        &self,
        iteration: usize,
        unit: UnitId,
        period: PeriodIdx,
    ) -> Option<&IterationRecord> {
        self.frames.get(iteration)?.record(unit, period)
    }

    /// Record at (iteration, unit, period), defaulted to zeros when the
    /// frame or entry is missing.
    pub fn record_or_default(
        &self,
        iteration: usize,
        unit: UnitId,
        period: PeriodIdx,
    ) -> IterationRecord {
        self.frames
            .get(iteration)
            .map(|f| f.record_or_default(unit, period))
            .unwrap_or_default()
    }

    pub fn latest(&self) -> Option<&IterationFrame> {
        self.frames.last()
    }

    pub fn latest_index(&self) -> Option<usize> {
        self.frames.len().checked_sub(1)
    }
}
