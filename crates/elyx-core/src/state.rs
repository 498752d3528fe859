//! Discrete operating states of an electrolyzer.
//!
//! Exactly one state is active per unit per period. During optimization the
//! indicator is relaxed to a probability; consumers threshold it back to a
//! boolean. Transition legality between consecutive periods is encoded here
//! so that schedule construction and feasibility checking agree on one rule
//! set.

use serde::{Deserialize, Serialize};

/// Operating state of a unit in one period.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum State {
    /// Cold and off; consumes nothing.
    Idle,
    /// Warming up; must persist for the startup-hold duration before
    /// production is reachable.
    Starting,
    /// Producing; operating fraction bounded by `[op_min, op_max]`.
    Production,
    /// Hot but not producing; cheap to resume from.
    Standby,
}

impl State {
    /// All states in wire order (IDLE, STARTING, PRODUCTION, STANDBY).
    pub const ALL: [State; 4] = [
        State::Idle,
        State::Starting,
        State::Production,
        State::Standby,
    ];

    /// Zero-based index in wire order.
    #[inline]
    pub fn index(self) -> usize {
        match self {
            State::Idle => 0,
            State::Starting => 1,
            State::Production => 2,
            State::Standby => 3,
        }
    }

    /// Inverse of [`State::index`].
    pub fn from_index(index: usize) -> Option<State> {
        State::ALL.get(index).copied()
    }

    /// Uppercase label used in wire messages and tabular exports.
    pub fn wire_label(self) -> &'static str {
        match self {
            State::Idle => "IDLE",
            State::Starting => "STARTING",
            State::Production => "PRODUCTION",
            State::Standby => "STANDBY",
        }
    }

    /// Whether this state may directly follow `prev` in the next period.
    ///
    /// The startup-hold requirement (STARTING must have been held long
    /// enough before PRODUCTION) is a duration condition checked by the
    /// caller on top of this adjacency rule.
    pub fn can_follow(self, prev: State) -> bool {
        match self {
            State::Idle => matches!(prev, State::Idle | State::Production | State::Standby),
            State::Starting => matches!(prev, State::Idle | State::Starting),
            State::Production => {
                matches!(prev, State::Starting | State::Production | State::Standby)
            }
            State::Standby => matches!(prev, State::Production | State::Standby),
        }
    }
}

impl std::fmt::Display for State {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.wire_label())
    }
}
