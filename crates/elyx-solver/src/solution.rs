//! Solution representations returned across the solver boundary.

use elyx_core::State;
use serde::{Deserialize, Serialize};

/// Status of a subproblem solve.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SolveStatus {
    /// Optimal solution found.
    Optimal,
    /// Problem is infeasible.
    Infeasible,
    /// Problem is unbounded.
    Unbounded,
    /// Solver timed out.
    Timeout,
    /// Solver hit iteration limit.
    IterationLimit,
    /// Numerical difficulties.
    NumericalError,
    /// Generic error occurred.
    Error,
    /// Solution status unknown.
    Unknown,
}

impl SolveStatus {
    /// Check if this status represents a successful solve.
    pub fn is_success(&self) -> bool {
        matches!(self, SolveStatus::Optimal)
    }

    /// Check if this status represents a failure.
    pub fn is_failure(&self) -> bool {
        !self.is_success() && !matches!(self, SolveStatus::Unknown)
    }
}

impl std::fmt::Display for SolveStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SolveStatus::Optimal => write!(f, "optimal"),
            SolveStatus::Infeasible => write!(f, "infeasible"),
            SolveStatus::Unbounded => write!(f, "unbounded"),
            SolveStatus::Timeout => write!(f, "timeout"),
            SolveStatus::IterationLimit => write!(f, "iteration_limit"),
            SolveStatus::NumericalError => write!(f, "numerical_error"),
            SolveStatus::Error => write!(f, "error"),
            SolveStatus::Unknown => write!(f, "unknown"),
        }
    }
}

/// Result of a dispatch solve.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchSolution {
    pub status: SolveStatus,
    pub objective: f64,
    /// Operating fractions in the problem's variable order.
    pub x: Vec<f64>,
    /// Net demand deviation per demand row, in row order:
    /// `Σ coeff·x − target`.
    pub deviations: Vec<f64>,
    pub error_message: Option<String>,
}

impl DispatchSolution {
    /// Create an empty solution with the given failure status.
    pub fn failed(status: SolveStatus, message: &str) -> Self {
        Self {
            status,
            objective: f64::NAN,
            x: Vec::new(),
            deviations: Vec::new(),
            error_message: Some(message.to_string()),
        }
    }

    pub fn is_optimal(&self) -> bool {
        self.status.is_success()
    }
}

/// Result of a schedule solve.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleSolution {
    pub status: SolveStatus,
    pub objective: f64,
    /// One state per period, in period order.
    pub states: Vec<State>,
}

impl ScheduleSolution {
    pub fn failed(status: SolveStatus) -> Self {
        Self {
            status,
            objective: f64::NAN,
            states: Vec::new(),
        }
    }

    pub fn is_optimal(&self) -> bool {
        self.status.is_success()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_predicates() {
        assert!(SolveStatus::Optimal.is_success());
        assert!(SolveStatus::Infeasible.is_failure());
        assert!(!SolveStatus::Unknown.is_failure());
        assert_eq!(SolveStatus::IterationLimit.to_string(), "iteration_limit");
    }
}
