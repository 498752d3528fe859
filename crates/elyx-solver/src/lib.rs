//! # elyx-solver: Subproblem Solver Boundary
//!
//! The numeric optimizer is a black box behind the [`SubproblemSolver`]
//! trait. Coordinators formulate domain-specific batches (a continuous
//! dispatch problem and a discrete schedule problem) and hand them across
//! this boundary; they never see solver internals.
//!
//! The default backend, [`ClarabelBackend`], is pure Rust and always
//! available: dispatch subproblems become a small quadratic program solved
//! by Clarabel's interior-point method, and schedule subproblems are solved
//! exactly by a dwell-aware dynamic program (the constraint graph is a path,
//! so no integer-programming solver is needed).

pub mod backend;
pub mod diagnose;
pub mod problem;
pub mod schedule;
pub mod solution;

pub use backend::ClarabelBackend;
pub use diagnose::diagnose_infeasible;
pub use problem::{DemandRow, DispatchProblem, DispatchVar, ScheduleProblem};
pub use solution::{DispatchSolution, ScheduleSolution, SolveStatus};

/// The external-solver boundary. Implementations must be deterministic for
/// a given problem; coordination correctness relies on it.
pub trait SubproblemSolver {
    /// Solve a joint dispatch problem over (unit, period) variables.
    fn solve_dispatch(&self, problem: &DispatchProblem) -> DispatchSolution;

    /// Solve a single-unit schedule problem over the horizon.
    fn solve_schedule(&self, problem: &ScheduleProblem) -> ScheduleSolution;
}
