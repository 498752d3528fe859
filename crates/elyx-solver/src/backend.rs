//! Default in-process backend.
//!
//! Dispatch subproblems are quadratic programs in the conic form Clarabel
//! expects:
//!
//! ```text
//!   minimize    (1/2)x'Px + q'x
//!   subject to  Ax + s = b,  s ∈ K
//! ```
//!
//! with a Zero cone for the demand equality rows and a Nonnegative cone for
//! variable bounds and deviation-slack non-negativity. Schedule subproblems
//! go through the exact dynamic program in [`crate::schedule`].

use clarabel::{
    algebra::CscMatrix,
    solver::{DefaultSettingsBuilder, IPSolver, SolverStatus, SupportedConeT},
};
use tracing::debug;

use crate::problem::{DispatchProblem, ScheduleProblem};
use crate::schedule;
use crate::solution::{DispatchSolution, ScheduleSolution, SolveStatus};
use crate::SubproblemSolver;

/// Pure-Rust backend built on Clarabel; always available, no external
/// processes or licenses.
#[derive(Debug, Clone, Copy, Default)]
pub struct ClarabelBackend;

impl ClarabelBackend {
    pub fn new() -> Self {
        ClarabelBackend
    }
}

fn map_status(status: SolverStatus) -> SolveStatus {
    match status {
        SolverStatus::Solved | SolverStatus::AlmostSolved => SolveStatus::Optimal,
        SolverStatus::PrimalInfeasible | SolverStatus::AlmostPrimalInfeasible => {
            SolveStatus::Infeasible
        }
        SolverStatus::DualInfeasible | SolverStatus::AlmostDualInfeasible => {
            SolveStatus::Unbounded
        }
        SolverStatus::MaxIterations => SolveStatus::IterationLimit,
        SolverStatus::MaxTime => SolveStatus::Timeout,
        SolverStatus::NumericalError | SolverStatus::InsufficientProgress => {
            SolveStatus::NumericalError
        }
        _ => SolveStatus::Unknown,
    }
}

impl SubproblemSolver for ClarabelBackend {
    fn solve_dispatch(&self, problem: &DispatchProblem) -> DispatchSolution {
        let nv = problem.vars.len();
        if nv == 0 {
            return DispatchSolution {
                status: SolveStatus::Optimal,
                objective: 0.0,
                x: Vec::new(),
                deviations: Vec::new(),
                error_message: None,
            };
        }

        let n_rows_demand = problem.demand_rows.len();
        // Two deviation slacks per demand row, appended after the x block.
        let n_var = nv + 2 * n_rows_demand;

        // Accumulate constraint entries column-wise, then convert to CSC.
        let mut rows: Vec<Vec<(usize, f64)>> = vec![Vec::new(); n_var];
        let mut rhs: Vec<f64> = Vec::new();
        let mut cones: Vec<SupportedConeT<f64>> = Vec::new();

        // Equality block first: Σ coeff·x − d⁺ + d⁻ = target.
        for (r, row) in problem.demand_rows.iter().enumerate() {
            let con = rhs.len();
            rhs.push(row.target);
            for &(idx, coeff) in &row.members {
                rows[idx].push((con, coeff));
            }
            rows[nv + 2 * r].push((con, -1.0));
            rows[nv + 2 * r + 1].push((con, 1.0));
        }
        if n_rows_demand > 0 {
            cones.push(SupportedConeT::ZeroConeT(n_rows_demand));
        }

        // Nonnegative block: bounds on x, non-negativity of slacks.
        let mut n_ineq = 0;
        for (i, v) in problem.vars.iter().enumerate() {
            let con = rhs.len();
            rhs.push(v.upper);
            rows[i].push((con, 1.0));
            rhs.push(-v.lower);
            rows[i].push((con + 1, -1.0));
            n_ineq += 2;
        }
        for slack in 0..2 * n_rows_demand {
            let con = rhs.len();
            rhs.push(0.0);
            rows[nv + slack].push((con, -1.0));
            n_ineq += 1;
        }
        if n_ineq > 0 {
            cones.push(SupportedConeT::NonnegativeConeT(n_ineq));
        }

        // CSC conversion: columns were accumulated in order, sort by row.
        let n_con_rows = rhs.len();
        let mut col_ptr = Vec::with_capacity(n_var + 1);
        let mut row_idx = Vec::new();
        let mut values = Vec::new();
        let mut nnz = 0;
        for col in rows.iter_mut() {
            col_ptr.push(nnz);
            col.sort_by_key(|(r, _)| *r);
            for &(r, v) in col.iter() {
                row_idx.push(r);
                values.push(v);
                nnz += 1;
            }
        }
        col_ptr.push(nnz);
        let a_mat = CscMatrix::new(n_con_rows, n_var, col_ptr, row_idx, values);

        // Diagonal P: the objective carries quad·x², Clarabel wants (1/2)x'Px.
        let mut p_col_ptr = Vec::with_capacity(n_var + 1);
        let mut p_row_idx = Vec::new();
        let mut p_values = Vec::new();
        let mut p_nnz = 0;
        for i in 0..n_var {
            p_col_ptr.push(p_nnz);
            if i < nv && problem.vars[i].quad != 0.0 {
                p_row_idx.push(i);
                p_values.push(2.0 * problem.vars[i].quad);
                p_nnz += 1;
            }
        }
        p_col_ptr.push(p_nnz);
        let p_mat = CscMatrix::new(n_var, n_var, p_col_ptr, p_row_idx, p_values);

        let mut q = Vec::with_capacity(n_var);
        for v in &problem.vars {
            q.push(v.linear);
        }
        for row in &problem.demand_rows {
            q.push(row.weight);
            q.push(row.weight);
        }

        let mut builder = DefaultSettingsBuilder::default();
        builder.verbose(false);
        if let Some(limit) = problem.time_limit {
            builder.time_limit(limit);
        }
        let settings = match builder.build() {
            Ok(s) => s,
            Err(e) => {
                return DispatchSolution::failed(
                    SolveStatus::Error,
                    &format!("solver settings error: {e:?}"),
                )
            }
        };

        let mut solver =
            match clarabel::solver::DefaultSolver::new(&p_mat, &q, &a_mat, &rhs, &cones, settings) {
                Ok(s) => s,
                Err(e) => {
                    return DispatchSolution::failed(
                        SolveStatus::Error,
                        &format!("solver initialization failed: {e:?}"),
                    )
                }
            };
        solver.solve();

        let sol = solver.solution;
        let status = map_status(sol.status);
        debug!(?status, iterations = sol.iterations, "dispatch solve finished");
        if status != SolveStatus::Optimal {
            return DispatchSolution::failed(status, &format!("solver status {:?}", sol.status));
        }

        let x = sol.x[..nv].to_vec();
        let deviations = (0..n_rows_demand)
            .map(|r| sol.x[nv + 2 * r] - sol.x[nv + 2 * r + 1])
            .collect();

        DispatchSolution {
            status,
            objective: sol.obj_val,
            x,
            deviations,
            error_message: None,
        }
    }

    fn solve_schedule(&self, problem: &ScheduleProblem) -> ScheduleSolution {
        schedule::solve(problem)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::problem::{DemandRow, DispatchVar};
    use elyx_core::{PeriodIdx, UnitId};

    fn var(linear: f64, quad: f64, lower: f64, upper: f64) -> DispatchVar {
        DispatchVar {
            unit: UnitId::new(1),
            period: PeriodIdx::new(1),
            linear,
            quad,
            lower,
            upper,
        }
    }

    #[test]
    fn test_unconstrained_quadratic_minimum() {
        // min x² − x over [0, 1] has its minimum at x = 0.5.
        let problem = DispatchProblem {
            vars: vec![var(-1.0, 1.0, 0.0, 1.0)],
            demand_rows: vec![],
            time_limit: None,
        };
        let sol = ClarabelBackend::new().solve_dispatch(&problem);
        assert!(sol.is_optimal());
        assert!((sol.x[0] - 0.5).abs() < 1e-5, "x = {}", sol.x[0]);
    }

    #[test]
    fn test_bound_clamps_minimum() {
        // min x² − x over [0.8, 1.0] sits at the lower bound.
        let problem = DispatchProblem {
            vars: vec![var(-1.0, 1.0, 0.8, 1.0)],
            demand_rows: vec![],
            time_limit: None,
        };
        let sol = ClarabelBackend::new().solve_dispatch(&problem);
        assert!(sol.is_optimal());
        assert!((sol.x[0] - 0.8).abs() < 1e-5);
    }

    #[test]
    fn test_pinned_variable() {
        let problem = DispatchProblem {
            vars: vec![var(5.0, 1.0, 0.3, 0.3)],
            demand_rows: vec![],
            time_limit: None,
        };
        let sol = ClarabelBackend::new().solve_dispatch(&problem);
        assert!(sol.is_optimal());
        assert!((sol.x[0] - 0.3).abs() < 1e-5);
    }

    #[test]
    fn test_demand_row_pulls_toward_target() {
        // Cheap quadratic regularization, strong demand penalty: the
        // solution should land close to target / coeff.
        let problem = DispatchProblem {
            vars: vec![var(0.0, 0.01, 0.0, 1.0)],
            demand_rows: vec![DemandRow {
                period: PeriodIdx::new(1),
                target: 0.5,
                weight: 10.0,
                members: vec![(0, 1.0)],
            }],
            time_limit: None,
        };
        let sol = ClarabelBackend::new().solve_dispatch(&problem);
        assert!(sol.is_optimal());
        assert!((sol.x[0] - 0.5).abs() < 1e-3, "x = {}", sol.x[0]);
        assert!(sol.deviations[0].abs() < 1e-3);
    }

    #[test]
    fn test_unreachable_demand_absorbed_by_slack() {
        // Target 2.0 with x capped at 1.0: deviation slack takes the rest
        // and the problem stays feasible.
        let problem = DispatchProblem {
            vars: vec![var(0.0, 0.01, 0.0, 1.0)],
            demand_rows: vec![DemandRow {
                period: PeriodIdx::new(1),
                target: 2.0,
                weight: 10.0,
                members: vec![(0, 1.0)],
            }],
            time_limit: None,
        };
        let sol = ClarabelBackend::new().solve_dispatch(&problem);
        assert!(sol.is_optimal());
        assert!((sol.x[0] - 1.0).abs() < 1e-3);
        assert!((sol.deviations[0] + 1.0).abs() < 1e-3);
    }

    #[test]
    fn test_empty_problem() {
        let sol = ClarabelBackend::new().solve_dispatch(&DispatchProblem::default());
        assert!(sol.is_optimal());
        assert!(sol.x.is_empty());
    }
}
