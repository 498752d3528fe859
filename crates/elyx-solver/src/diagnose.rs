//! Infeasibility diagnosis for dispatch problems.
//!
//! Debugging aid only: when a dispatch solve reports `Infeasible`, the
//! coordinator asks for a human-readable list of conflicting constraints
//! before falling back to previous values. Nothing here affects control
//! flow.

use crate::problem::DispatchProblem;

/// Report the constraints that make (or nearly make) a dispatch problem
/// infeasible: inverted variable bounds, and demand rows whose target lies
/// outside the range reachable by their member variables (the deviation
/// slacks absorb those in practice, so they are reported as warnings of
/// unattainable targets rather than hard conflicts).
pub fn diagnose_infeasible(problem: &DispatchProblem) -> Vec<String> {
    let mut findings = Vec::new();

    for v in &problem.vars {
        if v.lower > v.upper {
            findings.push(format!(
                "unit {} period {}: bounds inverted ({} > {})",
                v.unit, v.period, v.lower, v.upper
            ));
        }
        if v.quad < 0.0 {
            findings.push(format!(
                "unit {} period {}: negative quadratic coefficient {} makes the problem non-convex",
                v.unit, v.period, v.quad
            ));
        }
    }

    for row in &problem.demand_rows {
        let mut lo = 0.0;
        let mut hi = 0.0;
        for &(idx, coeff) in &row.members {
            let Some(v) = problem.vars.get(idx) else {
                findings.push(format!(
                    "period {}: demand row references missing variable {}",
                    row.period, idx
                ));
                continue;
            };
            let a = coeff * v.lower;
            let b = coeff * v.upper;
            lo += a.min(b);
            hi += a.max(b);
        }
        if row.target < lo || row.target > hi {
            findings.push(format!(
                "period {}: demand target {} outside reachable range [{}, {}]",
                row.period, row.target, lo, hi
            ));
        }
    }

    findings
}
