//! Exact schedule optimization by dynamic programming.
//!
//! The single-unit schedule subproblem has a path-shaped constraint graph:
//! state legality, minimum dwell, and the startup hold all depend only on
//! the current state and how long it has been held. Labels of the form
//! `(state, residency)` therefore make the problem a shortest path over at
//! most `4 × max_residency` nodes per period, and the result is exact
//! integral states without an integer-programming solver.
//!
//! Residency is capped at the largest value any exit rule inspects, so
//! merging longer residencies into the cap loses nothing.

use elyx_core::State;

use crate::problem::ScheduleProblem;
use crate::solution::{ScheduleSolution, SolveStatus};

const INF: f64 = f64::INFINITY;

struct Labels {
    /// Residency cap per state.
    cap: [usize; 4],
    /// Label-index offset per state.
    offset: [usize; 4],
    total: usize,
}

impl Labels {
    fn new(problem: &ScheduleProblem) -> Self {
        let mut cap = [0usize; 4];
        let mut offset = [0usize; 4];
        let mut total = 0;
        for s in State::ALL {
            let mut c = problem.min_dwell[s.index()].max(1) as usize;
            if s == State::Starting {
                c = c.max(problem.startup_hold.max(1) as usize);
            }
            cap[s.index()] = c;
            offset[s.index()] = total;
            total += c;
        }
        Labels { cap, offset, total }
    }

    /// Flat index of (state, residency), residency in 1..=cap.
    fn index(&self, s: State, residency: usize) -> usize {
        self.offset[s.index()] + residency - 1
    }

    fn decode(&self, index: usize) -> (State, usize) {
        for s in State::ALL {
            let o = self.offset[s.index()];
            if index < o + self.cap[s.index()] {
                return (s, index - o + 1);
            }
        }
        unreachable!("label index out of range")
    }
}

/// Whether a transition out of `(s, residency)` into a different state is
/// legal with respect to dwell and the startup hold.
fn may_exit(problem: &ScheduleProblem, s: State, residency: usize, next: State) -> bool {
    if !next.can_follow(s) {
        return false;
    }
    if residency < problem.min_dwell[s.index()].max(1) as usize {
        return false;
    }
    if s == State::Starting
        && next == State::Production
        && residency < problem.startup_hold.max(1) as usize
    {
        return false;
    }
    true
}

pub fn solve(problem: &ScheduleProblem) -> ScheduleSolution {
    let n = problem.periods;
    if n == 0 {
        return ScheduleSolution {
            status: SolveStatus::Optimal,
            objective: 0.0,
            states: Vec::new(),
        };
    }
    if problem.cost.len() != n {
        return ScheduleSolution::failed(SolveStatus::Error);
    }

    let labels = Labels::new(problem);
    let mut best = vec![vec![INF; labels.total]; n];
    let mut prev = vec![vec![usize::MAX; labels.total]; n];

    // Period 1: the unit enters its initial state with residency 1.
    if problem.first_period_idle {
        best[0][labels.index(State::Idle, 1)] = problem.cost[0][State::Idle.index()];
    } else {
        for s in State::ALL {
            best[0][labels.index(s, 1)] = problem.cost[0][s.index()];
        }
    }

    for t in 1..n {
        for from in 0..labels.total {
            let base = best[t - 1][from];
            if base == INF {
                continue;
            }
            let (s, r) = labels.decode(from);

            // Stay put; residency saturates at the cap.
            let stay_r = (r + 1).min(labels.cap[s.index()]);
            let stay = labels.index(s, stay_r);
            let stay_cost = base + problem.cost[t][s.index()];
            if stay_cost < best[t][stay] {
                best[t][stay] = stay_cost;
                prev[t][stay] = from;
            }

            for next in State::ALL {
                if next == s || !may_exit(problem, s, r, next) {
                    continue;
                }
                let to = labels.index(next, 1);
                let cost = base + problem.cost[t][next.index()];
                if cost < best[t][to] {
                    best[t][to] = cost;
                    prev[t][to] = from;
                }
            }
        }
    }

    let (mut label, objective) = match best[n - 1]
        .iter()
        .enumerate()
        .filter(|(_, c)| c.is_finite())
        .min_by(|a, b| a.1.total_cmp(b.1))
    {
        Some((i, c)) => (i, *c),
        None => return ScheduleSolution::failed(SolveStatus::Infeasible),
    };

    let mut states = vec![State::Idle; n];
    for t in (0..n).rev() {
        let (s, _) = labels.decode(label);
        states[t] = s;
        if t > 0 {
            label = prev[t][label];
        }
    }

    ScheduleSolution {
        status: SolveStatus::Optimal,
        objective,
        states,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use elyx_core::UnitId;

    fn problem(n: usize, cost: Vec<[f64; 4]>) -> ScheduleProblem {
        ScheduleProblem {
            unit: UnitId::new(1),
            periods: n,
            cost,
            min_dwell: [1, 1, 1, 1],
            startup_hold: 1,
            first_period_idle: true,
        }
    }

    // Cost row rewarding one state strongly.
    fn favor(s: State) -> [f64; 4] {
        let mut row = [1.0; 4];
        row[s.index()] = -10.0;
        row
    }

    #[test]
    fn test_idle_first_period_enforced() {
        let p = problem(3, vec![favor(State::Production); 3]);
        let sol = solve(&p);
        assert!(sol.is_optimal());
        assert_eq!(sol.states[0], State::Idle);
    }

    #[test]
    fn test_production_requires_starting_path() {
        // Even with PRODUCTION heavily rewarded everywhere, the unit must
        // pass through STARTING first.
        let p = problem(4, vec![favor(State::Production); 4]);
        let sol = solve(&p);
        assert_eq!(sol.states[0], State::Idle);
        assert_eq!(sol.states[1], State::Starting);
        assert_eq!(sol.states[2], State::Production);
        assert_eq!(sol.states[3], State::Production);
    }

    #[test]
    fn test_startup_hold_delays_production() {
        let mut p = problem(5, vec![favor(State::Production); 5]);
        p.startup_hold = 2;
        let sol = solve(&p);
        assert_eq!(
            sol.states,
            vec![
                State::Idle,
                State::Starting,
                State::Starting,
                State::Production,
                State::Production
            ]
        );
    }

    #[test]
    fn test_min_dwell_holds_state() {
        // PRODUCTION is rewarded in period 3 only, then IDLE is cheap, but
        // a dwell of 3 keeps the unit in PRODUCTION through period 5.
        let mut cost = vec![[0.0; 4]; 6];
        cost[2] = favor(State::Production);
        for row in cost.iter_mut().skip(3) {
            row[State::Production.index()] = 2.0;
        }
        let mut p = problem(6, cost);
        p.min_dwell[State::Production.index()] = 3;
        let sol = solve(&p);
        assert_eq!(sol.states[2], State::Production);
        assert_eq!(sol.states[3], State::Production);
        assert_eq!(sol.states[4], State::Production);
    }

    #[test]
    fn test_all_idle_when_nothing_rewarded() {
        let p = problem(4, vec![[0.0, 1.0, 1.0, 1.0]; 4]);
        let sol = solve(&p);
        assert!(sol.states.iter().all(|&s| s == State::Idle));
        assert!((sol.objective - 0.0).abs() < 1e-12);
    }

    #[test]
    fn test_standby_bridges_production_gaps() {
        // Production rewarded in periods 3 and 6; in between STANDBY is
        // cheaper than IDLE restart because STARTING is expensive.
        let mut cost = vec![[0.0, 50.0, 5.0, 1.0]; 7];
        cost[2] = [0.0, 50.0, -20.0, 1.0];
        cost[5] = [0.0, 50.0, -20.0, 1.0];
        let p = problem(7, cost);
        let sol = solve(&p);
        assert_eq!(sol.states[2], State::Production);
        assert_eq!(sol.states[5], State::Production);
        assert!(sol.states[3] == State::Standby || sol.states[3] == State::Production);
        // No second pass through STARTING.
        let startings = sol.states.iter().filter(|&&s| s == State::Starting).count();
        assert_eq!(startings, 1);
    }
}
