//! Real-time (RTO) coordinator: the nested fine-grained loop run once per
//! target schedule period.
//!
//! The converged schedule pins each unit's state; only operating fractions
//! move, re-balancing aggregate consumption against a fluctuating
//! fine-grained availability signal. A rolling pointer marks the first
//! unresolved sub-period; each convergence event freezes that sub-period's
//! x values and advances the pointer, until the whole fine horizon is
//! resolved.
//!
//! The balance residual is computed from the merged fleet view, which is
//! identical on every agent once the dual barrier passes, so all agents
//! take the same accept/continue decision in lockstep and no voting round
//! is needed. The final `convergenceReached` broadcast is still sent for
//! interop; a received one terminates immediately.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use elyx_core::{AgentId, PeriodIdx, Registry, State, UnitId};
use elyx_solver::SubproblemSolver;
use rand::{rngs::StdRng, Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::codec::Message;
use crate::directory::{Directory, Envelope, Mailbox};
use crate::store::{IterationStore, StateVector};
use crate::swo::SwoOutcome;
use crate::updates::{dual_update, rto_x_update, s_update, RtoXContext};

/// Tuning knobs for the fine loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RtoConfig {
    /// Fine sub-periods per schedule period.
    pub steps_per_period: usize,
    /// Balance-residual acceptance threshold.
    pub epsilon: f64,
    /// Iteration cap per sub-period; reaching it force-accepts.
    pub max_iterations: usize,
    pub rho: f64,
    /// Balance dual step while the residual keeps improving.
    pub eta_fast: f64,
    /// Balance dual step once progress stalls, guarding against overshoot.
    pub eta_slow: f64,
    /// Relative improvement below which progress counts as stalled.
    pub improvement_threshold: f64,
    /// Amplitude of the availability perturbation.
    pub noise_fraction: f64,
    /// Base seed; the target period index is added so each fine loop gets
    /// its own reproducible signal.
    pub seed: u64,
    pub solver_time_limit: Option<f64>,
}

impl Default for RtoConfig {
    fn default() -> Self {
        Self {
            steps_per_period: 10,
            epsilon: 0.005,
            max_iterations: 30,
            rho: 1.0,
            eta_fast: 0.5,
            eta_slow: 0.1,
            improvement_threshold: 0.1,
            noise_fraction: 0.15,
            seed: 0,
            solver_time_limit: None,
        }
    }
}

/// Derive the fluctuating fine-grained availability for one target period.
/// Every agent calls this with identical inputs and gets the identical
/// signal.
pub fn fine_availability(
    renewable: f64,
    target_period: PeriodIdx,
    config: &RtoConfig,
) -> Vec<f64> {
    let mut rng = StdRng::seed_from_u64(config.seed.wrapping_add(target_period.value() as u64));
    (0..config.steps_per_period)
        .map(|_| {
            let noise = rng.gen_range(-config.noise_fraction..=config.noise_fraction);
            renewable * (1.0 + noise)
        })
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RtoPhase {
    AwaitXUpdate,
    AwaitDualUpdate,
    Terminated,
}

/// Result of one fine loop.
#[derive(Debug, Clone, Serialize)]
pub struct RtoOutcome {
    pub agent: AgentId,
    pub target_period: PeriodIdx,
    /// Frozen operating fraction per unit per sub-period.
    pub fixed_x: HashMap<UnitId, Vec<f64>>,
    /// Balance residual at each sub-period's acceptance.
    pub balance_residuals: Vec<f64>,
    pub iterations: usize,
    /// Sub-periods accepted at the iteration cap instead of the threshold.
    pub forced: Vec<usize>,
}

pub struct RtoRun {
    pub outcome: RtoOutcome,
    pub store: IterationStore,
}

pub struct RtoCoordinator<S: SubproblemSolver> {
    agent: AgentId,
    registry: Arc<Registry>,
    owned: BTreeSet<UnitId>,
    directory: Directory,
    mailbox: Mailbox,
    store: IterationStore,
    config: RtoConfig,
    solver: S,

    target_period: PeriodIdx,
    availability: Vec<f64>,
    purchased: f64,
    producing: BTreeSet<UnitId>,

    phase: RtoPhase,
    iteration: usize,
    iter_in_sub: usize,
    current_start: usize,
    lambda: f64,
    prev_abs_residual: Option<f64>,
    n_agents: usize,
    x_seen: usize,
    dual_seen: usize,

    fixed: HashMap<UnitId, Vec<Option<f64>>>,
    balance_residuals: Vec<f64>,
    forced: Vec<usize>,
}

impl<S: SubproblemSolver> RtoCoordinator<S> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        agent: AgentId,
        registry: Arc<Registry>,
        owned: BTreeSet<UnitId>,
        directory: Directory,
        mailbox: Mailbox,
        config: RtoConfig,
        solver: S,
        seed_outcome: &SwoOutcome,
        target_period: PeriodIdx,
    ) -> Self {
        let renewable = registry
            .period(target_period)
            .map(|p| p.renewable.value())
            .unwrap_or(0.0);
        let availability = fine_availability(renewable, target_period, &config);
        let purchased = seed_outcome.purchased_for(target_period);

        let producing: BTreeSet<UnitId> = registry
            .units()
            .iter()
            .filter(|u| {
                seed_outcome
                    .entry(u.id, target_period)
                    .map(|e| e.state == State::Production)
                    .unwrap_or(false)
            })
            .map(|u| u.id)
            .collect();

        let n_agents = directory.num_agents();
        let mut store = IterationStore::new(config.max_iterations * config.steps_per_period);

        // Seed frame 0 from the schedule: pinned states, schedule x as the
        // warm start for owned units.
        for &unit_id in &owned {
            let entry = seed_outcome.entry(unit_id, target_period);
            let (x0, state) = entry.map(|e| (e.x, e.state)).unwrap_or((0.0, State::Idle));
            for j in 1..=config.steps_per_period {
                let rec = store.frame_mut(0).record_mut(unit_id, PeriodIdx::new(j));
                rec.x = x0;
                rec.y = StateVector::one_hot(state);
            }
        }

        let fixed = registry
            .units()
            .iter()
            .map(|u| (u.id, vec![None; config.steps_per_period]))
            .collect();

        Self {
            agent,
            registry,
            owned,
            directory,
            mailbox,
            store,
            config,
            solver,
            target_period,
            availability,
            purchased,
            producing,
            phase: RtoPhase::AwaitXUpdate,
            iteration: 0,
            iter_in_sub: 0,
            current_start: 1,
            lambda: 0.0,
            prev_abs_residual: None,
            n_agents,
            x_seen: 0,
            dual_seen: 0,
            fixed,
            balance_residuals: Vec::new(),
            forced: Vec::new(),
        }
    }

    pub fn run(mut self) -> RtoRun {
        if self.config.steps_per_period == 0 {
            self.phase = RtoPhase::Terminated;
        } else {
            self.begin_round();
        }
        while self.phase != RtoPhase::Terminated {
            if self.barrier_met() {
                self.advance();
                continue;
            }
            let Some(env) = self.mailbox.recv() else {
                warn!(agent = self.agent.value(), "transport gone, terminating");
                break;
            };
            self.handle(env);
        }
        let outcome = self.outcome();
        RtoRun {
            outcome,
            store: self.store,
        }
    }

    fn begin_round(&mut self) {
        let ctx = RtoXContext {
            lambda: self.lambda,
            fixed: &self.fixed,
            producing: &self.producing,
            sub_periods: self.config.steps_per_period,
        };
        let records = rto_x_update(
            &self.registry,
            &mut self.store,
            self.iteration,
            &self.owned,
            self.config.rho,
            &ctx,
            self.config.solver_time_limit,
            &self.solver,
        );
        self.directory.broadcast(
            self.agent,
            &Message::XUpdate {
                iteration: self.iteration + 1,
                records,
            },
        );
        self.phase = RtoPhase::AwaitXUpdate;
    }

    fn barrier_met(&self) -> bool {
        let needed = self.n_agents - 1;
        match self.phase {
            RtoPhase::AwaitXUpdate => self.x_seen >= needed,
            RtoPhase::AwaitDualUpdate => self.dual_seen >= needed,
            RtoPhase::Terminated => false,
        }
    }

    fn advance(&mut self) {
        let needed = self.n_agents - 1;
        match self.phase {
            RtoPhase::AwaitXUpdate => {
                self.x_seen -= needed;
                self.local_phase();
            }
            RtoPhase::AwaitDualUpdate => {
                self.dual_seen -= needed;
                self.balance_step();
            }
            RtoPhase::Terminated => {}
        }
    }

    fn local_phase(&mut self) {
        s_update(
            &self.registry,
            &mut self.store,
            self.iteration,
            &self.owned,
            Some(self.config.steps_per_period),
        );
        let records = dual_update(
            &self.registry,
            &mut self.store,
            self.iteration,
            &self.owned,
            self.config.rho,
            1e-6,
            Some(self.config.steps_per_period),
        );
        self.directory.broadcast(
            self.agent,
            &Message::DualUpdate {
                iteration: self.iteration + 1,
                records,
            },
        );
        self.phase = RtoPhase::AwaitDualUpdate;
    }

    /// Global balance step: identical on every agent once the merged frame
    /// is complete, so the accept/continue decision needs no votes.
    fn balance_step(&mut self) {
        let frame_idx = self.iteration + 1;
        let pointer = PeriodIdx::new(self.current_start);

        let consumption: f64 = self
            .registry
            .units()
            .iter()
            .map(|u| {
                let x = self.store.record_or_default(frame_idx, u.id, pointer).x;
                u.consumption(x).value()
            })
            .sum();
        let available = self.availability[self.current_start - 1] + self.purchased;
        let residual = consumption - available;

        let eta = match self.prev_abs_residual {
            None => self.config.eta_fast,
            Some(prev) if prev - residual.abs() > self.config.improvement_threshold * prev => {
                self.config.eta_fast
            }
            Some(_) => self.config.eta_slow,
        };
        self.lambda += eta * residual;
        self.prev_abs_residual = Some(residual.abs());

        {
            let frame = self.store.frame_mut(frame_idx);
            frame.balance_residual = residual;
            frame.balance_dual = self.lambda;
        }

        self.iter_in_sub += 1;
        self.iteration += 1;
        let accepted = residual.abs() <= self.config.epsilon;
        let forced = !accepted && self.iter_in_sub >= self.config.max_iterations;

        debug!(
            agent = self.agent.value(),
            sub_period = self.current_start,
            iteration = self.iter_in_sub,
            residual,
            "balance step"
        );

        if accepted || forced {
            self.accept_sub_period(frame_idx, residual, forced);
        } else {
            self.begin_round();
        }
    }

    fn accept_sub_period(&mut self, frame_idx: usize, residual: f64, forced: bool) {
        let pointer = PeriodIdx::new(self.current_start);
        for unit in self.registry.units() {
            let x = self.store.record_or_default(frame_idx, unit.id, pointer).x;
            if let Some(slots) = self.fixed.get_mut(&unit.id) {
                slots[self.current_start - 1] = Some(x);
            }
        }
        self.balance_residuals.push(residual);
        if forced {
            self.forced.push(self.current_start);
        }

        info!(
            agent = self.agent.value(),
            target_period = self.target_period.value(),
            sub_period = self.current_start,
            residual,
            forced,
            "sub-period fixed"
        );

        self.current_start += 1;
        self.iter_in_sub = 0;
        self.prev_abs_residual = None;

        if self.current_start > self.config.steps_per_period {
            self.directory.broadcast(self.agent, &Message::ConvergenceReached);
            self.phase = RtoPhase::Terminated;
        } else {
            self.begin_round();
        }
    }

    fn handle(&mut self, env: Envelope) {
        let msg = match Message::decode(&env.payload) {
            Ok(m) => m,
            Err(e) => {
                warn!(agent = self.agent.value(), from = env.from.value(), "{e}");
                return;
            }
        };
        match msg {
            Message::XUpdate { iteration, records } => {
                let frame = self.store.frame_mut(iteration);
                for r in records {
                    let rec = frame.record_mut(r.unit, r.period);
                    rec.x = r.x;
                    rec.production = r.production;
                }
                self.x_seen += 1;
            }
            Message::DualUpdate { iteration, records } => {
                let frame = self.store.frame_mut(iteration);
                for r in records {
                    let rec = frame.record_mut(r.unit, r.period);
                    rec.u = r.u;
                    rec.s = r.s;
                    rec.residuals = r.residuals;
                    rec.y = r.y;
                }
                self.dual_seen += 1;
            }
            Message::ConvergenceReached => {
                self.phase = RtoPhase::Terminated;
            }
            Message::IterationIncremented => {}
        }
    }

    fn outcome(&self) -> RtoOutcome {
        let fixed_x = self
            .fixed
            .iter()
            .map(|(&unit, slots)| {
                (
                    unit,
                    slots.iter().map(|v| v.unwrap_or(0.0)).collect::<Vec<f64>>(),
                )
            })
            .collect();

        RtoOutcome {
            agent: self.agent,
            target_period: self.target_period,
            fixed_x,
            balance_residuals: self.balance_residuals.clone(),
            iterations: self.iteration,
            forced: self.forced.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::swo::{ScheduleEntry, SwoOutcome};
    use elyx_core::{Megawatts, PeriodProfile, Unit};
    use elyx_solver::ClarabelBackend;

    #[test]
    fn test_fine_availability_reproducible() {
        let config = RtoConfig {
            seed: 42,
            ..Default::default()
        };
        let a = fine_availability(1.0, PeriodIdx::new(3), &config);
        let b = fine_availability(1.0, PeriodIdx::new(3), &config);
        assert_eq!(a, b);
        assert_eq!(a.len(), 10);
        for v in &a {
            assert!(*v >= 0.85 && *v <= 1.15, "availability {v} out of band");
        }
        // A different target period perturbs differently.
        let c = fine_availability(1.0, PeriodIdx::new(4), &config);
        assert_ne!(a, c);
    }

    fn seed_outcome(x: f64, state: State) -> SwoOutcome {
        SwoOutcome {
            agent: AgentId::new(0),
            schedule: vec![ScheduleEntry {
                unit: UnitId::new(1),
                period: PeriodIdx::new(1),
                x,
                state,
                production: x,
            }],
            purchased_grid: vec![(PeriodIdx::new(1), 0.0)],
            iterations: 2,
            converged: true,
            final_objective: 0.0,
            final_dual_residual: 0.0,
        }
    }

    fn single_agent_coordinator(
        state: State,
        steps: usize,
        max_iterations: usize,
    ) -> RtoCoordinator<ClarabelBackend> {
        let registry = Arc::new(Registry::new(
            vec![Unit::new(UnitId::new(1), "A".into(), Megawatts(1.0)).with_op_range(0.2, 1.0)],
            vec![PeriodProfile::new(PeriodIdx::new(1), 0.0, Megawatts(0.5))],
        ));
        let mut dir = Directory::new();
        let mailbox = dir.register(AgentId::new(0));
        let config = RtoConfig {
            steps_per_period: steps,
            max_iterations,
            noise_fraction: 0.1,
            ..Default::default()
        };
        RtoCoordinator::new(
            AgentId::new(0),
            registry,
            [UnitId::new(1)].into_iter().collect(),
            dir,
            mailbox,
            config,
            ClarabelBackend::new(),
            &seed_outcome(0.5, state),
            PeriodIdx::new(1),
        )
    }

    #[test]
    fn test_single_agent_balances_each_sub_period() {
        let coord = single_agent_coordinator(State::Production, 3, 30);
        let run = coord.run();
        assert_eq!(run.outcome.balance_residuals.len(), 3);
        for (j, r) in run.outcome.balance_residuals.iter().enumerate() {
            if !run.outcome.forced.contains(&(j + 1)) {
                assert!(r.abs() <= 0.005, "sub-period {} residual {r}", j + 1);
            }
        }
        let xs = &run.outcome.fixed_x[&UnitId::new(1)];
        assert_eq!(xs.len(), 3);
        // Consumption tracks the perturbed availability, not the flat
        // schedule value.
        for x in xs {
            assert!(*x >= 0.0 && *x <= 1.0);
        }
    }

    #[test]
    fn test_non_producing_unit_fixes_zero() {
        let coord = single_agent_coordinator(State::Standby, 2, 5);
        let run = coord.run();
        let xs = &run.outcome.fixed_x[&UnitId::new(1)];
        assert!(xs.iter().all(|x| x.abs() < 1e-7));
        // With zero consumption the residual equals minus the available
        // energy, so the cap forces acceptance.
        assert_eq!(run.outcome.forced, vec![1, 2]);
    }

    #[test]
    fn test_iteration_cap_is_respected() {
        let coord = single_agent_coordinator(State::Production, 2, 4);
        let run = coord.run();
        assert!(run.outcome.iterations <= 2 * 4);
        assert_eq!(run.outcome.balance_residuals.len(), 2);
    }
}
