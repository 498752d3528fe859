//! Fleet runner: bootstrap collaborator that wires agents together.
//!
//! Builds the directory, spawns one thread per agent running the coarse
//! loop and then the nested fine loop for the configured target period,
//! joins them, and assembles the per-agent outcomes with wall-clock phase
//! times.

use std::sync::Arc;
use std::thread;
use std::time::Instant;

use elyx_core::{ElyxError, ElyxResult, PeriodIdx, Registry};
use elyx_solver::ClarabelBackend;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::directory::Directory;
use crate::partition::Partition;
use crate::rto::{RtoConfig, RtoCoordinator, RtoOutcome};
use crate::store::IterationStore;
use crate::swo::{SwoConfig, SwoCoordinator, SwoOutcome};

/// Combined configuration for both loops, as loaded from a config file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FleetConfig {
    pub swo: SwoConfig,
    pub rto: RtoConfig,
}

/// Wall-clock durations of the two phases, in milliseconds.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct PhaseTimes {
    pub swo_ms: u128,
    pub rto_ms: u128,
    pub total_ms: u128,
}

/// One agent's full results, including its final coarse-loop store for
/// trajectory export.
pub struct AgentResult {
    pub swo: SwoOutcome,
    pub rto: RtoOutcome,
    pub swo_store: IterationStore,
}

pub struct FleetSolution {
    pub agents: Vec<AgentResult>,
    pub times: PhaseTimes,
}

impl FleetSolution {
    /// The merged schedule view of the first agent (identical across
    /// agents once converged).
    pub fn schedule(&self) -> Option<&SwoOutcome> {
        self.agents.first().map(|a| &a.swo)
    }
}

/// Run the whole coordination: SWO to termination, then one RTO per agent
/// for `target_period`.
pub fn run_fleet(
    registry: Arc<Registry>,
    partitions: Vec<Partition>,
    config: FleetConfig,
    target_period: PeriodIdx,
) -> ElyxResult<FleetSolution> {
    if partitions.is_empty() {
        return Err(ElyxError::Config("no partitions to run".into()));
    }
    if registry.period(target_period).is_none() {
        return Err(ElyxError::Config(format!(
            "target period {target_period} not in registry"
        )));
    }

    let start = Instant::now();
    let mut directory = Directory::new();
    let mut mailboxes = Vec::new();
    for part in &partitions {
        mailboxes.push(directory.register(part.agent));
    }

    let mut handles = Vec::new();
    for (part, mailbox) in partitions.into_iter().zip(mailboxes) {
        let registry = Arc::clone(&registry);
        let directory = directory.clone();
        let config = config.clone();
        let handle = thread::spawn(move || {
            let swo_start = Instant::now();
            let coord = SwoCoordinator::new(
                part.clone(),
                Arc::clone(&registry),
                directory.clone(),
                mailbox,
                config.swo,
                ClarabelBackend::new(),
            );
            let swo_run = coord.run();
            let swo_ms = swo_start.elapsed().as_millis();

            let rto_start = Instant::now();
            let rto = RtoCoordinator::new(
                part.agent,
                registry,
                part.units,
                directory,
                swo_run.mailbox,
                config.rto,
                ClarabelBackend::new(),
                &swo_run.outcome,
                target_period,
            );
            let rto_run = rto.run();
            let rto_ms = rto_start.elapsed().as_millis();

            (
                AgentResult {
                    swo: swo_run.outcome,
                    rto: rto_run.outcome,
                    swo_store: swo_run.store,
                },
                swo_ms,
                rto_ms,
            )
        });
        handles.push(handle);
    }
    drop(directory);

    let mut agents = Vec::new();
    let mut times = PhaseTimes::default();
    for handle in handles {
        let (result, swo_ms, rto_ms) = handle
            .join()
            .map_err(|_| ElyxError::Other("agent thread panicked".into()))?;
        times.swo_ms = times.swo_ms.max(swo_ms);
        times.rto_ms = times.rto_ms.max(rto_ms);
        agents.push(result);
    }
    times.total_ms = start.elapsed().as_millis();

    info!(
        agents = agents.len(),
        swo_ms = times.swo_ms,
        rto_ms = times.rto_ms,
        "fleet run complete"
    );

    Ok(FleetSolution { agents, times })
}
