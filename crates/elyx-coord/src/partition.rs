//! Static ownership partitions.
//!
//! Each agent owns a fixed, disjoint set of unit ids decided once at
//! startup; every agent is assigned the full period set. Coordinators
//! consume the partition's plain id sets, never predicates.

use std::collections::BTreeSet;

use elyx_core::{AgentId, PeriodIdx, Registry, UnitId};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PartitionError {
    #[error("cannot partition an empty fleet")]
    EmptyFleet,
    #[error("requested {agents} agents for {units} units")]
    TooManyAgents { agents: usize, units: usize },
    #[error("at least one agent is required")]
    NoAgents,
}

/// How unit ids are dealt out to agents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PartitionStrategy {
    /// Unit i goes to agent i mod n.
    #[default]
    RoundRobin,
    /// Contiguous blocks of units per agent, remainder spread over the
    /// first agents.
    Contiguous,
}

/// One agent's ownership: its units and assigned periods.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Partition {
    pub agent: AgentId,
    pub units: BTreeSet<UnitId>,
    pub periods: BTreeSet<PeriodIdx>,
}

/// Deal the registry's units out to `n_agents` agents.
pub fn partition_fleet(
    registry: &Registry,
    n_agents: usize,
    strategy: PartitionStrategy,
) -> Result<Vec<Partition>, PartitionError> {
    if n_agents == 0 {
        return Err(PartitionError::NoAgents);
    }
    let units = registry.units();
    if units.is_empty() {
        return Err(PartitionError::EmptyFleet);
    }
    if n_agents > units.len() {
        return Err(PartitionError::TooManyAgents {
            agents: n_agents,
            units: units.len(),
        });
    }

    let periods: BTreeSet<PeriodIdx> = registry.periods().iter().map(|p| p.index).collect();
    let mut partitions: Vec<Partition> = (0..n_agents)
        .map(|a| Partition {
            agent: AgentId::new(a),
            units: BTreeSet::new(),
            periods: periods.clone(),
        })
        .collect();

    match strategy {
        PartitionStrategy::RoundRobin => {
            for (i, unit) in units.iter().enumerate() {
                partitions[i % n_agents].units.insert(unit.id);
            }
        }
        PartitionStrategy::Contiguous => {
            let base = units.len() / n_agents;
            let extra = units.len() % n_agents;
            let mut next = 0;
            for (a, part) in partitions.iter_mut().enumerate() {
                let take = base + usize::from(a < extra);
                for unit in &units[next..next + take] {
                    part.units.insert(unit.id);
                }
                next += take;
            }
        }
    }

    Ok(partitions)
}
