//! # elyx-coord: Distributed Fleet Coordination
//!
//! The consensus engine: cooperating agents, each owning a disjoint subset
//! of the fleet, alternate local ADMM sub-problems (x, y, s, dual) and
//! synchronize through broadcast messages. A coarse full-horizon schedule
//! loop (SWO) runs first; its converged result seeds a nested fine-grained
//! real-time loop (RTO) that re-balances one schedule period against a
//! fluctuating availability signal with rolling fixation of converged
//! sub-periods.
//!
//! Concurrency model: one thread of control per agent, no shared mutable
//! state, coordination exclusively by message passing. Each agent's only
//! mutable resource is its own [`store::IterationStore`]; peer values
//! arrive via decoded messages merged under disjoint (unit, period) keys.

pub mod check;
pub mod codec;
pub mod directory;
pub mod partition;
pub mod rto;
pub mod runner;
pub mod store;
pub mod swo;
pub mod updates;

pub use check::{check_dwell, check_frame, FeasibilityReport, Tolerances};
pub use codec::{DualUpdateRecord, Message, XUpdateRecord};
pub use directory::{Directory, Envelope, Mailbox};
pub use partition::{partition_fleet, Partition, PartitionError, PartitionStrategy};
pub use rto::{RtoConfig, RtoCoordinator, RtoOutcome, RtoRun};
pub use runner::{run_fleet, AgentResult, FleetConfig, FleetSolution, PhaseTimes};
pub use store::{
    DualVector, IterationFrame, IterationRecord, IterationStore, ResidualTriple, SlackPair,
    StateVector,
};
pub use swo::{ScheduleEntry, SwoConfig, SwoCoordinator, SwoOutcome, SwoPhase, SwoRun};
