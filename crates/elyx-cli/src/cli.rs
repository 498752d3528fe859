use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

use elyx_coord::PartitionStrategy;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Set the logging level
    #[arg(long, default_value = "info")]
    pub log_level: tracing::Level,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the two-level coordination: coarse schedule loop, then the
    /// fine real-time loop for one target period
    Run {
        /// Path to the unit registry CSV
        #[arg(long)]
        units: PathBuf,
        /// Path to the period registry CSV
        #[arg(long)]
        periods: PathBuf,
        /// Number of coordination agents to partition the fleet across
        #[arg(long, default_value_t = 1)]
        agents: usize,
        /// How units are assigned to agents
        #[arg(long, value_enum, default_value_t = StrategyArg::RoundRobin)]
        strategy: StrategyArg,
        /// Optional JSON configuration file (defaults apply per field)
        #[arg(long)]
        config: Option<PathBuf>,
        /// Schedule period the fine loop re-balances
        #[arg(long, default_value_t = 1)]
        target_period: usize,
        /// Write the converged schedule to this CSV
        #[arg(long)]
        schedule_out: Option<PathBuf>,
        /// Write the full coarse-loop iteration trajectory to this CSV
        #[arg(long)]
        trajectory_out: Option<PathBuf>,
    },
    /// Validate registry files and report diagnostics
    Validate {
        /// Path to the unit registry CSV
        #[arg(long)]
        units: PathBuf,
        /// Path to the period registry CSV
        #[arg(long)]
        periods: PathBuf,
    },
}

#[derive(ValueEnum, Debug, Clone, Copy)]
pub enum StrategyArg {
    RoundRobin,
    Contiguous,
}

impl From<StrategyArg> for PartitionStrategy {
    fn from(arg: StrategyArg) -> Self {
        match arg {
            StrategyArg::RoundRobin => PartitionStrategy::RoundRobin,
            StrategyArg::Contiguous => PartitionStrategy::Contiguous,
        }
    }
}
