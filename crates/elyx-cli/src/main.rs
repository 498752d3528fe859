use std::fs;
use std::io::{self, Write};
use std::path::Path;
use std::sync::Arc;

use clap::Parser;
use elyx_coord::{partition_fleet, run_fleet, FleetConfig, FleetSolution};
use elyx_core::{Diagnostics, PeriodIdx, Registry, Severity};
use elyx_io::{read_periods, read_units, write_schedule, write_trajectory};
use tabwriter::TabWriter;
use tracing::{error, info};
use tracing_subscriber::FmtSubscriber;

mod cli;
use cli::{Cli, Commands};

fn load_registry(units: &Path, periods: &Path) -> anyhow::Result<Registry> {
    let units = read_units(units)?;
    let periods = read_periods(periods)?;
    Ok(Registry::new(units, periods))
}

fn run_validate(units: &Path, periods: &Path) -> anyhow::Result<()> {
    let registry = load_registry(units, periods)?;
    let mut diag = Diagnostics::new();
    registry.validate_into(&mut diag);

    println!("Registry: {}", registry.stats());
    for issue in diag.issues() {
        let tag = match issue.severity {
            Severity::Error => "ERROR",
            Severity::Warning => "WARN ",
        };
        match &issue.entity {
            Some(entity) => println!("{tag} [{}] {}: {}", issue.category, entity, issue.message),
            None => println!("{tag} [{}] {}", issue.category, issue.message),
        }
    }
    if diag.has_errors() {
        anyhow::bail!("registry validation failed");
    }
    println!("Registry is valid.");
    Ok(())
}

fn load_config(path: Option<&Path>) -> anyhow::Result<FleetConfig> {
    match path {
        Some(path) => {
            let text = fs::read_to_string(path)?;
            let config: FleetConfig = serde_json::from_str(&text)
                .map_err(|err| anyhow::anyhow!("parsing config {}: {err}", path.display()))?;
            Ok(config)
        }
        None => Ok(FleetConfig::default()),
    }
}

fn print_summary(solution: &FleetSolution) -> anyhow::Result<()> {
    let Some(schedule) = solution.schedule() else {
        anyhow::bail!("no agent produced a schedule");
    };

    println!(
        "Coarse loop: {} iterations, {}",
        schedule.iterations,
        if schedule.converged {
            "converged"
        } else {
            "terminated at cap"
        }
    );
    println!(
        "  objective {:.4}, dual residual {:.6}",
        schedule.final_objective, schedule.final_dual_residual
    );

    let mut writer = TabWriter::new(io::stdout());
    writeln!(writer, "UNIT\tPERIOD\tSTATE\tX\tPRODUCTION")?;
    for entry in &schedule.schedule {
        writeln!(
            writer,
            "{}\t{}\t{}\t{:.4}\t{:.4}",
            entry.unit,
            entry.period,
            entry.state,
            entry.x,
            entry.production
        )?;
    }
    writer.flush()?;

    for agent in &solution.agents {
        let rto = &agent.rto;
        let worst = rto
            .balance_residuals
            .iter()
            .fold(0.0_f64, |acc, r| acc.max(r.abs()));
        println!(
            "Fine loop (agent {}): period {}, {} iterations, worst residual {:.6}, {} forced",
            rto.agent,
            rto.target_period,
            rto.iterations,
            worst,
            rto.forced.len()
        );
    }

    println!(
        "Timing: coarse {} ms, fine {} ms, total {} ms",
        solution.times.swo_ms, solution.times.rto_ms, solution.times.total_ms
    );
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn run_coordination(
    units: &Path,
    periods: &Path,
    agents: usize,
    strategy: cli::StrategyArg,
    config: Option<&Path>,
    target_period: usize,
    schedule_out: Option<&Path>,
    trajectory_out: Option<&Path>,
) -> anyhow::Result<()> {
    let registry = load_registry(units, periods)?;
    let mut diag = Diagnostics::new();
    registry.validate_into(&mut diag);
    if diag.has_errors() {
        for issue in diag.issues() {
            if matches!(issue.severity, Severity::Error) {
                error!("{}: {}", issue.category, issue.message);
            }
        }
        anyhow::bail!("registry validation failed; run `elyx validate` for details");
    }

    let config = load_config(config)?;
    let registry = Arc::new(registry);
    let partitions = partition_fleet(&registry, agents, strategy.into())
        .map_err(|err| anyhow::anyhow!("partitioning fleet: {err}"))?;
    info!(
        agents = partitions.len(),
        target_period, "starting fleet coordination"
    );

    let solution = run_fleet(
        Arc::clone(&registry),
        partitions,
        config,
        PeriodIdx::new(target_period),
    )?;

    print_summary(&solution)?;

    if let Some(path) = schedule_out {
        let schedule = solution
            .schedule()
            .ok_or_else(|| anyhow::anyhow!("no schedule to export"))?;
        write_schedule(path, schedule)?;
        println!("Schedule written to {}", path.display());
    }
    if let Some(path) = trajectory_out {
        let agent = solution
            .agents
            .first()
            .ok_or_else(|| anyhow::anyhow!("no trajectory to export"))?;
        write_trajectory(path, &agent.swo_store, &registry)?;
        println!("Trajectory written to {}", path.display());
    }
    Ok(())
}

fn main() {
    let cli = Cli::parse();

    let subscriber = FmtSubscriber::builder()
        .with_max_level(cli.log_level)
        .finish();

    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    match &cli.command {
        Some(Commands::Run {
            units,
            periods,
            agents,
            strategy,
            config,
            target_period,
            schedule_out,
            trajectory_out,
        }) => {
            let result = run_coordination(
                units,
                periods,
                *agents,
                *strategy,
                config.as_deref(),
                *target_period,
                schedule_out.as_deref(),
                trajectory_out.as_deref(),
            );
            match result {
                Ok(_) => info!("Coordination run successful!"),
                Err(e) => {
                    error!("Coordination run failed: {:?}", e);
                    std::process::exit(1);
                }
            }
        }
        Some(Commands::Validate { units, periods }) => match run_validate(units, periods) {
            Ok(_) => info!("Validation successful!"),
            Err(e) => {
                error!("Validation failed: {:?}", e);
                std::process::exit(1);
            }
        },
        None => {
            info!("No subcommand provided. Use `elyx --help` for more information.");
        }
    }
}
