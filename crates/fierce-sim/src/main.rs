// crates/fierce-sim/src/main.rs
//
// Binary entrypoint for the Fierce ledger simulator.
//
// Initializes tracing, parses CLI arguments, and dispatches to one of:
// - `run`: replay a TOML scenario against the full ledger stack
// - `vesting`: print a vesting schedule's releasable amounts over time
// - `emission`: preview a single emission update, including shortfall

mod config;
mod events;
mod output;
mod runner;
mod scenario;

use std::sync::Arc;

use clap::{Parser, Subcommand};
use config::SimConfig;
use output::{format_json, format_table, render_report, OutputFormat};
use runner::Simulation;

use fierce_core::Principal;
use fierce_ledger::{EmissionScheduler, Units, VestingSchedule, UNITS_PER_TOKEN};

/// Fierce reward ledger simulator.
#[derive(Parser, Debug)]
#[command(name = "fierce-sim", version = "0.1.0", about = "Fierce reward ledger simulator")]
struct Cli {
    /// Output format.
    #[arg(long, global = true, value_enum, default_value = "table")]
    format: OutputFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Replay a scenario. Without a readable config file, runs the built-in demo.
    Run {
        /// Path to the TOML scenario file.
        #[arg(long, default_value = "fierce.toml")]
        config: String,

        /// Override the scenario's last step.
        #[arg(long)]
        end_step: Option<u64>,
    },

    /// Show releasable amounts for a vesting schedule.
    Vesting {
        /// Total grant, base units.
        #[arg(long)]
        total: u128,
        #[arg(long, default_value_t = 0)]
        start: u64,
        #[arg(long)]
        duration: u64,
        #[arg(long, default_value_t = 0)]
        cliff: u64,
        /// Times to evaluate, comma-separated.
        #[arg(long, value_delimiter = ',')]
        at: Vec<u64>,
    },

    /// Preview one emission update.
    Emission {
        /// Total staked, whole tokens.
        #[arg(long)]
        staked: u64,
        /// Reward per step, whole tokens.
        #[arg(long)]
        rate: u64,
        /// Steps since the window opened.
        #[arg(long)]
        steps: u64,
        /// Available funding, whole tokens.
        #[arg(long)]
        funding: u64,
    },
}

#[derive(tabled::Tabled, serde::Serialize)]
struct ReleasableRow {
    #[tabled(rename = "Time")]
    time: u64,
    #[tabled(rename = "Vested")]
    vested: u128,
    #[tabled(rename = "Releasable")]
    releasable: u128,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing subscriber for structured logging.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run { config, end_step } => run(&config, end_step, cli.format).await?,
        Commands::Vesting {
            total,
            start,
            duration,
            cliff,
            at,
        } => {
            let schedule = VestingSchedule::new(
                Principal::from_label("beneficiary"),
                total,
                start,
                duration,
                cliff,
            )?;
            let mut rows = Vec::with_capacity(at.len());
            for time in at {
                rows.push(ReleasableRow {
                    time,
                    vested: schedule.vested_at(time)?,
                    releasable: schedule.releasable(time)?,
                });
            }
            match cli.format {
                OutputFormat::Table => println!("{}", format_table(&rows)),
                OutputFormat::Json => println!("{}", format_json(&rows)),
            }
        }
        Commands::Emission {
            staked,
            rate,
            steps,
            funding,
        } => {
            let unit = |t: u64| t as u128 * UNITS_PER_TOKEN;
            let mut scheduler = EmissionScheduler::new(0);
            scheduler.start_window(0, steps.max(1), unit(rate), unit(funding))?;
            let outcome = scheduler.preview(steps, unit(staked), unit(funding))?;
            match cli.format {
                OutputFormat::Json => println!("{}", format_json(&outcome)),
                OutputFormat::Table => {
                    println!("Theoretical: {}", Units(outcome.theoretical));
                    println!("Actual:      {}", Units(outcome.actual));
                    println!("Shortfall:   {}", Units(outcome.shortfall));
                    println!("Reached:     step {}", outcome.reached);
                }
            }
        }
    }

    Ok(())
}

async fn run(
    path: &str,
    end_step: Option<u64>,
    format: OutputFormat,
) -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration from TOML file, falling back to the built-in demo if
    // the file is not found.
    let mut config = match SimConfig::load(path) {
        Ok(cfg) => {
            tracing::info!("Loaded scenario from {}", path);
            cfg
        }
        Err(e) => {
            tracing::warn!("Could not load scenario from {}: {}. Using defaults.", path, e);
            SimConfig::default()
        }
    };
    if let Some(end_step) = end_step {
        config.end_step = end_step;
    }

    tracing::info!("Fierce simulator v0.1.0");
    tracing::info!("Steps: 0..={} ({}s per step)", config.end_step, config.seconds_per_step);
    tracing::info!("Distributor design: {:?}", config.distributor.design);

    // Create broadcast channel for ledger events and the logger draining it.
    let sink = events::BroadcastSink::new(1024);
    let logger = events::spawn_event_logger(sink.subscribe());

    let mut simulation = Simulation::new(&config, Arc::new(sink))?;
    let actions = config.actions.clone();
    let mut report = simulation.run(actions)?;

    // Dropping the simulation drops every sender; the logger then finishes.
    drop(simulation);
    report.events = logger.await?;

    println!("{}", render_report(&report, format));
    Ok(())
}
