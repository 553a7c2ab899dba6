/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

use std::path::PathBuf;
use std::process;

use clap::Parser;
use tracing::{error, info, warn};

use nr_sl_sim::config::{ScenarioConfig, ScenarioConfigManager};
use nr_sl_sim::sidelink::{MemorySink, TeeSink, TracingSink};
use nr_sl_sim::sim::{SimulationReport, V2xSimulation};

// ── CLI argument definition ───────────────────────────────────────────────────

/// NR sidelink V2X simulation.
///
/// Example:
///   nr-sl-sim -c scenario.yaml --ues 8 --stop-ms 5000 --records
#[derive(Debug, Parser)]
#[command(
    name = "nr-sl-sim",
    about = "NR sidelink (V2X) MAC scheduling simulation",
    long_about = None,
)]
struct Cli {
    /// Path to the YAML scenario file.
    #[arg(short = 'c', long = "config")]
    config: Option<PathBuf>,

    /// Override the simulation stop time, in milliseconds.
    #[arg(short = 't', long = "stop-ms")]
    stop_ms: Option<u64>,

    /// Override the number of sidelink UEs.
    #[arg(short = 'u', long = "ues")]
    ues: Option<u32>,

    /// Enable sensing-based resource exclusion.
    #[arg(short = 's', long = "sensing", default_value_t = false)]
    sensing: bool,

    /// Log every scheduling decision and transmission (target `sl_stats`)
    /// while keeping them in memory.
    #[arg(short = 'r', long = "records", default_value_t = false)]
    records: bool,
}

// ── Entry point ───────────────────────────────────────────────────────────────

fn main() {
    // Initialise structured logging.
    // Level is controlled by the RUST_LOG env-var (e.g. RUST_LOG=debug).
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    info!("nr-sl-sim starting up...");

    // ── Parse CLI arguments ───────────────────────────────────────────────────
    let cli = Cli::parse();

    info!(
        config   = ?cli.config,
        stop_ms  = ?cli.stop_ms,
        ues      = ?cli.ues,
        sensing  = cli.sensing,
        records  = cli.records,
        "Configuration"
    );

    // ── Load scenario ─────────────────────────────────────────────────────────
    let mut manager = ScenarioConfigManager::new();

    match &cli.config {
        Some(path) => {
            if let Err(e) = manager.load_from_file(path) {
                error!("Failed to load scenario configuration: {:#}", e);
                process::exit(1);
            }
        }
        None => {
            warn!("No scenario file provided, using default scenario");
        }
    }

    let mut scenario = manager.into_config();
    apply_overrides(&mut scenario, &cli);

    // ── Run ───────────────────────────────────────────────────────────────────
    let result = if cli.records {
        run_with_records(&scenario)
    } else {
        run(&scenario)
    };

    match result {
        Ok(report) => println!("{report}"),
        Err(e) => {
            error!("Simulation failed: {:#}", e);
            process::exit(1);
        }
    }
}

fn apply_overrides(scenario: &mut ScenarioConfig, cli: &Cli) {
    if let Some(stop_ms) = cli.stop_ms {
        scenario.simulation.stop_ms = stop_ms;
    }
    if let Some(ues) = cli.ues {
        scenario.simulation.ue_count = ues;
    }
    if cli.sensing {
        scenario.mac.enable_sensing = true;
    }
}

fn run(scenario: &ScenarioConfig) -> anyhow::Result<SimulationReport> {
    let mut sim = V2xSimulation::from_config(scenario, MemorySink::new())?;
    Ok(sim.run()?)
}

fn run_with_records(scenario: &ScenarioConfig) -> anyhow::Result<SimulationReport> {
    let sink = TeeSink {
        first: MemorySink::new(),
        second: TracingSink,
    };
    let mut sim = V2xSimulation::from_config(scenario, sink)?;
    let report = sim.run()?;

    let kept = &sim.network().mac.sink().first;
    info!(
        records = kept.records().len(),
        transmissions = kept.transmissions().count(),
        "Sidelink records captured"
    );
    Ok(report)
}
