//! DOGM SIM: A synthetic-scenario driver for the dynamic occupancy grid map.
//!
//! Rectangular objects move at constant velocity in front of an idealised range sensor. Every
//! cycle the sensor model produces a measurement grid, the map is updated, and a summary row is
//! recorded. At the end of a run the cells the map considers occupied and moving are written out
//! together with the ground-truth velocity of the object covering them.
//!
//! You can run simulations either by:
//!   1. Loading all parameters from a configuration file (TOML/JSON/YAML)
//!   2. Running the built-in scenario and overriding steps, time step and seeds via flags

mod common;
mod report;
mod scenario;

use clap::{Args, Parser, Subcommand};
use common::{init_logger, report_paths, run_prefix, validate_output_path};
use dogm::{ConfigFile, OccupancyGridMap};
use log::{error, info};
use rand::SeedableRng;
use rand::rngs::StdRng;
use rayon::prelude::*;
use report::{StepRecord, dynamic_cells, summarize_step, write_csv};
use scenario::{Scenario, SimulationConfig};
use std::error::Error;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Instant;

const LONG_ABOUT: &str = "DOGM SIM: A synthetic-scenario driver for the dynamic occupancy grid map.

Rectangular objects move at constant velocity in front of an idealised range sensor. Every cycle
the sensor model produces a measurement grid and the map is updated. Each run writes a per-step
summary to <output>.csv and the final occupied, moving cells to <output>_cells.csv.

You can run simulations either by:
  1. Loading all parameters from a configuration file (TOML/JSON/YAML)
  2. Running the built-in scenario and overriding steps, time step and seeds via flags";

/// Command line arguments
#[derive(Parser)]
#[command(author, version, about = "A synthetic-scenario driver for the dynamic occupancy grid map.", long_about = LONG_ABOUT)]
struct Cli {
    /// Scenario configuration file (TOML/JSON/YAML); the built-in scenario is used otherwise
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,

    /// Log level (off, error, warn, info, debug, trace)
    #[arg(long, default_value = "info", global = true)]
    log_level: String,

    /// Log file path (if not specified, logs to stderr)
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,

    /// Run the seeds of a multi-seed run in parallel
    #[arg(long, global = true)]
    parallel: bool,
}

#[derive(Subcommand, Clone)]
enum Command {
    #[command(
        name = "run",
        about = "Run the scenario and write CSV reports",
        long_about = "Run the scenario for every requested seed. Each run writes a per-step summary to <output>.csv and the final dynamic cells to <output>_cells.csv. With several seeds the seed is appended to the output prefix."
    )]
    Run(RunArgs),
    #[command(
        name = "config",
        about = "Write a template configuration file",
        long_about = "Write the built-in scenario as a configuration file. The format is chosen from the file extension (.toml, .json, .yaml/.yml)."
    )]
    Config(ConfigArgs),
}

#[derive(Args, Clone, Debug)]
struct RunArgs {
    /// Output prefix for the CSV reports
    #[arg(short, long, default_value = "dogm_run")]
    output: PathBuf,

    /// Number of update cycles (overrides the configuration)
    #[arg(long)]
    steps: Option<usize>,

    /// Time step in seconds (overrides the configuration)
    #[arg(long)]
    dt: Option<f64>,

    /// Comma-separated RNG seeds; defaults to the seed in the grid configuration
    #[arg(long, value_delimiter = ',')]
    seeds: Vec<u64>,
}

#[derive(Args, Clone, Debug)]
struct ConfigArgs {
    /// Path of the configuration file to write
    #[arg(short, long, default_value = "dogm_config.toml")]
    output: PathBuf,
}

/// Outcome of one seeded run.
#[derive(Clone, Debug)]
struct RunSummary {
    seed: u64,
    steps: Vec<StepRecord>,
    dynamic_cells: usize,
    elapsed_s: f64,
}

/// Run one seeded simulation and write its reports under `prefix`.
fn run_simulation(
    config: &SimulationConfig,
    seed: u64,
    prefix: &Path,
) -> Result<RunSummary, Box<dyn Error>> {
    let mut params = config.grid.clone();
    params.seed = seed;
    let mut map = OccupancyGridMap::new(params)?;
    let mut scenario = Scenario::new(&config.objects, &config.sensor);
    let mut rng = StdRng::seed_from_u64(seed.wrapping_add(1));

    info!(
        "Seed {}: {}x{} grid, {} particles, {} steps of {} s",
        seed,
        map.grid_width(),
        map.grid_height(),
        map.particle_count(),
        config.steps,
        config.dt
    );

    let start = Instant::now();
    let mut records = Vec::with_capacity(config.steps);
    for step in 0..config.steps {
        let measurements = scenario.measurement_grid(map.params(), &mut rng);
        map.update(config.dt, &measurements)?;
        records.push(summarize_step(step, scenario.time(), &map, &config.report));
        scenario.advance(config.dt);
    }
    let elapsed_s = start.elapsed().as_secs_f64();
    let cells = dynamic_cells(&map, &scenario, &config.report);

    let (steps_path, cells_path) = report_paths(prefix);
    write_csv(&records, &steps_path)?;
    write_csv(&cells, &cells_path)?;
    info!(
        "Seed {}: {} dynamic cells after {} cycles ({:.2} s, {:.1} ms/cycle), {} degenerate resamples",
        seed,
        cells.len(),
        config.steps,
        elapsed_s,
        1e3 * elapsed_s / config.steps.max(1) as f64,
        map.diagnostics().degenerate_resamples
    );
    info!("Wrote {} and {}", steps_path.display(), cells_path.display());

    Ok(RunSummary {
        seed,
        steps: records,
        dynamic_cells: cells.len(),
        elapsed_s,
    })
}

fn load_config(path: Option<&PathBuf>) -> Result<SimulationConfig, Box<dyn Error>> {
    let config = match path {
        Some(path) => {
            info!("Loading configuration from {}", path.display());
            SimulationConfig::from_file(path)?
        }
        None => SimulationConfig::default(),
    };
    config.validate()?;
    Ok(config)
}

fn run(args: &RunArgs, config_path: Option<&PathBuf>, parallel: bool) -> Result<(), Box<dyn Error>> {
    let mut config = load_config(config_path)?;
    if let Some(steps) = args.steps {
        config.steps = steps;
    }
    if let Some(dt) = args.dt {
        config.dt = dt;
    }
    config.validate()?;
    validate_output_path(&args.output)?;

    let seeds = if args.seeds.is_empty() {
        vec![config.grid.seed]
    } else {
        args.seeds.clone()
    };
    let multiple = seeds.len() > 1;

    let summaries = if parallel && multiple {
        info!("Running {} seeds in parallel", seeds.len());
        let errors = Mutex::new(Vec::new());
        let summaries = Mutex::new(Vec::new());
        seeds.par_iter().for_each(|&seed| {
            let prefix = run_prefix(&args.output, seed, multiple);
            match run_simulation(&config, seed, &prefix) {
                Ok(summary) => summaries
                    .lock()
                    .expect("Failed to acquire lock on run summaries - another thread panicked")
                    .push(summary),
                Err(e) => {
                    error!("Seed {} failed: {}", seed, e);
                    errors
                        .lock()
                        .expect("Failed to acquire lock on error collection - another thread panicked")
                        .push((seed, e.to_string()));
                }
            }
        });
        let errors = errors
            .into_inner()
            .expect("Failed to extract errors from mutex - another thread panicked");
        if !errors.is_empty() {
            return Err(format!("{} seed(s) failed", errors.len()).into());
        }
        let mut summaries = summaries
            .into_inner()
            .expect("Failed to extract summaries from mutex - another thread panicked");
        summaries.sort_by_key(|s| s.seed);
        summaries
    } else {
        let mut summaries = Vec::with_capacity(seeds.len());
        for &seed in &seeds {
            let prefix = run_prefix(&args.output, seed, multiple);
            summaries.push(run_simulation(&config, seed, &prefix)?);
        }
        summaries
    };

    for summary in &summaries {
        let degenerate = summary.steps.iter().filter(|s| s.degenerate).count();
        info!(
            "Seed {:>6}: {:>5} dynamic cells, {:>4} degenerate steps, {:.2} s",
            summary.seed, summary.dynamic_cells, degenerate, summary.elapsed_s
        );
    }
    Ok(())
}

fn write_config_template(args: &ConfigArgs) -> Result<(), Box<dyn Error>> {
    SimulationConfig::default().to_file(&args.output)?;
    info!("Configuration template written to {}", args.output.display());
    Ok(())
}

fn main() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();

    // logging settings from the configuration file apply unless given on the command line
    let config_logging = match cli.config {
        Some(ref path) => Some(SimulationConfig::from_file(path)?.logging),
        None => None,
    };
    let log_level = match config_logging {
        Some(ref logging) if cli.log_level == "info" => logging.level.clone(),
        _ => cli.log_level.clone(),
    };
    let config_log_file = config_logging
        .as_ref()
        .and_then(|l| l.file.as_ref())
        .map(PathBuf::from);
    init_logger(&log_level, cli.log_file.as_ref().or(config_log_file.as_ref()))?;

    match cli.command {
        Some(Command::Run(args)) => run(&args, cli.config.as_ref(), cli.parallel),
        Some(Command::Config(args)) => write_config_template(&args),
        None if cli.config.is_some() => {
            let args = RunArgs {
                output: PathBuf::from("dogm_run"),
                steps: None,
                dt: None,
                seeds: Vec::new(),
            };
            run(&args, cli.config.as_ref(), cli.parallel)
        }
        None => {
            eprintln!("Error: No command provided. Use -h or --help for usage information.");
            std::process::exit(1);
        }
    }
}
