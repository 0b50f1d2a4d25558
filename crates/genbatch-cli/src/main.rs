//! genbatch CLI
//!
//! Operator tools for the generation scheduler.
//!
//! # Commands
//!
//! - `estimate`: Batch size the estimator picks for a model and input length
//! - `plan`: Batch plan for a request size and batch size
//! - `simulate`: Run a request against a stub model with a fixed memory ceiling
//!
//! Results are printed to stdout as JSON; logs go to stderr.
//! Exit code 0 on success, 1 on error.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, EnvFilter};

mod commands;

/// genbatch - adaptive batch generation scheduler
#[derive(Parser)]
#[command(name = "genbatch")]
#[command(version)]
#[command(about = "Inspect and simulate OOM-tolerant batch generation")]
#[command(propagate_version = true)]
struct Cli {
    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Scheduler config file (TOML); defaults to config/genbatch.toml if present
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Estimate the batch size for a model and input length
    Estimate(commands::estimate::EstimateArgs),
    /// Split a request into batches
    Plan(commands::plan::PlanArgs),
    /// Run a request against a stub model that runs out of memory above a
    /// fixed batch size
    Simulate(commands::simulate::SimulateArgs),
}

fn main() {
    let cli = Cli::parse();

    // Setup logging based on verbosity
    let filter = match cli.verbose {
        0 => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        1 => EnvFilter::new("info"),
        2 => EnvFilter::new("debug"),
        _ => EnvFilter::new("trace"),
    };

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_level(true)
        .with_writer(std::io::stderr)
        .init();

    let config = cli.config.as_deref();
    let exit_code = match cli.command {
        Commands::Estimate(args) => commands::estimate::handle_estimate(args, config),
        Commands::Plan(args) => commands::plan::handle_plan(args),
        Commands::Simulate(args) => commands::simulate::handle_simulate(args, config),
    };

    std::process::exit(exit_code);
}
