//! `simulate`: dry run of the scheduler against a stub model.
//!
//! The stub fails with an out-of-memory error whenever a call asks for
//! more than `--max-fitting-batch` sequences, which shows how the first
//! batch shrinks and how the rest of the request is planned.

use std::path::Path;

use clap::Args;
use serde::Serialize;
use tracing::error;

use genbatch_core::stubs::{StubDeviceBackend, StubModel};
use genbatch_core::{
    Advisory, BatchPlan, GenerationEngine, GenerationParams, GenerationRequest,
};

use super::{load_config, print_json, EXIT_ERROR};

#[derive(Args, Debug)]
pub struct SimulateArgs {
    /// Number of sequences requested
    #[arg(long)]
    pub total: usize,

    /// Batch size of the first attempt
    #[arg(long)]
    pub initial_batch: usize,

    /// Largest batch the stub model can run; 0 runs out of memory always
    #[arg(long)]
    pub max_fitting_batch: usize,

    /// Seed for the request RNG
    #[arg(long)]
    pub seed: Option<u64>,

    #[arg(long, default_value = "8")]
    pub max_new_tokens: usize,

    /// Use greedy decoding instead of sampling
    #[arg(long)]
    pub greedy: bool,
}

#[derive(Serialize)]
struct SimulationReport {
    requested: usize,
    generated: usize,
    attempted_batch_sizes: Vec<usize>,
    effective_batch_size: usize,
    plan: BatchPlan,
    model_calls: Vec<usize>,
    advisories: Vec<Advisory>,
}

pub fn handle_simulate(args: SimulateArgs, config_path: Option<&Path>) -> i32 {
    let Some(config) = load_config(config_path) else {
        return EXIT_ERROR;
    };

    let max_fitting_batch = args.max_fitting_batch;
    let engine = match GenerationEngine::attach(StubDeviceBackend::new(vec![]), config, || {
        Ok(StubModel::new("simulated").with_max_fitting_batch(max_fitting_batch))
    }) {
        Ok(engine) => engine,
        Err(e) => {
            error!("Failed to attach stub model: {}", e);
            return EXIT_ERROR;
        }
    };

    let params = if args.greedy {
        GenerationParams::greedy(args.max_new_tokens)
    } else {
        GenerationParams {
            max_new_tokens: args.max_new_tokens,
            ..Default::default()
        }
    };
    let mut request = GenerationRequest::new(vec![1, 2, 3, 4])
        .with_params(params)
        .with_num_return_sequences(args.total)
        .with_batch_size(args.initial_batch);
    if let Some(seed) = args.seed {
        request = request.with_seed(seed);
    }

    let report = match engine.generate(&request) {
        Ok(report) => report,
        Err(e) => {
            error!("Simulation failed: {}", e);
            if e.is_out_of_memory() {
                error!("Lower --initial-batch or raise --max-fitting-batch");
            }
            return EXIT_ERROR;
        }
    };

    print_json(&SimulationReport {
        requested: args.total,
        generated: report.output.len(),
        attempted_batch_sizes: report.attempted_batch_sizes,
        effective_batch_size: report.effective_batch_size,
        plan: report.plan,
        model_calls: engine.model().calls(),
        advisories: report.advisories,
    })
}
