//! `estimate`: batch size for a model without loading it.
//!
//! The calibration table is looked up exactly as the engine would, under
//! the configured table root. Available memory is either given directly or
//! derived from host memory and the model footprint.

use std::path::{Path, PathBuf};

use clap::Args;
use serde::Serialize;
use tracing::{error, info};

use genbatch_core::device::{bytes_to_gib, DeviceBackend, HostDeviceBackend};
use genbatch_core::estimator::FootprintTableStore;
use genbatch_core::{BatchFootprintEstimator, Estimate, PrecisionCategory};

use super::{load_config, print_json, EXIT_ERROR};

#[derive(Args, Debug)]
pub struct EstimateArgs {
    /// Model identity used to key calibration tables
    #[arg(long)]
    pub model_id: String,

    /// Weight precision (int4, int8, float16, bfloat16, float32)
    #[arg(long, default_value = "float16")]
    pub precision: PrecisionCategory,

    /// Parameter count in billions
    #[arg(long)]
    pub params_b: f64,

    /// Prompt length in tokens
    #[arg(long)]
    pub seq_len: usize,

    #[arg(long, default_value = "60")]
    pub max_new_tokens: usize,

    /// Memory available for generation in GiB; derived from host memory if omitted
    #[arg(long)]
    pub available_gb: Option<f64>,

    /// Model footprint in GiB, subtracted when deriving available memory
    #[arg(long, default_value = "0")]
    pub footprint_gb: f64,
}

#[derive(Serialize)]
struct EstimateReport {
    model_id: String,
    precision: PrecisionCategory,
    table_path: PathBuf,
    table_found: bool,
    available_gb: f64,
    #[serde(flatten)]
    estimate: Estimate,
}

pub fn handle_estimate(args: EstimateArgs, config_path: Option<&Path>) -> i32 {
    let Some(config) = load_config(config_path) else {
        return EXIT_ERROR;
    };

    let store = FootprintTableStore::new(&config.footprint_table_root);
    let table = match store.load(&args.model_id, args.precision) {
        Ok(table) => table,
        Err(e) => {
            error!("{}", e);
            return EXIT_ERROR;
        }
    };
    let table_found = table.is_some();

    let available_gb = args.available_gb.unwrap_or_else(|| {
        let host_gb = bytes_to_gib(HostDeviceBackend::new().host_total_memory());
        host_gb * config.memory_fraction - args.footprint_gb
    });

    let estimator = match BatchFootprintEstimator::new(table, args.params_b, &config) {
        Ok(estimator) => estimator,
        Err(e) => {
            error!("{}", e);
            return EXIT_ERROR;
        }
    };
    let estimate = estimator.estimate_detailed(args.seq_len, args.max_new_tokens, available_gb);
    info!(
        "Estimated batch size {} for '{}' ({:.2} GiB available)",
        estimate.batch_size, args.model_id, available_gb
    );

    print_json(&EstimateReport {
        table_path: store.path_for(&args.model_id, args.precision),
        model_id: args.model_id,
        precision: args.precision,
        table_found,
        available_gb,
        estimate,
    })
}
