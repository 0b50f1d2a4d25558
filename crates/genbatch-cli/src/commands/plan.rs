//! `plan`: batch plan for a request.

use clap::Args;
use tracing::error;

use genbatch_core::BatchPlan;

use super::{print_json, EXIT_ERROR};

#[derive(Args, Debug)]
pub struct PlanArgs {
    /// Number of sequences requested
    #[arg(long)]
    pub total: usize,

    /// Effective batch size
    #[arg(long)]
    pub batch_size: usize,
}

pub fn handle_plan(args: PlanArgs) -> i32 {
    match BatchPlan::partition(args.total, args.batch_size) {
        Ok(plan) => print_json(&plan),
        Err(e) => {
            error!("{}", e);
            EXIT_ERROR
        }
    }
}
