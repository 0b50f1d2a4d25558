//! CLI command handlers
//!
//! Every handler returns the process exit code.

pub mod estimate;
pub mod plan;
pub mod simulate;

use std::path::Path;

use genbatch_core::SchedulerConfig;
use serde::Serialize;
use tracing::error;

pub const EXIT_SUCCESS: i32 = 0;
pub const EXIT_ERROR: i32 = 1;

/// Load scheduler settings, logging the failure.
fn load_config(path: Option<&Path>) -> Option<SchedulerConfig> {
    match SchedulerConfig::load_with(path) {
        Ok(config) => Some(config),
        Err(e) => {
            error!("Failed to load scheduler config: {}", e);
            None
        }
    }
}

/// Print `value` as pretty JSON on stdout.
fn print_json<T: Serialize>(value: &T) -> i32 {
    match serde_json::to_string_pretty(value) {
        Ok(json) => {
            println!("{}", json);
            EXIT_SUCCESS
        }
        Err(e) => {
            error!("Failed to serialize output: {}", e);
            EXIT_ERROR
        }
    }
}
