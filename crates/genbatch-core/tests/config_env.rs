//! Environment overrides for `SchedulerConfig`.
//!
//! Kept in its own test binary with a single test: the process environment
//! is shared by every test in a binary.

use std::io::Write;

use genbatch_core::SchedulerConfig;
use tempfile::Builder;

#[test]
fn environment_overrides_file_and_defaults() {
    let mut file = Builder::new().suffix(".toml").tempfile().expect("temp file");
    writeln!(file, "memory_fraction = 0.7\nmin_r_squared = 0.9").expect("write config");

    std::env::set_var("GENBATCH__MEMORY_FRACTION", "0.5");
    let loaded = SchedulerConfig::load_with(Some(file.path()));
    std::env::remove_var("GENBATCH__MEMORY_FRACTION");

    let config = loaded.expect("load");
    assert_eq!(config.memory_fraction, 0.5);
    assert_eq!(config.min_r_squared, 0.9);
    assert_eq!(config.shrink_factor, 0.8);

    std::env::set_var("GENBATCH__SHRINK_FACTOR", "1.5");
    let rejected = SchedulerConfig::load_with(Some(file.path()));
    std::env::remove_var("GENBATCH__SHRINK_FACTOR");
    assert!(rejected.is_err());
    println!("[PASS] env > file > defaults, env values validated");
}
