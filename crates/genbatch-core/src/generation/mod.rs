//! Per-request generation settings: resolved config and stopping criteria.

mod config;
mod stopping;

pub use config::{
    GenerationConfig, GenerationConfigBuilder, GenerationParams, SamplingParam, SamplingParams,
};
pub use stopping::{StoppingCriteria, StoppingPatterns, EXTENDED_CODE_STOP_PATTERNS};
