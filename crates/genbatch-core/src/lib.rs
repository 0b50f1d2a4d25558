//! genbatch Core Library
//!
//! Adaptive, out-of-memory tolerant batch generation for large language
//! models. Given a model and a request for N sequences, the scheduler
//! estimates how many sequences fit in one call, recovers when that
//! estimate was too optimistic, and splits the request into ordered passes
//! whose outputs are concatenated in submission order.
//!
//! # Architecture
//!
//! - [`device`]: per-device footprint of an attached model and the memory
//!   left for generation
//! - [`generation`]: generation config resolution and stopping criteria
//! - [`estimator`]: batch size from a calibration table or the parameter
//!   count
//! - [`executor`]: one generation call with shrink-and-retry on OOM
//! - [`orchestrator`]: multi-pass splitting and concatenation
//! - [`engine`]: ties the above to one attached model
//!
//! The model and the device are consumed through the [`GenerativeModel`]
//! and [`DeviceBackend`] traits; [`stubs`] provides scripted versions of
//! both.
//!
//! # Example
//!
//! ```
//! use genbatch_core::stubs::{StubDeviceBackend, StubModel};
//! use genbatch_core::{GenerationEngine, GenerationRequest, SchedulerConfig};
//!
//! let engine = GenerationEngine::attach(
//!     StubDeviceBackend::new(vec![]),
//!     SchedulerConfig::default(),
//!     || Ok(StubModel::new("org/model-7b").with_max_fitting_batch(6)),
//! )?;
//!
//! let request = GenerationRequest::new(vec![1, 2, 3])
//!     .with_num_return_sequences(20)
//!     .with_seed(0);
//! let report = engine.generate(&request)?;
//! assert_eq!(report.output.len(), 20);
//! assert!(report.effective_batch_size <= 6);
//! # Ok::<(), genbatch_core::GenError>(())
//! ```

pub mod advisory;
pub mod config;
pub mod device;
pub mod engine;
pub mod error;
pub mod estimator;
pub mod executor;
pub mod generation;
pub mod model;
pub mod orchestrator;
pub mod plan;
pub mod stubs;

// Re-exports for convenience
pub use advisory::Advisory;
pub use config::{HeuristicConfig, SchedulerConfig};
pub use device::{DeviceBackend, DeviceId, DeviceMemoryMap, DeviceMemoryProbe, HostDeviceBackend};
pub use engine::GenerationEngine;
pub use error::{GenError, GenResult};
pub use estimator::{BatchFootprintEstimator, BatchFootprintModel, Estimate, EstimateSource};
pub use executor::{ExecutedBatch, OomSafeExecutor};
pub use generation::{GenerationConfig, GenerationConfigBuilder, GenerationParams, StoppingPatterns};
pub use model::{ExecutionFailure, GenerativeModel, PrecisionCategory, TokenId};
pub use orchestrator::{GenerationOutput, GenerationReport, GenerationRequest, MultiPassOrchestrator};
pub use plan::BatchPlan;
