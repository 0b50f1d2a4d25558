//! Stub collaborators for tests and dry runs.
//!
//! [`StubModel`] emulates a device with a fixed memory ceiling: any call for
//! more than `max_fitting_batch` sequences fails with an out-of-memory
//! error. Generated tokens come from the request RNG, so a fixed seed gives
//! a fixed output.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use rand::RngCore;

use crate::device::{DeviceBackend, DeviceId};
use crate::generation::{GenerationConfig, StoppingCriteria};
use crate::model::{
    ExecutionFailure, GenerativeModel, ModelPlacement, PrecisionCategory, SpecialTokens, TokenId,
    TokenSource,
};

/// Something a stub observed, in call order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StubEvent {
    /// `generate` called with this many sequences.
    Generate(usize),
    /// Device cache released.
    Release,
}

/// Event log shared between a stub model and a stub backend.
#[derive(Debug, Clone, Default)]
pub struct StubEventLog(Arc<Mutex<Vec<StubEvent>>>);

impl StubEventLog {
    fn push(&self, event: StubEvent) {
        self.0.lock().push(event);
    }

    /// Snapshot of all events so far.
    pub fn events(&self) -> Vec<StubEvent> {
        self.0.lock().clone()
    }
}

/// Scripted [`GenerativeModel`].
#[derive(Debug)]
pub struct StubModel {
    model_id: String,
    precision: PrecisionCategory,
    parameter_count: u64,
    footprint_bytes: u64,
    placement: ModelPlacement,
    special_tokens: HashMap<TokenSource, SpecialTokens>,
    extra_eos_tokens: Vec<String>,
    max_fitting_batch: usize,
    failure: Option<String>,
    vocab_size: u32,
    calls: Mutex<Vec<usize>>,
    log: Option<StubEventLog>,
}

impl StubModel {
    /// A 7B float16 model on the host that declares EOS=2, BOS=1 and no PAD
    /// in its generation defaults, and never runs out of memory.
    pub fn new(model_id: &str) -> Self {
        let mut special_tokens = HashMap::new();
        special_tokens.insert(
            TokenSource::GenerationDefaults,
            SpecialTokens {
                eos: Some(vec![2]),
                bos: Some(1),
                pad: None,
            },
        );
        Self {
            model_id: model_id.to_string(),
            precision: PrecisionCategory::Float16,
            parameter_count: 7_000_000_000,
            footprint_bytes: 14 * 1024 * 1024 * 1024,
            placement: ModelPlacement::Single(DeviceId::Cpu),
            special_tokens,
            extra_eos_tokens: Vec::new(),
            max_fitting_batch: usize::MAX,
            failure: None,
            vocab_size: 32_000,
            calls: Mutex::new(Vec::new()),
            log: None,
        }
    }

    pub fn with_precision(mut self, precision: PrecisionCategory) -> Self {
        self.precision = precision;
        self
    }

    pub fn with_parameter_count(mut self, parameter_count: u64) -> Self {
        self.parameter_count = parameter_count;
        self
    }

    pub fn with_footprint_bytes(mut self, bytes: u64) -> Self {
        self.footprint_bytes = bytes;
        self
    }

    pub fn with_placement(mut self, placement: ModelPlacement) -> Self {
        self.placement = placement;
        self
    }

    /// Replace the tokens declared at `source`.
    pub fn with_special_tokens(mut self, source: TokenSource, tokens: SpecialTokens) -> Self {
        self.special_tokens.insert(source, tokens);
        self
    }

    pub fn with_extra_eos_tokens(mut self, tokens: Vec<String>) -> Self {
        self.extra_eos_tokens = tokens;
        self
    }

    /// Largest batch that fits; 0 makes every call run out of memory.
    pub fn with_max_fitting_batch(mut self, max: usize) -> Self {
        self.max_fitting_batch = max;
        self
    }

    /// Fail every call with a non-memory error.
    pub fn with_failure(mut self, message: &str) -> Self {
        self.failure = Some(message.to_string());
        self
    }

    pub fn with_event_log(mut self, log: StubEventLog) -> Self {
        self.log = Some(log);
        self
    }

    /// Batch sizes requested so far, in order.
    pub fn calls(&self) -> Vec<usize> {
        self.calls.lock().clone()
    }
}

impl GenerativeModel for StubModel {
    fn model_id(&self) -> &str {
        &self.model_id
    }

    fn precision(&self) -> PrecisionCategory {
        self.precision
    }

    fn parameter_count(&self) -> u64 {
        self.parameter_count
    }

    fn memory_footprint_bytes(&self) -> u64 {
        self.footprint_bytes
    }

    fn placement(&self) -> ModelPlacement {
        self.placement.clone()
    }

    fn special_tokens(&self, source: TokenSource) -> SpecialTokens {
        self.special_tokens.get(&source).cloned().unwrap_or_default()
    }

    fn extra_eos_tokens(&self) -> Vec<String> {
        self.extra_eos_tokens.clone()
    }

    fn generate(
        &self,
        input: &[TokenId],
        config: &GenerationConfig,
        _stopping: Option<&StoppingCriteria>,
        num_return_sequences: usize,
        rng: &mut dyn RngCore,
    ) -> Result<Vec<Vec<TokenId>>, ExecutionFailure> {
        self.calls.lock().push(num_return_sequences);
        if let Some(log) = &self.log {
            log.push(StubEvent::Generate(num_return_sequences));
        }

        if let Some(message) = &self.failure {
            return Err(ExecutionFailure::other(message));
        }
        if num_return_sequences > self.max_fitting_batch {
            return Err(ExecutionFailure::out_of_memory(format!(
                "batch of {} exceeds the {} sequences that fit",
                num_return_sequences, self.max_fitting_batch
            )));
        }

        let sequences = (0..num_return_sequences)
            .map(|_| {
                let mut sequence = input.to_vec();
                sequence.extend((0..config.max_new_tokens()).map(|_| rng.next_u32() % self.vocab_size));
                sequence
            })
            .collect();
        Ok(sequences)
    }
}

/// In-memory [`DeviceBackend`] with settable allocation counters.
#[derive(Debug, Default)]
pub struct StubDeviceBackend {
    totals: Vec<u64>,
    allocated: Mutex<Vec<u64>>,
    host_total: u64,
    releases: AtomicUsize,
    log: Option<StubEventLog>,
}

impl StubDeviceBackend {
    /// One accelerator per entry in `totals` (bytes); host has 64 GiB.
    pub fn new(totals: Vec<u64>) -> Self {
        let allocated = vec![0; totals.len()];
        Self {
            totals,
            allocated: Mutex::new(allocated),
            host_total: 64 * 1024 * 1024 * 1024,
            releases: AtomicUsize::new(0),
            log: None,
        }
    }

    pub fn with_host_total(mut self, bytes: u64) -> Self {
        self.host_total = bytes;
        self
    }

    pub fn with_event_log(mut self, log: StubEventLog) -> Self {
        self.log = Some(log);
        self
    }

    /// Set the allocated bytes reported for `device`.
    pub fn set_allocated(&self, device: u32, bytes: u64) {
        if let Some(slot) = self.allocated.lock().get_mut(device as usize) {
            *slot = bytes;
        }
    }

    /// Number of `release_cached` calls so far.
    pub fn release_count(&self) -> usize {
        self.releases.load(Ordering::SeqCst)
    }
}

impl DeviceBackend for StubDeviceBackend {
    fn accelerator_count(&self) -> u32 {
        self.totals.len() as u32
    }

    fn memory_allocated(&self, device: u32) -> u64 {
        self.allocated.lock().get(device as usize).copied().unwrap_or(0)
    }

    fn total_memory(&self, device: u32) -> u64 {
        self.totals.get(device as usize).copied().unwrap_or(0)
    }

    fn host_total_memory(&self) -> u64 {
        self.host_total
    }

    fn release_cached(&self) {
        self.releases.fetch_add(1, Ordering::SeqCst);
        if let Some(log) = &self.log {
            log.push(StubEvent::Release);
        }
    }
}
