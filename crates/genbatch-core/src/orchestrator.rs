//! Multi-pass generation.
//!
//! A request for more sequences than fit in one call is split into ordered
//! batches. The first batch runs through the [`OomSafeExecutor`] and
//! settles the effective batch size; every later batch reuses that size,
//! since the same memory ceiling applies to the rest of the request.

use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::Serialize;

use crate::advisory::Advisory;
use crate::device::DeviceBackend;
use crate::error::{GenError, GenResult};
use crate::estimator::{BatchFootprintEstimator, Estimate};
use crate::executor::OomSafeExecutor;
use crate::generation::{GenerationConfig, GenerationConfigBuilder, GenerationParams, StoppingPatterns};
use crate::model::{GenerativeModel, TokenId};
use crate::plan::BatchPlan;

/// One generation request.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    /// Tokenized, already formatted prompt.
    pub input: Vec<TokenId>,
    pub params: GenerationParams,
    pub num_return_sequences: usize,
    /// Explicit batch size; estimated when `None`.
    pub batch_size: Option<usize>,
    /// Seed for the request-scoped RNG; entropy when `None`.
    pub seed: Option<u64>,
    pub stopping_patterns: StoppingPatterns,
    /// Strip the prompt from returned sequences (default: true).
    pub truncate_prompt: bool,
}

impl GenerationRequest {
    /// Single-sequence request with default parameters.
    pub fn new(input: Vec<TokenId>) -> Self {
        Self {
            input,
            params: GenerationParams::default(),
            num_return_sequences: 1,
            batch_size: None,
            seed: None,
            stopping_patterns: StoppingPatterns::Disabled,
            truncate_prompt: true,
        }
    }

    pub fn with_params(mut self, params: GenerationParams) -> Self {
        self.params = params;
        self
    }

    pub fn with_num_return_sequences(mut self, n: usize) -> Self {
        self.num_return_sequences = n;
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = Some(batch_size);
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn with_stopping_patterns(mut self, patterns: impl Into<StoppingPatterns>) -> Self {
        self.stopping_patterns = patterns.into();
        self
    }

    pub fn with_truncate_prompt(mut self, truncate: bool) -> Self {
        self.truncate_prompt = truncate;
        self
    }
}

/// Generated sequences.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum GenerationOutput {
    /// Exactly one sequence was generated.
    Single(Vec<TokenId>),
    /// Several sequences, in submission order.
    Many(Vec<Vec<TokenId>>),
}

impl GenerationOutput {
    fn from_sequences(mut sequences: Vec<Vec<TokenId>>) -> Self {
        if sequences.len() == 1 {
            GenerationOutput::Single(sequences.remove(0))
        } else {
            GenerationOutput::Many(sequences)
        }
    }

    /// Number of sequences.
    pub fn len(&self) -> usize {
        match self {
            GenerationOutput::Single(_) => 1,
            GenerationOutput::Many(s) => s.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Flatten into an ordered list.
    pub fn into_vec(self) -> Vec<Vec<TokenId>> {
        match self {
            GenerationOutput::Single(s) => vec![s],
            GenerationOutput::Many(s) => s,
        }
    }
}

/// Outcome of a request plus how it was scheduled.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GenerationReport {
    pub output: GenerationOutput,
    pub plan: BatchPlan,
    pub effective_batch_size: usize,
    /// Sizes tried for the first batch.
    pub attempted_batch_sizes: Vec<usize>,
    pub advisories: Vec<Advisory>,
    /// `None` when the caller supplied a batch size.
    pub estimate: Option<Estimate>,
    pub config: GenerationConfig,
}

/// Splits a request into batches and concatenates their outputs.
pub struct MultiPassOrchestrator<'a, M: ?Sized, B: ?Sized> {
    executor: OomSafeExecutor<'a, M, B>,
    estimator: &'a BatchFootprintEstimator,
    available_memory_gb: f64,
}

impl<'a, M, B> MultiPassOrchestrator<'a, M, B>
where
    M: GenerativeModel + ?Sized,
    B: DeviceBackend + ?Sized,
{
    pub fn new(
        executor: OomSafeExecutor<'a, M, B>,
        estimator: &'a BatchFootprintEstimator,
        available_memory_gb: f64,
    ) -> Self {
        Self {
            executor,
            estimator,
            available_memory_gb,
        }
    }

    /// Serve a request.
    pub fn generate(&self, request: &GenerationRequest) -> GenResult<GenerationReport> {
        if request.input.is_empty() {
            return Err(GenError::invalid_request("input must contain at least one token"));
        }
        if request.num_return_sequences == 0 {
            return Err(GenError::invalid_request("num_return_sequences must be at least 1"));
        }
        if request.batch_size == Some(0) {
            return Err(GenError::invalid_request("batch_size must be at least 1"));
        }

        let model = self.executor.model();
        let config = GenerationConfigBuilder::new(model).build_from(&request.params)?;

        let mut advisories = Vec::new();
        let mut total = request.num_return_sequences;
        if total > 1 && !config.do_sample() {
            let advisory = Advisory::SamplingCollapsed { requested: total };
            advisory.emit();
            advisories.push(advisory);
            total = 1;
        }

        let mut rng = match request.seed {
            Some(seed) => ChaCha8Rng::seed_from_u64(seed),
            None => ChaCha8Rng::from_entropy(),
        };

        let input_length = request.input.len();
        let stopping = request
            .stopping_patterns
            .resolve(input_length, &model.extra_eos_tokens());

        let (initial, estimate) = match request.batch_size {
            Some(batch_size) => (batch_size, None),
            None => {
                let estimate = self.estimator.estimate_detailed(
                    input_length,
                    config.max_new_tokens(),
                    self.available_memory_gb,
                );
                (estimate.batch_size, Some(estimate))
            }
        };
        let initial = initial.min(total);

        tracing::info!(
            "Generating {} sequences for '{}' (input {} tokens, initial batch {})",
            total,
            model.model_id(),
            input_length,
            initial
        );

        let first = self.executor.run(
            &request.input,
            &config,
            stopping.as_ref(),
            initial,
            &mut rng,
        )?;
        advisories.extend(first.advisories);

        let plan = BatchPlan::partition(total, first.effective_batch_size)?;
        tracing::debug!("Batch plan: {:?}", plan.batches());

        let mut sequences = first.sequences;
        sequences.reserve(total.saturating_sub(sequences.len()));
        for &size in plan.batches().iter().skip(1) {
            let batch = self.executor.run_exact(
                &request.input,
                &config,
                stopping.as_ref(),
                size,
                &mut rng,
            )?;
            sequences.extend(batch);
        }

        if request.truncate_prompt {
            for sequence in &mut sequences {
                sequence.drain(..input_length.min(sequence.len()));
            }
        }

        tracing::info!(
            "Generated {} sequences in {} batches (effective batch size {})",
            sequences.len(),
            plan.len(),
            first.effective_batch_size
        );

        Ok(GenerationReport {
            output: GenerationOutput::from_sequences(sequences),
            plan,
            effective_batch_size: first.effective_batch_size,
            attempted_batch_sizes: first.attempted_batch_sizes,
            advisories,
            estimate,
            config,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SchedulerConfig;
    use crate::estimator::EstimateSource;
    use crate::stubs::{StubDeviceBackend, StubModel};

    fn heuristic_estimator() -> BatchFootprintEstimator {
        BatchFootprintEstimator::new(None, 7.0, &SchedulerConfig::default()).unwrap()
    }

    fn sampling() -> GenerationParams {
        GenerationParams {
            max_new_tokens: 3,
            ..Default::default()
        }
    }

    #[test]
    fn test_twenty_sequences_with_oom_at_10_and_8() {
        let model = StubModel::new("m").with_max_fitting_batch(6);
        let backend = StubDeviceBackend::new(vec![]);
        let estimator = heuristic_estimator();
        // 10 GiB at 1 GiB/seq -> initial batch of 10.
        let orchestrator =
            MultiPassOrchestrator::new(OomSafeExecutor::new(&model, &backend, 0.8), &estimator, 10.0);

        let request = GenerationRequest::new(vec![5, 6, 7])
            .with_params(sampling())
            .with_num_return_sequences(20)
            .with_seed(7);
        let report = orchestrator.generate(&request).unwrap();

        assert_eq!(report.attempted_batch_sizes, vec![10, 8, 6]);
        assert_eq!(report.effective_batch_size, 6);
        assert_eq!(report.plan.batches(), &[6, 6, 6, 2]);
        assert_eq!(model.calls(), vec![10, 8, 6, 6, 6, 2]);
        assert_eq!(report.output.len(), 20);
        assert_eq!(
            report.estimate.map(|e| e.source),
            Some(EstimateSource::Heuristic { band: 1 })
        );
        println!("[PASS] first batch settles at 6, plan [6, 6, 6, 2]");
    }

    #[test]
    fn test_prompt_truncated_by_default() {
        let model = StubModel::new("m");
        let backend = StubDeviceBackend::new(vec![]);
        let estimator = heuristic_estimator();
        let orchestrator =
            MultiPassOrchestrator::new(OomSafeExecutor::new(&model, &backend, 0.8), &estimator, 10.0);

        let request = GenerationRequest::new(vec![5, 6, 7])
            .with_params(sampling())
            .with_num_return_sequences(3)
            .with_seed(1);
        let sequences = orchestrator.generate(&request).unwrap().output.into_vec();
        assert!(sequences.iter().all(|s| s.len() == 3));

        let untruncated = orchestrator
            .generate(&request.clone().with_truncate_prompt(false))
            .unwrap()
            .output
            .into_vec();
        assert!(untruncated.iter().all(|s| s.len() == 6 && s[..3] == [5, 6, 7]));
    }

    #[test]
    fn test_single_sequence_returns_single_value() {
        let model = StubModel::new("m");
        let backend = StubDeviceBackend::new(vec![]);
        let estimator = heuristic_estimator();
        let orchestrator =
            MultiPassOrchestrator::new(OomSafeExecutor::new(&model, &backend, 0.8), &estimator, 10.0);

        let report = orchestrator
            .generate(&GenerationRequest::new(vec![1]).with_params(sampling()))
            .unwrap();
        assert!(matches!(report.output, GenerationOutput::Single(ref s) if s.len() == 3));
        assert_eq!(model.calls(), vec![1]);
    }

    #[test]
    fn test_greedy_multi_sequence_collapses_to_one() {
        let model = StubModel::new("m");
        let backend = StubDeviceBackend::new(vec![]);
        let estimator = heuristic_estimator();
        let orchestrator =
            MultiPassOrchestrator::new(OomSafeExecutor::new(&model, &backend, 0.8), &estimator, 10.0);

        let request = GenerationRequest::new(vec![1])
            .with_params(GenerationParams::greedy(4))
            .with_num_return_sequences(5);
        let report = orchestrator.generate(&request).unwrap();
        assert_eq!(report.output.len(), 1);
        assert_eq!(report.advisories, vec![Advisory::SamplingCollapsed { requested: 5 }]);
        assert_eq!(model.calls(), vec![1]);

        // Zero temperature collapses the same way.
        let params = GenerationParams {
            temperature: 0.0,
            ..sampling()
        };
        let report = orchestrator
            .generate(&request.clone().with_params(params))
            .unwrap();
        assert_eq!(report.output.len(), 1);
        println!("[PASS] greedy + n>1 collapses to one sequence");
    }

    #[test]
    fn test_zero_temperature_override_collapses_to_one() {
        let model = StubModel::new("m");
        let backend = StubDeviceBackend::new(vec![]);
        let estimator = heuristic_estimator();
        let orchestrator =
            MultiPassOrchestrator::new(OomSafeExecutor::new(&model, &backend, 0.8), &estimator, 10.0);

        let request = GenerationRequest::new(vec![1])
            .with_params(sampling().with_override("temperature", 0.0))
            .with_num_return_sequences(5);
        let report = orchestrator.generate(&request).unwrap();
        assert!(!report.config.do_sample());
        assert_eq!(report.output.len(), 1);
        assert_eq!(report.advisories, vec![Advisory::SamplingCollapsed { requested: 5 }]);
        assert_eq!(model.calls(), vec![1]);
        println!("[PASS] temperature override of 0.0 collapses to one sequence");
    }

    #[test]
    fn test_explicit_batch_size_skips_estimate_and_is_clamped() {
        let model = StubModel::new("m");
        let backend = StubDeviceBackend::new(vec![]);
        let estimator = heuristic_estimator();
        let orchestrator =
            MultiPassOrchestrator::new(OomSafeExecutor::new(&model, &backend, 0.8), &estimator, 10.0);

        let request = GenerationRequest::new(vec![1])
            .with_params(sampling())
            .with_num_return_sequences(4)
            .with_batch_size(64);
        let report = orchestrator.generate(&request).unwrap();
        assert!(report.estimate.is_none());
        assert_eq!(model.calls(), vec![4]);
        assert_eq!(report.plan.batches(), &[4]);
    }

    #[test]
    fn test_same_seed_same_output() {
        let model = StubModel::new("m");
        let backend = StubDeviceBackend::new(vec![]);
        let estimator = heuristic_estimator();
        let orchestrator =
            MultiPassOrchestrator::new(OomSafeExecutor::new(&model, &backend, 0.8), &estimator, 2.0);

        let request = GenerationRequest::new(vec![1, 2])
            .with_params(sampling())
            .with_num_return_sequences(5)
            .with_seed(42);
        let a = orchestrator.generate(&request).unwrap();
        let b = orchestrator.generate(&request).unwrap();
        assert_eq!(a.output, b.output);
        let c = orchestrator.generate(&request.clone().with_seed(43)).unwrap();
        assert_ne!(a.output, c.output);
    }

    #[test]
    fn test_configuration_error_before_any_device_call() {
        let model = StubModel::new("m").with_special_tokens(
            crate::model::TokenSource::GenerationDefaults,
            Default::default(),
        );
        let backend = StubDeviceBackend::new(vec![]);
        let estimator = heuristic_estimator();
        let orchestrator =
            MultiPassOrchestrator::new(OomSafeExecutor::new(&model, &backend, 0.8), &estimator, 10.0);

        let err = orchestrator.generate(&GenerationRequest::new(vec![1])).unwrap_err();
        assert!(matches!(err, GenError::Configuration { .. }));
        assert!(model.calls().is_empty());
    }

    #[test]
    fn test_invalid_requests_rejected() {
        let model = StubModel::new("m");
        let backend = StubDeviceBackend::new(vec![]);
        let estimator = heuristic_estimator();
        let orchestrator =
            MultiPassOrchestrator::new(OomSafeExecutor::new(&model, &backend, 0.8), &estimator, 10.0);

        assert!(orchestrator.generate(&GenerationRequest::new(vec![])).is_err());
        assert!(orchestrator
            .generate(&GenerationRequest::new(vec![1]).with_num_return_sequences(0))
            .is_err());
        assert!(orchestrator
            .generate(&GenerationRequest::new(vec![1]).with_batch_size(0))
            .is_err());
        assert!(model.calls().is_empty());
    }
}
