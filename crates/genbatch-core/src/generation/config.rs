//! Generation config resolution.
//!
//! A [`GenerationConfig`] is built once per request so the model's own
//! defaults can never silently change the generation mode.
//!
//! # Resolution order
//!
//! 1. `temperature == 0.0`, after sampling overrides, forces greedy decoding.
//! 2. EOS, BOS and PAD come from the first source that declares them:
//!    generation defaults, then static config, then tokenizer.
//! 3. A missing PAD falls back to the first EOS id. Nothing is ever padded,
//!    the id only has to be a terminator that decoding strips.

use std::str::FromStr;

use serde::Serialize;

use crate::error::{GenError, GenResult};
use crate::model::{GenerativeModel, SpecialTokens, TokenId, TokenSource};

/// Sampling hyperparameters. Present only when sampling is enabled.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SamplingParams {
    /// `None` (or 0 on input) disables top-k filtering.
    pub top_k: Option<usize>,
    /// `None` (or 1.0) disables nucleus filtering.
    pub top_p: Option<f32>,
    pub temperature: f32,
}

/// Names accepted for sampling overrides.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SamplingParam {
    TopK,
    TopP,
    Temperature,
}

impl FromStr for SamplingParam {
    type Err = GenError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "top_k" => Ok(SamplingParam::TopK),
            "top_p" => Ok(SamplingParam::TopP),
            "temperature" => Ok(SamplingParam::Temperature),
            other => Err(GenError::UnknownSamplingParameter {
                name: other.to_string(),
            }),
        }
    }
}

impl SamplingParams {
    fn apply(&mut self, param: SamplingParam, value: f64) {
        match param {
            SamplingParam::TopK => {
                self.top_k = (value >= 1.0).then_some(value as usize);
            }
            SamplingParam::TopP => self.top_p = Some(value as f32),
            SamplingParam::Temperature => self.temperature = value as f32,
        }
    }
}

/// Resolved, immutable generation config.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GenerationConfig {
    eos_token_ids: Vec<TokenId>,
    bos_token_id: TokenId,
    pad_token_id: TokenId,
    min_new_tokens: usize,
    max_new_tokens: usize,
    do_sample: bool,
    sampling: Option<SamplingParams>,
}

impl GenerationConfig {
    pub fn eos_token_ids(&self) -> &[TokenId] {
        &self.eos_token_ids
    }

    pub fn bos_token_id(&self) -> TokenId {
        self.bos_token_id
    }

    pub fn pad_token_id(&self) -> TokenId {
        self.pad_token_id
    }

    pub fn min_new_tokens(&self) -> usize {
        self.min_new_tokens
    }

    pub fn max_new_tokens(&self) -> usize {
        self.max_new_tokens
    }

    pub fn do_sample(&self) -> bool {
        self.do_sample
    }

    /// Sampling hyperparameters; `None` for greedy decoding.
    pub fn sampling(&self) -> Option<&SamplingParams> {
        self.sampling.as_ref()
    }
}

/// Caller-facing generation parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationParams {
    pub max_new_tokens: usize,
    pub min_new_tokens: usize,
    pub do_sample: bool,
    pub top_k: Option<usize>,
    pub top_p: Option<f32>,
    pub temperature: f32,
    /// Extra named sampling hyperparameters, applied after the above.
    pub sampling_overrides: Vec<(String, f64)>,
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self {
            max_new_tokens: 60,
            min_new_tokens: 5,
            do_sample: true,
            top_k: Some(40),
            top_p: Some(0.9),
            temperature: 0.9,
            sampling_overrides: Vec::new(),
        }
    }
}

impl GenerationParams {
    /// Greedy decoding with the given token budget.
    pub fn greedy(max_new_tokens: usize) -> Self {
        Self {
            max_new_tokens,
            do_sample: false,
            ..Default::default()
        }
    }

    /// Add a named sampling override.
    pub fn with_override(mut self, name: impl Into<String>, value: f64) -> Self {
        self.sampling_overrides.push((name.into(), value));
        self
    }
}

/// Builds [`GenerationConfig`]s against one model's declared defaults.
pub struct GenerationConfigBuilder<'a, M: GenerativeModel + ?Sized> {
    model: &'a M,
}

impl<'a, M: GenerativeModel + ?Sized> GenerationConfigBuilder<'a, M> {
    pub fn new(model: &'a M) -> Self {
        Self { model }
    }

    /// Resolve a config from individual parameters.
    pub fn build(
        &self,
        max_new_tokens: usize,
        min_new_tokens: usize,
        do_sample: bool,
        top_k: Option<usize>,
        top_p: Option<f32>,
        temperature: f32,
    ) -> GenResult<GenerationConfig> {
        self.build_from(&GenerationParams {
            max_new_tokens,
            min_new_tokens,
            do_sample,
            top_k,
            top_p,
            temperature,
            sampling_overrides: Vec::new(),
        })
    }

    /// Resolve a config from a parameter set, including overrides.
    pub fn build_from(&self, params: &GenerationParams) -> GenResult<GenerationConfig> {
        // Names are validated even when sampling ends up disabled.
        let overrides = params
            .sampling_overrides
            .iter()
            .map(|(name, value)| Ok((name.parse::<SamplingParam>()?, *value)))
            .collect::<GenResult<Vec<_>>>()?;

        let mut sampling = SamplingParams {
            top_k: params.top_k.filter(|k| *k > 0),
            top_p: params.top_p,
            temperature: params.temperature,
        };
        for (param, value) in overrides {
            sampling.apply(param, value);
        }
        // Decided on the temperature after overrides.
        let do_sample = params.do_sample && sampling.temperature != 0.0;

        let declared: Vec<SpecialTokens> = TokenSource::PRECEDENCE
            .iter()
            .map(|source| self.model.special_tokens(*source))
            .collect();

        let eos_token_ids = declared
            .iter()
            .find_map(|t| t.eos.clone().filter(|ids| !ids.is_empty()))
            .ok_or_else(|| GenError::configuration("Impossible to find the `eos_token_id`"))?;
        let bos_token_id = declared
            .iter()
            .find_map(|t| t.bos)
            .ok_or_else(|| GenError::configuration("Impossible to find the `bos_token_id`"))?;
        let pad_token_id = declared
            .iter()
            .find_map(|t| t.pad)
            .unwrap_or(eos_token_ids[0]);

        let sampling = do_sample.then_some(sampling);

        let config = GenerationConfig {
            eos_token_ids,
            bos_token_id,
            pad_token_id,
            min_new_tokens: params.min_new_tokens,
            max_new_tokens: params.max_new_tokens,
            do_sample,
            sampling,
        };
        tracing::debug!("Resolved generation config: {:?}", config);
        Ok(config)
    }
}
