//! Collaborator interface for the wrapped language model.
//!
//! The scheduler never computes probabilities or picks tokens. It shapes a
//! request, hands it to a [`GenerativeModel`], and reacts to the typed
//! [`ExecutionFailure`] it gets back.

use std::collections::BTreeMap;

use rand::RngCore;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::device::DeviceId;
use crate::generation::{GenerationConfig, StoppingCriteria};

/// Token identifier.
pub type TokenId = u32;

/// Failure returned by a single `generate` call.
///
/// `OutOfMemory` is the only variant that drives recovery; everything else
/// is surfaced verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExecutionFailure {
    /// Device memory was exhausted during the call.
    #[error("out of memory: {message}")]
    OutOfMemory { message: String },

    /// Any other execution error.
    #[error("{message}")]
    Other { message: String },
}

impl ExecutionFailure {
    /// Shorthand for an out-of-memory failure.
    pub fn out_of_memory<E: std::fmt::Display>(e: E) -> Self {
        Self::OutOfMemory {
            message: e.to_string(),
        }
    }

    /// Shorthand for an unrelated failure.
    pub fn other<E: std::fmt::Display>(e: E) -> Self {
        Self::Other {
            message: e.to_string(),
        }
    }
}

/// Where a model shard was placed by the loader.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlacementTarget {
    Accelerator(u32),
    Cpu,
    Disk,
}

/// How the model is laid out across devices after loading.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModelPlacement {
    /// Whole model on one device.
    Single(DeviceId),
    /// Module name to device, as produced by a multi-device loader.
    Sharded(BTreeMap<String, PlacementTarget>),
}

/// Level at which special token ids are declared.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TokenSource {
    /// The model's own generation defaults.
    GenerationDefaults,
    /// The model's static architecture config.
    StaticConfig,
    /// The tokenizer.
    Tokenizer,
}

impl TokenSource {
    /// Lookup order, most specific first.
    pub const PRECEDENCE: [TokenSource; 3] = [
        TokenSource::GenerationDefaults,
        TokenSource::StaticConfig,
        TokenSource::Tokenizer,
    ];
}

/// Special token ids declared at one [`TokenSource`]. `None` means missing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SpecialTokens {
    pub eos: Option<Vec<TokenId>>,
    pub bos: Option<TokenId>,
    pub pad: Option<TokenId>,
}

/// Numeric precision of the loaded weights.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PrecisionCategory {
    Int4,
    Int8,
    Float16,
    BFloat16,
    Float32,
}

impl PrecisionCategory {
    /// Resolve the category from the weight dtype and quantization flags.
    ///
    /// Quantization wins over dtype, 4-bit over 8-bit.
    pub fn resolve(dtype: PrecisionCategory, quantization_8bits: bool, quantization_4bits: bool) -> Self {
        if quantization_4bits {
            PrecisionCategory::Int4
        } else if quantization_8bits {
            PrecisionCategory::Int8
        } else {
            dtype
        }
    }

    /// Name used for calibration table files.
    pub const fn as_str(&self) -> &'static str {
        match self {
            PrecisionCategory::Int4 => "int4",
            PrecisionCategory::Int8 => "int8",
            PrecisionCategory::Float16 => "float16",
            PrecisionCategory::BFloat16 => "bfloat16",
            PrecisionCategory::Float32 => "float32",
        }
    }
}

impl std::fmt::Display for PrecisionCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for PrecisionCategory {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "int4" => Ok(PrecisionCategory::Int4),
            "int8" => Ok(PrecisionCategory::Int8),
            "float16" | "fp16" | "f16" => Ok(PrecisionCategory::Float16),
            "bfloat16" | "bf16" => Ok(PrecisionCategory::BFloat16),
            "float32" | "fp32" | "f32" => Ok(PrecisionCategory::Float32),
            other => Err(format!("unknown precision category: {}", other)),
        }
    }
}

/// A loaded language model plus its tokenizer metadata.
pub trait GenerativeModel {
    /// Identity used to key calibration tables (e.g. `org/model-7b`).
    fn model_id(&self) -> &str;

    /// Precision of the loaded weights.
    fn precision(&self) -> PrecisionCategory;

    /// Raw parameter count. Shared parameters may be counted twice.
    fn parameter_count(&self) -> u64;

    /// Parameter memory as reported by the model itself, in bytes.
    fn memory_footprint_bytes(&self) -> u64;

    /// Device layout after loading.
    fn placement(&self) -> ModelPlacement;

    /// Special token ids declared at `source`.
    fn special_tokens(&self, source: TokenSource) -> SpecialTokens;

    /// Extra textual end-of-sequence markers beyond the EOS token ids.
    fn extra_eos_tokens(&self) -> Vec<String> {
        Vec::new()
    }

    /// Generate `num_return_sequences` continuations of `input`.
    ///
    /// Each returned sequence starts with `input`. Blocks until done.
    fn generate(
        &self,
        input: &[TokenId],
        config: &GenerationConfig,
        stopping: Option<&StoppingCriteria>,
        num_return_sequences: usize,
        rng: &mut dyn RngCore,
    ) -> Result<Vec<Vec<TokenId>>, ExecutionFailure>;

    /// Parameter count in billions.
    fn parameter_count_billions(&self) -> f64 {
        self.parameter_count() as f64 / 1e9
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_precision_quantization_wins() {
        assert_eq!(
            PrecisionCategory::resolve(PrecisionCategory::Float16, true, true),
            PrecisionCategory::Int4
        );
        assert_eq!(
            PrecisionCategory::resolve(PrecisionCategory::BFloat16, true, false),
            PrecisionCategory::Int8
        );
        assert_eq!(
            PrecisionCategory::resolve(PrecisionCategory::BFloat16, false, false),
            PrecisionCategory::BFloat16
        );
    }

    #[test]
    fn test_precision_parse_and_display() {
        assert_eq!("bf16".parse::<PrecisionCategory>(), Ok(PrecisionCategory::BFloat16));
        assert_eq!(PrecisionCategory::Float16.to_string(), "float16");
        assert!("fp8".parse::<PrecisionCategory>().is_err());
    }

    #[test]
    fn test_execution_failure_display() {
        let oom = ExecutionFailure::out_of_memory("tried to allocate 2.00 GiB");
        assert_eq!(oom.to_string(), "out of memory: tried to allocate 2.00 GiB");
        let other = ExecutionFailure::other("index out of range");
        assert_eq!(other.to_string(), "index out of range");
    }
}
