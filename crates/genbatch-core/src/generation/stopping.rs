//! Stopping pattern selection.
//!
//! The matching logic itself belongs to the model collaborator. This module
//! only decides, once per request, which patterns to hand over.

use serde::{Deserialize, Serialize};

/// Patterns used when the caller asks for the default set.
pub const EXTENDED_CODE_STOP_PATTERNS: &[&str] = &[
    "\nclass",
    "\ndef",
    "\n#",
    "\n@",
    "\nprint",
    "\nif",
    "\n```",
];

/// Caller choice of stopping patterns.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoppingPatterns {
    /// No pattern-based stopping.
    #[default]
    Disabled,
    /// Use [`EXTENDED_CODE_STOP_PATTERNS`].
    DefaultExtendedPatterns,
    /// Caller-provided patterns.
    ExplicitPatterns(Vec<String>),
}

impl From<bool> for StoppingPatterns {
    fn from(enabled: bool) -> Self {
        if enabled {
            StoppingPatterns::DefaultExtendedPatterns
        } else {
            StoppingPatterns::Disabled
        }
    }
}

impl From<Vec<String>> for StoppingPatterns {
    fn from(patterns: Vec<String>) -> Self {
        StoppingPatterns::ExplicitPatterns(patterns)
    }
}

impl StoppingPatterns {
    /// Concrete pattern list, or `None` when disabled.
    pub fn patterns(&self) -> Option<Vec<String>> {
        match self {
            StoppingPatterns::Disabled => None,
            StoppingPatterns::DefaultExtendedPatterns => Some(
                EXTENDED_CODE_STOP_PATTERNS
                    .iter()
                    .map(|p| p.to_string())
                    .collect(),
            ),
            StoppingPatterns::ExplicitPatterns(p) => Some(p.clone()),
        }
    }

    /// Build the criteria passed to the model.
    ///
    /// Returns `None` only when patterns are disabled and the model declares
    /// no extra EOS markers.
    pub fn resolve(&self, input_length: usize, extra_eos_tokens: &[String]) -> Option<StoppingCriteria> {
        let patterns = self.patterns();
        if patterns.is_none() && extra_eos_tokens.is_empty() {
            return None;
        }
        Some(StoppingCriteria {
            input_length,
            patterns: patterns.unwrap_or_default(),
            extra_eos_tokens: extra_eos_tokens.to_vec(),
        })
    }
}

/// Opaque stopping criteria handed to the model unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StoppingCriteria {
    input_length: usize,
    patterns: Vec<String>,
    extra_eos_tokens: Vec<String>,
}

impl StoppingCriteria {
    /// Length of the prompt; matching starts after it.
    pub fn input_length(&self) -> usize {
        self.input_length
    }

    pub fn patterns(&self) -> &[String] {
        &self.patterns
    }

    pub fn extra_eos_tokens(&self) -> &[String] {
        &self.extra_eos_tokens
    }
}
