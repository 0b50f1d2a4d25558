//! Non-fatal advisories.
//!
//! Degraded-but-successful conditions are returned to the caller alongside
//! the result and logged at `warn` level. They are never errors.

use serde::Serialize;

/// A parameter adjustment made while serving a request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Advisory {
    /// An OOM forced a smaller batch.
    BatchSizeReduced { from: usize, to: usize },
    /// Greedy decoding with several sequences requested; collapsed to one.
    SamplingCollapsed { requested: usize },
}

impl Advisory {
    /// Log the advisory at `warn` level.
    pub(crate) fn emit(&self) {
        tracing::warn!("{}", self);
    }
}

impl std::fmt::Display for Advisory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Advisory::BatchSizeReduced { from, to } => write!(
                f,
                "Reducing batch size from {} to {} due to memory overflow (OOM)",
                from, to
            ),
            Advisory::SamplingCollapsed { requested } => write!(
                f,
                "Greedy decoding requested with num_return_sequences={}; all sequences would be \
                 identical, generating 1 instead",
                requested
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_and_serialization() {
        let advisory = Advisory::BatchSizeReduced { from: 10, to: 8 };
        assert!(advisory.to_string().contains("from 10 to 8"));
        let json = serde_json::to_value(&advisory).unwrap();
        assert_eq!(json["kind"], "batch_size_reduced");
        assert_eq!(json["to"], 8);

        let collapsed = Advisory::SamplingCollapsed { requested: 4 };
        assert!(collapsed.to_string().contains("num_return_sequences=4"));
    }
}
