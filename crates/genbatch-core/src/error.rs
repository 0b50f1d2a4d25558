//! Error types for the generation scheduler.
//!
//! Only fatal conditions live here. An out-of-memory signal at a batch size
//! above one is recovered inside the executor and never surfaces as a
//! [`GenError`]; degradations are reported as [`Advisory`](crate::Advisory)
//! values instead.

use std::path::PathBuf;

use thiserror::Error;

/// Result type for scheduler operations.
pub type GenResult<T> = Result<T, GenError>;

/// Errors that can occur while shaping, executing or splitting a request.
#[derive(Debug, Error)]
pub enum GenError {
    /// A generation config could not be resolved or settings are invalid.
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    /// A sampling hyperparameter name was not recognized.
    #[error("Unknown sampling parameter '{name}' (expected one of: top_k, top_p, temperature)")]
    UnknownSamplingParameter { name: String },

    /// Even a batch size of one exhausted device memory.
    #[error("Even a batch size of {batch_size} causes an out-of-memory error; cannot generate with the current config")]
    UnrecoverableOom { batch_size: usize },

    /// The model failed for a reason other than memory exhaustion.
    #[error("Generation failed: {message}")]
    Execution { message: String },

    /// A calibration table exists but could not be parsed.
    #[error("Invalid footprint table at {path}: {message}")]
    FootprintTable { path: PathBuf, message: String },

    /// The request itself is malformed.
    #[error("Invalid request: {message}")]
    InvalidRequest { message: String },

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl GenError {
    /// Create a configuration error from any displayable value.
    pub fn configuration<E: std::fmt::Display>(e: E) -> Self {
        Self::Configuration {
            message: e.to_string(),
        }
    }

    /// Create an execution error from any displayable value.
    pub fn execution<E: std::fmt::Display>(e: E) -> Self {
        Self::Execution {
            message: e.to_string(),
        }
    }

    /// Create an invalid-request error.
    pub fn invalid_request<E: std::fmt::Display>(e: E) -> Self {
        Self::InvalidRequest {
            message: e.to_string(),
        }
    }

    /// Whether this error came from exhausting device memory.
    pub fn is_out_of_memory(&self) -> bool {
        matches!(self, Self::UnrecoverableOom { .. })
    }
}

impl From<config::ConfigError> for GenError {
    fn from(e: config::ConfigError) -> Self {
        Self::configuration(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages_carry_context() {
        let err = GenError::UnrecoverableOom { batch_size: 1 };
        assert!(err.to_string().contains("batch size of 1"));
        assert!(err.is_out_of_memory());

        let err = GenError::UnknownSamplingParameter {
            name: "top_kk".into(),
        };
        assert!(err.to_string().contains("top_kk"));
        assert!(!err.is_out_of_memory());
        println!("[PASS] error messages include the offending value");
    }

    #[test]
    fn test_constructor_helpers() {
        let err = GenError::execution("device lost");
        assert!(matches!(err, GenError::Execution { ref message } if message == "device lost"));

        let err = GenError::configuration("missing eos");
        assert_eq!(err.to_string(), "Configuration error: missing eos");
    }
}
