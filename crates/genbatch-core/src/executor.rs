//! OOM-safe generation.
//!
//! A failed call cannot be retried in place: the failed attempt still holds
//! its partial allocations. The executor therefore always releases cached
//! device memory first, then retries with a smaller batch.
//!
//! ```text
//! attempt(b) ── ok ─────────────────────────────► (sequences, b)
//!     │
//!     ├─ OutOfMemory, b == 1 ─────────────────► UnrecoverableOom
//!     ├─ OutOfMemory ─► release ─► b' = max(1, floor(0.8·b)) ─► attempt(b')
//!     └─ Other ───────────────────────────────► Execution (no retry)
//! ```

use rand::RngCore;

use crate::advisory::Advisory;
use crate::device::DeviceBackend;
use crate::error::{GenError, GenResult};
use crate::generation::{GenerationConfig, StoppingCriteria};
use crate::model::{ExecutionFailure, GenerativeModel, TokenId};

/// Result of a successful OOM-safe call.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutedBatch {
    /// Generated sequences, `effective_batch_size` of them.
    pub sequences: Vec<Vec<TokenId>>,
    /// Batch size that succeeded.
    pub effective_batch_size: usize,
    /// Every batch size tried, in order. Strictly decreasing.
    pub attempted_batch_sizes: Vec<usize>,
    pub advisories: Vec<Advisory>,
}

/// Next batch size after an OOM at `batch_size`.
///
/// Always strictly smaller than `batch_size` (for `batch_size > 1`) and at
/// least 1, whatever the factor.
#[inline]
pub fn shrink_batch_size(batch_size: usize, shrink_factor: f64) -> usize {
    ((batch_size as f64 * shrink_factor).floor() as usize)
        .min(batch_size.saturating_sub(1))
        .max(1)
}

/// Runs generation calls, shrinking the batch on memory exhaustion.
pub struct OomSafeExecutor<'a, M: ?Sized, B: ?Sized> {
    model: &'a M,
    backend: &'a B,
    shrink_factor: f64,
}

impl<'a, M, B> OomSafeExecutor<'a, M, B>
where
    M: GenerativeModel + ?Sized,
    B: DeviceBackend + ?Sized,
{
    /// # Arguments
    ///
    /// * `shrink_factor` - Multiplier in (0, 1) applied after each OOM
    pub fn new(model: &'a M, backend: &'a B, shrink_factor: f64) -> Self {
        Self {
            model,
            backend,
            shrink_factor,
        }
    }

    pub fn model(&self) -> &'a M {
        self.model
    }

    /// Generate `batch_size` sequences, shrinking on OOM until success or
    /// until a batch of one fails.
    pub fn run(
        &self,
        input: &[TokenId],
        config: &GenerationConfig,
        stopping: Option<&StoppingCriteria>,
        batch_size: usize,
        rng: &mut dyn RngCore,
    ) -> GenResult<ExecutedBatch> {
        if batch_size == 0 {
            return Err(GenError::invalid_request("batch size must be at least 1"));
        }

        let mut batch_size = batch_size;
        let mut attempted_batch_sizes = Vec::new();
        let mut advisories = Vec::new();

        loop {
            attempted_batch_sizes.push(batch_size);
            tracing::debug!("Generating batch of {} sequences", batch_size);

            match self.model.generate(input, config, stopping, batch_size, rng) {
                Ok(sequences) => {
                    check_count(&sequences, batch_size)?;
                    return Ok(ExecutedBatch {
                        sequences,
                        effective_batch_size: batch_size,
                        attempted_batch_sizes,
                        advisories,
                    });
                }
                Err(ExecutionFailure::OutOfMemory { message }) => {
                    if batch_size == 1 {
                        tracing::error!("OOM at batch size 1: {}", message);
                        return Err(GenError::UnrecoverableOom { batch_size });
                    }
                    self.backend.release_cached();

                    let reduced = shrink_batch_size(batch_size, self.shrink_factor);
                    let advisory = Advisory::BatchSizeReduced {
                        from: batch_size,
                        to: reduced,
                    };
                    advisory.emit();
                    advisories.push(advisory);
                    batch_size = reduced;
                }
                Err(ExecutionFailure::Other { message }) => {
                    return Err(GenError::Execution { message });
                }
            }
        }
    }

    /// Generate exactly `batch_size` sequences in one call, without retry.
    ///
    /// Used for the batches that follow the first one, whose size is
    /// already known to fit.
    pub fn run_exact(
        &self,
        input: &[TokenId],
        config: &GenerationConfig,
        stopping: Option<&StoppingCriteria>,
        batch_size: usize,
        rng: &mut dyn RngCore,
    ) -> GenResult<Vec<Vec<TokenId>>> {
        tracing::debug!("Generating follow-up batch of {} sequences", batch_size);
        match self.model.generate(input, config, stopping, batch_size, rng) {
            Ok(sequences) => {
                check_count(&sequences, batch_size)?;
                Ok(sequences)
            }
            Err(failure @ ExecutionFailure::OutOfMemory { .. }) => Err(GenError::execution(format!(
                "follow-up batch of {} failed after the first batch fit: {}",
                batch_size, failure
            ))),
            Err(ExecutionFailure::Other { message }) => Err(GenError::Execution { message }),
        }
    }
}

fn check_count(sequences: &[Vec<TokenId>], expected: usize) -> GenResult<()> {
    if sequences.len() != expected {
        return Err(GenError::execution(format!(
            "model returned {} sequences, expected {}",
            sequences.len(),
            expected
        )));
    }
    Ok(())
}
