//! Empirical batch footprint model.
//!
//! With a key-value cache, per-sequence memory grows linearly with sequence
//! length once the cache is allocated, so an ordinary least-squares line
//! over calibration points predicts it well.

use serde::Serialize;

/// Least-squares line `memory = intercept + slope * length`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct LinearFit {
    pub intercept: f64,
    pub slope: f64,
    /// Coefficient of determination, 0 when memory does not vary.
    pub r_squared: f64,
}

impl LinearFit {
    /// Predicted memory (GiB) for one sequence of `length` tokens.
    #[inline]
    pub fn predict(&self, length: f64) -> f64 {
        self.intercept + self.slope * length
    }
}

/// Calibration observations for one model and precision category.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchFootprintModel {
    /// `(sequence_length, memory_gb)`, sorted by length.
    observations: Vec<(u64, f64)>,
    only_scale_with_input_size: bool,
}

impl BatchFootprintModel {
    /// Build a model; observations are sorted by sequence length.
    pub fn new(mut observations: Vec<(u64, f64)>, only_scale_with_input_size: bool) -> Self {
        observations.sort_by_key(|(len, _)| *len);
        Self {
            observations,
            only_scale_with_input_size,
        }
    }

    pub fn observations(&self) -> &[(u64, f64)] {
        &self.observations
    }

    /// Whether memory depends on the prompt length only.
    ///
    /// True when later forward passes are negligible next to building the
    /// cache the first time.
    pub fn only_scale_with_input_size(&self) -> bool {
        self.only_scale_with_input_size
    }

    /// Length at which to evaluate the fit for a request.
    pub fn scaling_length(&self, sequence_length: usize, max_new_tokens: usize) -> usize {
        if self.only_scale_with_input_size {
            sequence_length
        } else {
            sequence_length + max_new_tokens
        }
    }

    /// Ordinary least-squares fit.
    ///
    /// Returns `None` with fewer than two distinct sequence lengths.
    pub fn fit(&self) -> Option<LinearFit> {
        let n = self.observations.len() as f64;
        if self.observations.len() < 2 {
            return None;
        }

        let mean_x = self.observations.iter().map(|(x, _)| *x as f64).sum::<f64>() / n;
        let mean_y = self.observations.iter().map(|(_, y)| *y).sum::<f64>() / n;

        let (mut sxx, mut sxy, mut syy) = (0.0, 0.0, 0.0);
        for (x, y) in &self.observations {
            let dx = *x as f64 - mean_x;
            let dy = *y - mean_y;
            sxx += dx * dx;
            sxy += dx * dy;
            syy += dy * dy;
        }

        if sxx == 0.0 {
            return None;
        }

        let slope = sxy / sxx;
        let intercept = mean_y - slope * mean_x;
        let r_squared = if syy == 0.0 {
            0.0
        } else {
            (sxy * sxy) / (sxx * syy)
        };

        Some(LinearFit {
            intercept,
            slope,
            r_squared,
        })
    }
}
