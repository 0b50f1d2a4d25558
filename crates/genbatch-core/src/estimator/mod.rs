//! Batch size estimation.
//!
//! # Paths
//!
//! | Table | Fit | Path |
//! |-------|-----|------|
//! | present | `r² >= min_r_squared` | calibrated: `floor(available / predicted)` |
//! | present | below threshold or degenerate | heuristic |
//! | absent | - | heuristic: `floor(available / band rate)` |
//!
//! Both paths return at least 1; a batch of zero would make no progress.

mod footprint;
mod table;

pub use footprint::{BatchFootprintModel, LinearFit};
pub use table::FootprintTableStore;

use serde::Serialize;

use crate::config::{HeuristicConfig, SchedulerConfig};
use crate::error::GenResult;

/// Slack absorbed before flooring a ratio, so `20.0 / 4.000000000000001`
/// still yields 5.
const FLOOR_EPSILON: f64 = 1e-9;

/// Which path produced an estimate.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum EstimateSource {
    /// Calibration table fit.
    Calibrated { r_squared: f64 },
    /// Parameter-count band.
    Heuristic { band: usize },
}

/// Estimated batch size plus how it was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Estimate {
    pub batch_size: usize,
    pub per_sequence_gb: f64,
    #[serde(flatten)]
    pub source: EstimateSource,
}

/// Predicts how many sequences fit in one generation call.
#[derive(Debug, Clone)]
pub struct BatchFootprintEstimator {
    table: Option<BatchFootprintModel>,
    parameter_count_b: f64,
    min_r_squared: f64,
    heuristic: HeuristicConfig,
}

impl BatchFootprintEstimator {
    /// Create an estimator for a model.
    ///
    /// # Arguments
    ///
    /// * `table` - Calibration table, `None` if the model was never calibrated
    /// * `parameter_count_b` - Parameter count in billions, for the heuristic
    /// * `config` - Fit threshold and heuristic bands
    ///
    /// Fails if the heuristic bands are malformed.
    pub fn new(
        table: Option<BatchFootprintModel>,
        parameter_count_b: f64,
        config: &SchedulerConfig,
    ) -> GenResult<Self> {
        config.heuristic.validate()?;
        Ok(Self {
            table,
            parameter_count_b,
            min_r_squared: config.min_r_squared,
            heuristic: config.heuristic.clone(),
        })
    }

    pub fn table(&self) -> Option<&BatchFootprintModel> {
        self.table.as_ref()
    }

    /// Suggested batch size, at least 1.
    pub fn estimate(&self, sequence_length: usize, max_new_tokens: usize, available_memory_gb: f64) -> usize {
        self.estimate_detailed(sequence_length, max_new_tokens, available_memory_gb)
            .batch_size
    }

    /// Suggested batch size with the per-sequence cost and source.
    pub fn estimate_detailed(
        &self,
        sequence_length: usize,
        max_new_tokens: usize,
        available_memory_gb: f64,
    ) -> Estimate {
        if let Some(estimate) = self.calibrated(sequence_length, max_new_tokens, available_memory_gb) {
            return estimate;
        }
        self.heuristic_estimate(available_memory_gb)
    }

    fn calibrated(
        &self,
        sequence_length: usize,
        max_new_tokens: usize,
        available_memory_gb: f64,
    ) -> Option<Estimate> {
        let table = self.table.as_ref()?;
        let Some(fit) = table.fit() else {
            tracing::debug!("Footprint table has fewer than two distinct lengths, using heuristic");
            return None;
        };
        if fit.r_squared < self.min_r_squared {
            tracing::debug!(
                "Footprint fit r²={:.4} below {:.2}, using heuristic",
                fit.r_squared,
                self.min_r_squared
            );
            return None;
        }

        let length = table.scaling_length(sequence_length, max_new_tokens);
        let per_sequence_gb = fit.predict(length as f64);
        if per_sequence_gb.is_nan() || per_sequence_gb <= 0.0 {
            tracing::debug!(
                "Footprint fit predicts {:.4} GiB at length {}, using heuristic",
                per_sequence_gb,
                length
            );
            return None;
        }

        let batch_size = floor_batch(available_memory_gb / per_sequence_gb);
        tracing::debug!(
            "Calibrated estimate: {:.3} GiB/seq at length {} (r²={:.4}), batch {}",
            per_sequence_gb,
            length,
            fit.r_squared,
            batch_size
        );
        Some(Estimate {
            batch_size,
            per_sequence_gb,
            source: EstimateSource::Calibrated {
                r_squared: fit.r_squared,
            },
        })
    }

    /// Raw estimate from the parameter count alone.
    pub fn heuristic_estimate(&self, available_memory_gb: f64) -> Estimate {
        let band = self
            .heuristic
            .thresholds_b
            .iter()
            .position(|threshold| self.parameter_count_b < *threshold)
            .unwrap_or(self.heuristic.thresholds_b.len());
        let per_sequence_gb = self.heuristic.gb_per_sequence[band];
        let batch_size = floor_batch(available_memory_gb / per_sequence_gb);
        tracing::debug!(
            "Heuristic estimate: {:.1}B params in band {}, {:.1} GiB/seq, batch {}",
            self.parameter_count_b,
            band,
            per_sequence_gb,
            batch_size
        );
        Estimate {
            batch_size,
            per_sequence_gb,
            source: EstimateSource::Heuristic { band },
        }
    }
}

fn floor_batch(ratio: f64) -> usize {
    if !ratio.is_finite() || ratio < 1.0 {
        return 1;
    }
    ((ratio + FLOOR_EPSILON).floor() as usize).max(1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::GenError;

    fn estimator(table: Option<BatchFootprintModel>, params_b: f64) -> BatchFootprintEstimator {
        BatchFootprintEstimator::new(table, params_b, &SchedulerConfig::default()).unwrap()
    }

    #[test]
    fn test_calibrated_two_point_table() {
        let table = BatchFootprintModel::new(vec![(10, 2.0), (20, 4.0)], false);
        let est = estimator(Some(table), 7.0).estimate_detailed(10, 10, 20.0);
        assert_eq!(est.batch_size, 5);
        assert!((est.per_sequence_gb - 4.0).abs() < 1e-9);
        assert!(matches!(est.source, EstimateSource::Calibrated { .. }));
        println!("[PASS] 20 GiB / 4 GiB per sequence = 5");
    }

    #[test]
    fn test_calibrated_input_only_scaling() {
        let table = BatchFootprintModel::new(vec![(10, 2.0), (20, 4.0)], true);
        // Evaluated at length 10 only: 2 GiB per sequence.
        assert_eq!(estimator(Some(table), 7.0).estimate(10, 10, 20.0), 10);
    }

    #[test]
    fn test_heuristic_without_table() {
        assert_eq!(estimator(None, 7.0).estimate(128, 64, 10.0), 10);
        println!("[PASS] 7B params, 10 GiB -> 10");
    }

    #[test]
    fn test_heuristic_bands() {
        assert_eq!(estimator(None, 1.0).estimate(1, 1, 10.0), 20);
        assert_eq!(estimator(None, 5.0).estimate(1, 1, 10.0), 10);
        assert_eq!(estimator(None, 13.0).estimate(1, 1, 10.0), 5);
        assert_eq!(estimator(None, 20.0).estimate(1, 1, 10.0), 3);
        assert_eq!(estimator(None, 70.0).estimate(1, 1, 10.0), 3);
    }

    #[test]
    fn test_low_quality_fit_falls_back_to_heuristic() {
        let table = BatchFootprintModel::new(vec![(10, 1.0), (20, 5.0), (30, 1.5), (40, 4.0)], false);
        let est = estimator(Some(table), 7.0).estimate_detailed(10, 10, 10.0);
        assert_eq!(est.source, EstimateSource::Heuristic { band: 1 });
        assert_eq!(est.batch_size, 10);
    }

    #[test]
    fn test_non_positive_prediction_falls_back_to_heuristic() {
        // Line crosses zero before length 5.
        let table = BatchFootprintModel::new(vec![(10, 1.0), (20, 3.0)], true);
        let est = estimator(Some(table), 3.0).estimate_detailed(2, 0, 10.0);
        assert_eq!(est.source, EstimateSource::Heuristic { band: 0 });
    }

    #[test]
    fn test_never_below_one() {
        assert_eq!(estimator(None, 70.0).estimate(1, 1, 0.0), 1);
        assert_eq!(estimator(None, 70.0).estimate(1, 1, -12.0), 1);
        let table = BatchFootprintModel::new(vec![(10, 2.0), (20, 4.0)], false);
        assert_eq!(estimator(Some(table), 7.0).estimate(1000, 1000, 1.0), 1);
        println!("[PASS] estimator clamps to 1");
    }

    #[test]
    fn test_custom_threshold_is_honoured() {
        let config = SchedulerConfig {
            min_r_squared: 0.0,
            ..Default::default()
        };
        let table = BatchFootprintModel::new(vec![(10, 1.0), (20, 5.0), (30, 1.5), (40, 4.0)], false);
        let est = BatchFootprintEstimator::new(Some(table), 7.0, &config)
            .unwrap()
            .estimate_detailed(10, 10, 10.0);
        assert!(matches!(est.source, EstimateSource::Calibrated { .. }));
    }

    #[test]
    fn test_malformed_heuristic_bands_are_rejected() {
        let config = SchedulerConfig {
            heuristic: HeuristicConfig {
                thresholds_b: vec![10.0, 20.0],
                gb_per_sequence: vec![0.5],
            },
            ..Default::default()
        };
        let err = BatchFootprintEstimator::new(None, 70.0, &config).unwrap_err();
        assert!(matches!(err, GenError::Configuration { .. }));
        println!("[PASS] short gb_per_sequence rejected at construction");
    }
}
