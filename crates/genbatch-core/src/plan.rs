//! Batch partitioning.

use serde::Serialize;

use crate::error::{GenError, GenResult};

/// Ordered batch sizes for one request.
///
/// Sizes sum to the requested total, none exceeds the batch size, and at
/// most one smaller remainder batch exists, in last position.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BatchPlan {
    batches: Vec<usize>,
}

impl BatchPlan {
    /// Split `total` sequences into batches of `batch_size`.
    pub fn partition(total: usize, batch_size: usize) -> GenResult<Self> {
        if total == 0 {
            return Err(GenError::invalid_request("cannot plan zero sequences"));
        }
        if batch_size == 0 {
            return Err(GenError::invalid_request("batch size must be at least 1"));
        }

        let full = total / batch_size;
        let remainder = total % batch_size;
        let mut batches = vec![batch_size; full];
        if remainder != 0 {
            batches.push(remainder);
        }
        debug_assert_eq!(batches.iter().sum::<usize>(), total);

        Ok(Self { batches })
    }

    pub fn batches(&self) -> &[usize] {
        &self.batches
    }

    /// Number of sequences across all batches.
    pub fn total(&self) -> usize {
        self.batches.iter().sum()
    }

    /// Number of batches.
    pub fn len(&self) -> usize {
        self.batches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.batches.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_partition_with_remainder() {
        let plan = BatchPlan::partition(20, 6).unwrap();
        assert_eq!(plan.batches(), &[6, 6, 6, 2]);
        assert_eq!(plan.total(), 20);
        println!("[PASS] 20 at 6 -> [6, 6, 6, 2]");
    }

    #[test]
    fn test_partition_exact_and_single() {
        assert_eq!(BatchPlan::partition(12, 4).unwrap().batches(), &[4, 4, 4]);
        assert_eq!(BatchPlan::partition(3, 3).unwrap().batches(), &[3]);
        assert_eq!(BatchPlan::partition(1, 1).unwrap().batches(), &[1]);
    }

    #[test]
    fn test_partition_rejects_zero() {
        assert!(BatchPlan::partition(0, 4).is_err());
        assert!(BatchPlan::partition(4, 0).is_err());
    }

    proptest! {
        #[test]
        fn prop_plan_sums_and_remainder_is_last(total in 1usize..5000, batch in 1usize..500) {
            let plan = BatchPlan::partition(total, batch).unwrap();
            prop_assert_eq!(plan.total(), total);
            prop_assert!(plan.batches().iter().all(|b| *b >= 1 && *b <= batch));

            let smaller: Vec<usize> = plan
                .batches()
                .iter()
                .enumerate()
                .filter(|(_, b)| **b < batch)
                .map(|(i, _)| i)
                .collect();
            prop_assert!(smaller.len() <= 1);
            if let Some(i) = smaller.first() {
                prop_assert_eq!(*i, plan.len() - 1);
            }
        }
    }
}
