//! Large judge/human disagreements.

use serde::{Deserialize, Serialize};

use crate::experiment::ExperimentResults;
use crate::scoring::Dimension;

use super::accuracy::compare_cell;

/// Minimum |judge mean - truth| that flags a disagreement.
pub const DISAGREEMENT_THRESHOLD: f64 = 2.0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureCase {
    pub case_id: String,
    pub category: String,
    pub strategy: String,
    pub dimension: Dimension,
    pub judge_mean: f64,
    pub ground_truth: u8,
    /// judge_mean - ground_truth.
    pub difference: f64,
    pub successful_trials: usize,
}

/// Every (case, strategy, dimension) with |difference| >= `threshold`.
///
/// Ordered by descending |difference|, then case id, dimension and strategy
/// (in run order).
pub fn identify_failures(results: &ExperimentResults, threshold: f64) -> Vec<FailureCase> {
    let strategies = results.strategies();
    let mut failures = Vec::new();

    for evaluation in &results.evaluations {
        for strategy in strategies {
            for dimension in Dimension::ALL {
                let Some(cell) = compare_cell(evaluation, strategy, dimension) else {
                    continue;
                };
                if cell.difference.abs() < threshold {
                    continue;
                }
                failures.push(FailureCase {
                    case_id: evaluation.case.id.clone(),
                    category: evaluation.case.category.clone(),
                    strategy: strategy.clone(),
                    dimension,
                    judge_mean: cell.judge_mean,
                    ground_truth: cell.ground_truth,
                    difference: cell.difference,
                    successful_trials: cell.successes,
                });
            }
        }
    }

    let strategy_rank = |s: &str| strategies.iter().position(|x| x == s).unwrap_or(usize::MAX);
    failures.sort_by(|a, b| {
        b.difference
            .abs()
            .total_cmp(&a.difference.abs())
            .then_with(|| a.case_id.cmp(&b.case_id))
            .then_with(|| a.dimension.cmp(&b.dimension))
            .then_with(|| strategy_rank(&a.strategy).cmp(&strategy_rank(&b.strategy)))
    });
    failures
}
