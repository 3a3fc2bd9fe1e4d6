//! Score consistency: how much a judge's scores move across repeated trials.

use serde::{Deserialize, Serialize};
use statrs::statistics::Statistics;

use crate::experiment::ExperimentResults;
use crate::scoring::Dimension;

use super::{mean_of_present, Aggregate};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DimensionConsistency {
    pub dimension: Dimension,
    /// Mean over cases of the per-cell sample variance.
    pub mean_variance: Aggregate,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategyConsistency {
    pub strategy: String,
    pub dimensions: Vec<DimensionConsistency>,
    /// Mean of the per-dimension mean variances.
    pub overall: Option<f64>,
}

/// Sample variance (n - 1) of a cell's successful scores.
///
/// Cells with fewer than two successes have no variance.
pub fn cell_variance(scores: &[f64]) -> Option<f64> {
    if scores.len() < 2 {
        return None;
    }
    Some(scores.iter().variance())
}

/// Per strategy and dimension, the mean sample variance across cases.
pub fn analyze_consistency(results: &ExperimentResults) -> Vec<StrategyConsistency> {
    let expected = results.evaluations.len();

    results
        .strategies()
        .iter()
        .map(|strategy| {
            let dimensions: Vec<DimensionConsistency> = Dimension::ALL
                .iter()
                .map(|&dimension| {
                    let variances: Vec<f64> = results
                        .evaluations
                        .iter()
                        .filter_map(|e| cell_variance(&e.successful_scores(strategy, dimension)))
                        .collect();
                    DimensionConsistency {
                        dimension,
                        mean_variance: Aggregate::from_samples(&variances, expected),
                    }
                })
                .collect();

            let overall = mean_of_present(dimensions.iter().map(|d| d.mean_variance.value));
            StrategyConsistency {
                strategy: strategy.clone(),
                dimensions,
                overall,
            }
        })
        .collect()
}
