//! Accuracy against ground truth: MAE, signed bias and exact agreement.

use serde::{Deserialize, Serialize};

use crate::experiment::{CaseEvaluation, ExperimentResults};
use crate::scoring::Dimension;

use super::{mean, mean_of_present, Aggregate};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DimensionAccuracy {
    pub dimension: Dimension,
    /// Mean over cases of |judge mean - truth|.
    pub mae: Aggregate,
    /// Mean over cases of (judge mean - truth). Positive means the judge
    /// overrates.
    pub bias: Option<f64>,
    /// Share of cases whose rounded judge mean equals the truth.
    pub exact_agreement: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategyAccuracy {
    pub strategy: String,
    pub dimensions: Vec<DimensionAccuracy>,
    pub overall_mae: Option<f64>,
    pub overall_bias: Option<f64>,
    pub overall_exact_agreement: Option<f64>,
}

/// One (case, strategy, dimension) cell compared against the truth.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CellComparison {
    pub judge_mean: f64,
    /// judge_mean - truth.
    pub difference: f64,
    pub ground_truth: u8,
    pub successes: usize,
}

impl CellComparison {
    /// Rounds half away from zero, so 4.5 agrees with 5.
    pub fn agrees(&self) -> bool {
        self.judge_mean.round() == f64::from(self.ground_truth)
    }
}

/// `None` when the cell has no successful trial.
pub fn compare_cell(
    evaluation: &CaseEvaluation,
    strategy: &str,
    dimension: Dimension,
) -> Option<CellComparison> {
    let scores = evaluation.successful_scores(strategy, dimension);
    let judge_mean = mean(&scores)?;
    let truth = evaluation.ground_truth().get(dimension);
    Some(CellComparison {
        judge_mean,
        difference: judge_mean - f64::from(truth),
        ground_truth: truth,
        successes: scores.len(),
    })
}

pub fn analyze_accuracy(results: &ExperimentResults) -> Vec<StrategyAccuracy> {
    let expected = results.evaluations.len();

    results
        .strategies()
        .iter()
        .map(|strategy| {
            let dimensions: Vec<DimensionAccuracy> = Dimension::ALL
                .iter()
                .map(|&dimension| {
                    let cells: Vec<CellComparison> = results
                        .evaluations
                        .iter()
                        .filter_map(|e| compare_cell(e, strategy, dimension))
                        .collect();
                    let diffs: Vec<f64> = cells.iter().map(|c| c.difference).collect();
                    let abs: Vec<f64> = diffs.iter().map(|d| d.abs()).collect();
                    let agreements: Vec<f64> = cells
                        .iter()
                        .map(|c| if c.agrees() { 1.0 } else { 0.0 })
                        .collect();

                    DimensionAccuracy {
                        dimension,
                        mae: Aggregate::from_samples(&abs, expected),
                        bias: mean(&diffs),
                        exact_agreement: mean(&agreements),
                    }
                })
                .collect();

            StrategyAccuracy {
                strategy: strategy.clone(),
                overall_mae: mean_of_present(dimensions.iter().map(|d| d.mae.value)),
                overall_bias: mean_of_present(dimensions.iter().map(|d| d.bias)),
                overall_exact_agreement: mean_of_present(
                    dimensions.iter().map(|d| d.exact_agreement),
                ),
                dimensions,
            }
        })
        .collect()
}
