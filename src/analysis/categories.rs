//! Accuracy broken down by test-case category.

use serde::{Deserialize, Serialize};

use crate::experiment::ExperimentResults;
use crate::scoring::Dimension;

use super::accuracy::compare_cell;
use super::Aggregate;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryStrategyMae {
    pub strategy: String,
    /// MAE over every included (case, dimension) entry of the category.
    pub mae: Aggregate,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryAccuracy {
    pub category: String,
    pub num_cases: usize,
    pub strategies: Vec<CategoryStrategyMae>,
    /// Pooled MAE over all strategies.
    pub overall: Aggregate,
}

/// Categories in first-seen order, each with per-strategy MAE.
pub fn analyze_categories(results: &ExperimentResults) -> Vec<CategoryAccuracy> {
    let mut categories: Vec<&str> = Vec::new();
    for evaluation in &results.evaluations {
        let category = evaluation.case.category.as_str();
        if !categories.contains(&category) {
            categories.push(category);
        }
    }

    categories
        .into_iter()
        .map(|category| {
            let members: Vec<_> = results
                .evaluations
                .iter()
                .filter(|e| e.case.category == category)
                .collect();
            let expected = members.len() * Dimension::ALL.len();

            let mut pooled = Vec::new();
            let strategies = results
                .strategies()
                .iter()
                .map(|strategy| {
                    let errors: Vec<f64> = members
                        .iter()
                        .flat_map(|e| {
                            Dimension::ALL
                                .iter()
                                .filter_map(move |&d| compare_cell(e, strategy, d))
                        })
                        .map(|c| c.difference.abs())
                        .collect();
                    pooled.extend_from_slice(&errors);
                    CategoryStrategyMae {
                        strategy: strategy.clone(),
                        mae: Aggregate::from_samples(&errors, expected),
                    }
                })
                .collect();

            CategoryAccuracy {
                category: category.to_string(),
                num_cases: members.len(),
                strategies,
                overall: Aggregate::from_samples(&pooled, expected * results.strategies().len()),
            }
        })
        .collect()
}
