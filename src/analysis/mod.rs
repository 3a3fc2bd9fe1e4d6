//! Statistical validation of judge scores against ground truth.
//!
//! Every function here is pure over `&ExperimentResults`. Only successful
//! trials feed any statistic. A (case, strategy) cell with no successes is
//! left out of every aggregate, and each aggregate reports how many cells it
//! actually used next to how many it could have used. An aggregate with no
//! samples is `None`, never zero.

pub mod accuracy;
pub mod categories;
pub mod consistency;
pub mod failures;
pub mod outcomes;
pub mod report;

use serde::{Deserialize, Serialize};

pub use accuracy::{analyze_accuracy, DimensionAccuracy, StrategyAccuracy};
pub use categories::{analyze_categories, CategoryAccuracy, CategoryStrategyMae};
pub use consistency::{analyze_consistency, DimensionConsistency, StrategyConsistency};
pub use failures::{identify_failures, FailureCase, DISAGREEMENT_THRESHOLD};
pub use outcomes::{analyze_trial_outcomes, TrialOutcomeSummary};
pub use report::{build_report, render_report_markdown, AnalysisReport, KeyFindings};

/// A mean over whatever samples were available.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Aggregate {
    /// `None` when no sample was available.
    pub value: Option<f64>,
    /// Samples that contributed.
    pub included: usize,
    /// Samples that would contribute if every cell had enough successes.
    pub expected: usize,
}

impl Aggregate {
    pub fn from_samples(samples: &[f64], expected: usize) -> Self {
        Self {
            value: mean(samples),
            included: samples.len(),
            expected,
        }
    }

    pub fn excluded(&self) -> usize {
        self.expected.saturating_sub(self.included)
    }
}

/// Arithmetic mean; `None` for an empty slice.
///
/// Summed directly so that means of small integer samples are exact and
/// threshold comparisons do not drift.
pub(crate) fn mean(samples: &[f64]) -> Option<f64> {
    if samples.is_empty() {
        None
    } else {
        Some(samples.iter().sum::<f64>() / samples.len() as f64)
    }
}

/// Mean of the values that are present.
pub(crate) fn mean_of_present(values: impl IntoIterator<Item = Option<f64>>) -> Option<f64> {
    let present: Vec<f64> = values.into_iter().flatten().collect();
    mean(&present)
}
