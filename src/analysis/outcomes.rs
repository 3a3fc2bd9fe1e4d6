//! Trial outcome counts per strategy.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::experiment::{ExperimentResults, TrialOutcome};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrialOutcomeSummary {
    pub strategy: String,
    pub planned: usize,
    pub recorded: usize,
    pub succeeded: usize,
    pub parse_failures: usize,
    pub request_failures: usize,
    /// succeeded / recorded.
    pub success_rate: Option<f64>,
    /// Failure code -> count, parse and request failures together.
    pub failure_codes: BTreeMap<String, usize>,
}

pub fn analyze_trial_outcomes(results: &ExperimentResults) -> Vec<TrialOutcomeSummary> {
    let planned = results.evaluations.len() * results.metadata.num_trials as usize;

    results
        .strategies()
        .iter()
        .map(|strategy| {
            let mut summary = TrialOutcomeSummary {
                strategy: strategy.clone(),
                planned,
                recorded: 0,
                succeeded: 0,
                parse_failures: 0,
                request_failures: 0,
                success_rate: None,
                failure_codes: BTreeMap::new(),
            };

            for trial in results.evaluations.iter().flat_map(|e| e.trials(strategy)) {
                summary.recorded += 1;
                match &trial.outcome {
                    TrialOutcome::Scored { .. } => summary.succeeded += 1,
                    TrialOutcome::ParseFailure { reason_code, .. } => {
                        summary.parse_failures += 1;
                        *summary.failure_codes.entry(reason_code.clone()).or_default() += 1;
                    }
                    TrialOutcome::RequestFailure { error_code, .. } => {
                        summary.request_failures += 1;
                        *summary.failure_codes.entry(error_code.clone()).or_default() += 1;
                    }
                }
            }

            if summary.recorded > 0 {
                summary.success_rate = Some(summary.succeeded as f64 / summary.recorded as f64);
            }
            summary
        })
        .collect()
}
