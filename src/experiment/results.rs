//! Trial records and the persisted experiment document.
//!
//! `ResultsBuilder` is the only mutable accumulator during a run. `finish`
//! consumes it and produces an immutable `ExperimentResults` with totals
//! computed and every cell's trials ordered by trial index.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::dataset::{DatasetError, RawTestCase, TestCase};
use crate::gateway::nanodollars_to_usd;
use crate::scoring::{Dimension, DimensionScores};

#[derive(Debug, thiserror::Error)]
pub enum ResultsError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid results json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("results integrity failure for '{case_id}': {reason}")]
    Integrity { case_id: String, reason: String },
}

impl ResultsError {
    fn integrity(case_id: &str, reason: impl Into<String>) -> Self {
        Self::Integrity {
            case_id: case_id.to_string(),
            reason: reason.into(),
        }
    }
}

// =============================================================================
// Trials
// =============================================================================

/// What came back from one judge request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TrialOutcome {
    Scored {
        scores: DimensionScores,
        raw_response: String,
    },
    ParseFailure {
        raw_response: String,
        reason: String,
        reason_code: String,
    },
    RequestFailure {
        error: String,
        error_code: String,
    },
}

/// One recorded trial of a (case, strategy) cell.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrialResult {
    /// 1-based trial index within the cell.
    pub trial: u32,
    #[serde(flatten)]
    pub outcome: TrialOutcome,
    pub input_tokens: u32,
    pub output_tokens: u32,
    pub cost_nanodollars: i64,
    pub latency_ms: u64,
}

impl TrialResult {
    pub fn is_success(&self) -> bool {
        matches!(self.outcome, TrialOutcome::Scored { .. })
    }

    pub fn scores(&self) -> Option<&DimensionScores> {
        match &self.outcome {
            TrialOutcome::Scored { scores, .. } => Some(scores),
            _ => None,
        }
    }

    pub fn raw_response(&self) -> Option<&str> {
        match &self.outcome {
            TrialOutcome::Scored { raw_response, .. }
            | TrialOutcome::ParseFailure { raw_response, .. } => Some(raw_response),
            TrialOutcome::RequestFailure { .. } => None,
        }
    }

    /// Stable status label matching the serialized tag.
    pub fn status(&self) -> &'static str {
        match self.outcome {
            TrialOutcome::Scored { .. } => "scored",
            TrialOutcome::ParseFailure { .. } => "parse_failure",
            TrialOutcome::RequestFailure { .. } => "request_failure",
        }
    }
}

// =============================================================================
// Document
// =============================================================================

/// Fixed parameters of a run, known before the first trial.
#[derive(Debug, Clone)]
pub struct RunSettings {
    pub run_id: Uuid,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub num_trials: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExperimentMetadata {
    pub run_id: Uuid,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub strategies: Vec<String>,
    pub num_trials: u32,
    pub num_test_cases: usize,
    pub trials_planned: usize,
    pub trials_recorded: usize,
    pub trials_succeeded: usize,
    pub total_input_tokens: u64,
    pub total_output_tokens: u64,
    pub total_tokens: u64,
    pub total_cost_nanodollars: i64,
    pub estimated_cost_usd: f64,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// True when the run stopped before every planned trial was dispatched.
    pub cancelled: bool,
}

/// A test case with every strategy's trials.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CaseEvaluation {
    #[serde(flatten)]
    pub case: TestCase,
    /// Strategy id -> trials ordered by trial index.
    pub results: BTreeMap<String, Vec<TrialResult>>,
}

impl CaseEvaluation {
    pub fn trials(&self, strategy: &str) -> &[TrialResult] {
        self.results.get(strategy).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Scores from successful trials only.
    pub fn successful_scores(&self, strategy: &str, dimension: Dimension) -> Vec<f64> {
        self.trials(strategy)
            .iter()
            .filter_map(TrialResult::scores)
            .map(|s| f64::from(s.get(dimension)))
            .collect()
    }

    pub fn ground_truth(&self) -> &DimensionScores {
        &self.case.ground_truth
    }
}

#[derive(Debug, Deserialize)]
struct RawCaseEvaluation {
    #[serde(flatten)]
    case: RawTestCase,
    #[serde(default)]
    results: BTreeMap<String, Vec<TrialResult>>,
}

#[derive(Debug, Deserialize)]
struct RawExperimentResults {
    metadata: ExperimentMetadata,
    evaluations: Vec<RawCaseEvaluation>,
}

/// The persisted document of one experiment run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExperimentResults {
    pub metadata: ExperimentMetadata,
    pub evaluations: Vec<CaseEvaluation>,
}

impl ExperimentResults {
    pub fn strategies(&self) -> &[String] {
        &self.metadata.strategies
    }

    /// Default file name, e.g. `experiment_results_20240315_142501.json`.
    pub fn default_file_name(&self) -> String {
        format!(
            "experiment_results_{}.json",
            self.metadata.started_at.format("%Y%m%d_%H%M%S")
        )
    }

    pub fn to_json_pretty(&self) -> Result<String, ResultsError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ResultsError> {
        let json = self.to_json_pretty()?;
        std::fs::write(path, json)?;
        Ok(())
    }

    pub fn from_json(json: &str) -> Result<Self, ResultsError> {
        let raw: RawExperimentResults = serde_json::from_str(json)?;
        Self::try_from(raw)
    }

    /// Newest `experiment_results_*.json` in `dir` by modification time,
    /// ties broken by file name. `None` when the directory holds none.
    pub fn latest_in(dir: impl AsRef<Path>) -> Result<Option<PathBuf>, ResultsError> {
        let mut latest: Option<(std::time::SystemTime, PathBuf)> = None;
        for entry in std::fs::read_dir(dir)? {
            let entry = entry?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if !(name.starts_with("experiment_results_") && name.ends_with(".json")) {
                continue;
            }
            let modified = entry.metadata()?.modified()?;
            let candidate = (modified, entry.path());
            if latest.as_ref().map_or(true, |best| candidate > *best) {
                latest = Some(candidate);
            }
        }
        Ok(latest.map(|(_, path)| path))
    }

    /// Read a saved document, re-validating ground truth and trial indices.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ResultsError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json(&content)
    }
}

impl TryFrom<RawExperimentResults> for ExperimentResults {
    type Error = ResultsError;

    fn try_from(raw: RawExperimentResults) -> Result<Self, Self::Error> {
        let strategies: BTreeSet<&str> =
            raw.metadata.strategies.iter().map(String::as_str).collect();
        let mut seen_ids = BTreeSet::new();
        let mut evaluations = Vec::with_capacity(raw.evaluations.len());

        for entry in raw.evaluations {
            let case = TestCase::try_from(entry.case).map_err(|e| match e {
                DatasetError::DataIntegrity { case_id, reason } => {
                    ResultsError::Integrity { case_id, reason }
                }
                other => ResultsError::integrity("<unknown>", other.to_string()),
            })?;

            if !seen_ids.insert(case.id.clone()) {
                return Err(ResultsError::integrity(&case.id, "duplicate case id"));
            }

            for (strategy, trials) in &entry.results {
                if !strategies.contains(strategy.as_str()) {
                    return Err(ResultsError::integrity(
                        &case.id,
                        format!("strategy '{strategy}' not listed in metadata"),
                    ));
                }
                check_trial_indices(&case.id, strategy, trials, raw.metadata.num_trials)?;
            }

            evaluations.push(CaseEvaluation {
                case,
                results: entry.results,
            });
        }

        Ok(Self {
            metadata: raw.metadata,
            evaluations,
        })
    }
}

fn check_trial_indices(
    case_id: &str,
    strategy: &str,
    trials: &[TrialResult],
    num_trials: u32,
) -> Result<(), ResultsError> {
    let mut seen = BTreeSet::new();
    for trial in trials {
        if trial.trial == 0 || trial.trial > num_trials {
            return Err(ResultsError::integrity(
                case_id,
                format!("{strategy}: trial index {} outside 1..={num_trials}", trial.trial),
            ));
        }
        if !seen.insert(trial.trial) {
            return Err(ResultsError::integrity(
                case_id,
                format!("{strategy}: duplicate trial index {}", trial.trial),
            ));
        }
    }
    Ok(())
}

// =============================================================================
// Builder
// =============================================================================

/// Accumulates trials for one run.
#[derive(Debug)]
pub struct ResultsBuilder {
    settings: RunSettings,
    strategies: Vec<String>,
    evaluations: Vec<CaseEvaluation>,
    index: HashMap<String, usize>,
    started_at: DateTime<Utc>,
}

impl ResultsBuilder {
    pub fn new(settings: RunSettings, cases: &[TestCase], strategies: &[String]) -> Self {
        let evaluations: Vec<CaseEvaluation> = cases
            .iter()
            .map(|case| CaseEvaluation {
                case: case.clone(),
                results: strategies.iter().map(|s| (s.clone(), Vec::new())).collect(),
            })
            .collect();
        let index = cases
            .iter()
            .enumerate()
            .map(|(i, c)| (c.id.clone(), i))
            .collect();

        Self {
            settings,
            strategies: strategies.to_vec(),
            evaluations,
            index,
            started_at: Utc::now(),
        }
    }

    /// Append one trial to its cell.
    pub fn record(
        &mut self,
        case_id: &str,
        strategy: &str,
        trial: TrialResult,
    ) -> Result<(), ResultsError> {
        let idx = *self
            .index
            .get(case_id)
            .ok_or_else(|| ResultsError::integrity(case_id, "unknown case id"))?;
        let cell = self.evaluations[idx]
            .results
            .get_mut(strategy)
            .ok_or_else(|| ResultsError::integrity(case_id, format!("unknown strategy '{strategy}'")))?;

        if trial.trial == 0 || trial.trial > self.settings.num_trials {
            return Err(ResultsError::integrity(
                case_id,
                format!("trial index {} outside 1..={}", trial.trial, self.settings.num_trials),
            ));
        }
        if cell.iter().any(|t| t.trial == trial.trial) {
            return Err(ResultsError::integrity(
                case_id,
                format!("{strategy}: trial {} recorded twice", trial.trial),
            ));
        }

        cell.push(trial);
        Ok(())
    }

    pub fn trials_recorded(&self) -> usize {
        self.evaluations
            .iter()
            .flat_map(|e| e.results.values())
            .map(Vec::len)
            .sum()
    }

    /// Seal the run. Trials are sorted and totals computed here.
    pub fn finish(mut self, cancelled: bool) -> ExperimentResults {
        let mut trials_recorded = 0usize;
        let mut trials_succeeded = 0usize;
        let mut total_input_tokens = 0u64;
        let mut total_output_tokens = 0u64;
        let mut total_cost_nanodollars = 0i64;

        for evaluation in &mut self.evaluations {
            for trials in evaluation.results.values_mut() {
                trials.sort_by_key(|t| t.trial);
                for t in trials.iter() {
                    trials_recorded += 1;
                    if t.is_success() {
                        trials_succeeded += 1;
                    }
                    total_input_tokens += u64::from(t.input_tokens);
                    total_output_tokens += u64::from(t.output_tokens);
                    total_cost_nanodollars += t.cost_nanodollars;
                }
            }
        }

        let trials_planned =
            self.evaluations.len() * self.strategies.len() * self.settings.num_trials as usize;

        let metadata = ExperimentMetadata {
            run_id: self.settings.run_id,
            model: self.settings.model,
            temperature: self.settings.temperature,
            max_tokens: self.settings.max_tokens,
            strategies: self.strategies,
            num_trials: self.settings.num_trials,
            num_test_cases: self.evaluations.len(),
            trials_planned,
            trials_recorded,
            trials_succeeded,
            total_input_tokens,
            total_output_tokens,
            total_tokens: total_input_tokens + total_output_tokens,
            total_cost_nanodollars,
            estimated_cost_usd: nanodollars_to_usd(total_cost_nanodollars),
            started_at: self.started_at,
            finished_at: Utc::now(),
            cancelled,
        };

        ExperimentResults {
            metadata,
            evaluations: self.evaluations,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::Dataset;

    fn settings(num_trials: u32) -> RunSettings {
        RunSettings {
            run_id: Uuid::new_v4(),
            model: "anthropic/claude-3-haiku".to_string(),
            temperature: 0.3,
            max_tokens: 1024,
            num_trials,
        }
    }

    fn scored(trial: u32, score: u8) -> TrialResult {
        TrialResult {
            trial,
            outcome: TrialOutcome::Scored {
                scores: DimensionScores::uniform(score).unwrap(),
                raw_response: "{}".to_string(),
            },
            input_tokens: 100,
            output_tokens: 20,
            cost_nanodollars: 50_000,
            latency_ms: 5,
        }
    }

    fn request_failure(trial: u32) -> TrialResult {
        TrialResult {
            trial,
            outcome: TrialOutcome::RequestFailure {
                error: "timeout after 120s".to_string(),
                error_code: "timeout".to_string(),
            },
            input_tokens: 0,
            output_tokens: 0,
            cost_nanodollars: 0,
            latency_ms: 0,
        }
    }

    fn two_cases() -> Vec<TestCase> {
        Dataset::builtin().unwrap().into_cases().into_iter().take(2).collect()
    }

    #[test]
    fn finish_sorts_trials_and_totals() {
        let cases = two_cases();
        let strategies = vec!["zero_shot".to_string()];
        let mut builder = ResultsBuilder::new(settings(3), &cases, &strategies);

        builder.record(&cases[0].id, "zero_shot", scored(3, 4)).unwrap();
        builder.record(&cases[0].id, "zero_shot", scored(1, 5)).unwrap();
        builder.record(&cases[0].id, "zero_shot", request_failure(2)).unwrap();

        let results = builder.finish(false);
        let trials = results.evaluations[0].trials("zero_shot");
        assert_eq!(trials.iter().map(|t| t.trial).collect::<Vec<_>>(), vec![1, 2, 3]);

        let m = &results.metadata;
        assert_eq!(m.trials_planned, 6);
        assert_eq!(m.trials_recorded, 3);
        assert_eq!(m.trials_succeeded, 2);
        assert_eq!(m.total_tokens, 240);
        assert_eq!(m.total_cost_nanodollars, 100_000);
        assert!(!m.cancelled);
    }

    #[test]
    fn record_rejects_duplicates_and_unknown_cells() {
        let cases = two_cases();
        let strategies = vec!["few_shot".to_string()];
        let mut builder = ResultsBuilder::new(settings(2), &cases, &strategies);

        builder.record(&cases[1].id, "few_shot", scored(1, 3)).unwrap();
        assert!(builder.record(&cases[1].id, "few_shot", scored(1, 3)).is_err());
        assert!(builder.record(&cases[1].id, "few_shot", scored(3, 3)).is_err());
        assert!(builder.record("nope", "few_shot", scored(2, 3)).is_err());
        assert!(builder.record(&cases[1].id, "zero_shot", scored(2, 3)).is_err());
        assert_eq!(builder.trials_recorded(), 1);
    }

    #[test]
    fn serialized_trial_is_tagged_by_status() {
        let value = serde_json::to_value(request_failure(2)).unwrap();
        assert_eq!(value["status"], "request_failure");
        assert_eq!(value["error_code"], "timeout");
        assert_eq!(value["trial"], 2);
        assert_eq!(value["input_tokens"], 0);

        let back: TrialResult = serde_json::from_value(value).unwrap();
        assert_eq!(back, request_failure(2));
    }

    #[test]
    fn load_rejects_corrupted_ground_truth() {
        let cases = two_cases();
        let strategies = vec!["zero_shot".to_string()];
        let results = ResultsBuilder::new(settings(1), &cases, &strategies).finish(false);

        let mut value = serde_json::to_value(&results).unwrap();
        value["evaluations"][0]["ground_truth"]["safety"] = serde_json::json!(9);
        let err = ExperimentResults::from_json(&value.to_string()).unwrap_err();
        assert!(matches!(err, ResultsError::Integrity { .. }), "{err}");
    }

    #[test]
    fn default_file_name_uses_start_timestamp() {
        let cases = two_cases();
        let results = ResultsBuilder::new(settings(1), &cases, &["zero_shot".to_string()])
            .finish(true);
        let name = results.default_file_name();
        assert!(name.starts_with("experiment_results_"));
        assert!(name.ends_with(".json"));
        assert_eq!(name.len(), "experiment_results_20240101_000000.json".len());
    }
}
