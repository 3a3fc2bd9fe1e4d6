//! Running experiments and recording their trials.

pub mod estimate;
pub mod executor;
pub mod results;
pub mod trace;

pub use estimate::{estimate_cost, CostEstimate, EstimateError, StrategyEstimate};
pub use executor::{ExecutorConfig, ExecutorError, TrialExecutor};
pub use results::{
    CaseEvaluation, ExperimentMetadata, ExperimentResults, ResultsBuilder, ResultsError,
    RunSettings, TrialOutcome, TrialResult,
};
pub use trace::{JsonlTraceSink, TraceError, TraceSink, TraceWorker, TrialTrace};
