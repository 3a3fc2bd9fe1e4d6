#![forbid(unsafe_code)]

//! # autograder-harness
//!
//! Measures how far an LLM judge can be trusted. The same labeled
//! query/response pairs are scored repeatedly under several prompting
//! strategies; the scores are then compared with each other (consistency)
//! and with human ground truth (accuracy, bias, per-category error, large
//! disagreements).
//!
//! Pipeline: [`dataset`] -> [`experiment::TrialExecutor`] (prompt, judge
//! call, [`scoring::parse_judge_response`]) -> [`experiment::ExperimentResults`]
//! -> [`analysis::build_report`].

pub mod analysis;
pub mod config;
pub mod dataset;
pub mod experiment;
pub mod gateway;
pub mod logging;
pub mod prompts;
pub mod scoring;

pub use analysis::{build_report, render_report_markdown, AnalysisReport, DISAGREEMENT_THRESHOLD};
pub use config::{ConfigError, ExperimentConfig};
pub use dataset::{Dataset, DatasetError, TestCase};
pub use experiment::{
    ExecutorConfig, ExecutorError, ExperimentResults, ResultsBuilder, ResultsError, TrialExecutor,
    TrialOutcome, TrialResult,
};
pub use gateway::{Attribution, ChatGateway, ProviderGateway, UsageSink};
pub use prompts::{PromptError, PromptRenderer, StrategyPrompts, FEW_SHOT_EXAMPLE_COUNT};
pub use scoring::{parse_judge_response, Dimension, DimensionScores, ParseError};
