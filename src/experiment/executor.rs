//! Trial execution: case x strategy x trial through the judge.
//!
//! Each trial renders one prompt, makes one judge request and parses the
//! reply. A failure of any kind is recorded as that trial's outcome and the
//! run continues. Trial indices are fixed before dispatch, so the finished
//! document does not depend on completion order.

use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::sync::Arc;
use std::time::Instant;

use futures::stream::{self, StreamExt};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::dataset::TestCase;
use crate::gateway::{Attribution, ChatGateway, ChatModel, ChatRequest};
use crate::prompts::{PromptError, PromptRenderer, StrategyPrompts};
use crate::scoring::parse_judge_response;

use super::results::{
    ExperimentResults, ResultsBuilder, ResultsError, RunSettings, TrialOutcome, TrialResult,
};
use super::trace::{now_epoch_ms, TraceSink, TrialTrace};

const CALLER: &str = "experiment::trial";

#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Judge model id, e.g. "anthropic/claude-3-haiku".
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub trials_per_cell: u32,
    /// Maximum judge requests in flight.
    pub concurrency: usize,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            model: "anthropic/claude-3-haiku".to_string(),
            temperature: 0.3,
            max_tokens: 1024,
            trials_per_cell: 3,
            concurrency: 1,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ExecutorError {
    #[error(transparent)]
    Prompt(#[from] PromptError),
    #[error(transparent)]
    Results(#[from] ResultsError),
    #[error("invalid executor config: {0}")]
    InvalidConfig(String),
}

pub struct TrialExecutor {
    gateway: Arc<dyn ChatGateway>,
    prompts: Arc<dyn PromptRenderer>,
    trace: Option<Arc<dyn TraceSink>>,
    config: ExecutorConfig,
    run_id: Uuid,
}

struct TrialTask<'a> {
    case: &'a TestCase,
    strategy: &'a str,
    trial: u32,
}

impl TrialExecutor {
    pub fn new(gateway: Arc<dyn ChatGateway>, config: ExecutorConfig) -> Self {
        Self {
            gateway,
            prompts: Arc::new(StrategyPrompts),
            trace: None,
            config,
            run_id: Uuid::new_v4(),
        }
    }

    pub fn with_prompts(mut self, prompts: Arc<dyn PromptRenderer>) -> Self {
        self.prompts = prompts;
        self
    }

    pub fn with_trace(mut self, trace: Arc<dyn TraceSink>) -> Self {
        self.trace = Some(trace);
        self
    }

    pub fn with_run_id(mut self, run_id: Uuid) -> Self {
        self.run_id = run_id;
        self
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    /// One judge request for one (case, strategy) pair.
    ///
    /// Only an unrenderable prompt is an error; judge and parser failures are
    /// captured in the returned outcome.
    pub async fn run_trial(
        &self,
        case: &TestCase,
        strategy: &str,
        trial: u32,
    ) -> Result<TrialResult, PromptError> {
        self.execute_trial(case, strategy, trial)
            .await
            .map(|(result, _)| result)
    }

    /// All trials of one cell, sequentially, ordered by trial index.
    pub async fn run_cell(
        &self,
        case: &TestCase,
        strategy: &str,
    ) -> Result<Vec<TrialResult>, PromptError> {
        let mut trials = Vec::with_capacity(self.config.trials_per_cell as usize);
        for trial in 1..=self.config.trials_per_cell {
            trials.push(self.run_trial(case, strategy, trial).await?);
        }
        Ok(trials)
    }

    /// Run the full Cartesian product and seal the results.
    ///
    /// Unknown strategies and invalid settings are rejected before the first
    /// judge call. When `cancel_flag` is set, undispatched trials are skipped
    /// and the partial document is returned with `cancelled = true`.
    pub async fn run_experiment(
        &self,
        cases: &[TestCase],
        strategies: &[String],
        cancel_flag: Option<&AtomicBool>,
    ) -> Result<ExperimentResults, ExecutorError> {
        self.validate(strategies)?;

        let settings = RunSettings {
            run_id: self.run_id,
            model: self.config.model.clone(),
            temperature: self.config.temperature,
            max_tokens: self.config.max_tokens,
            num_trials: self.config.trials_per_cell,
        };
        let mut builder = ResultsBuilder::new(settings, cases, strategies);

        let mut tasks = Vec::new();
        for case in cases {
            for strategy in strategies {
                for trial in 1..=self.config.trials_per_cell {
                    tasks.push(TrialTask {
                        case,
                        strategy,
                        trial,
                    });
                }
            }
        }
        let planned = tasks.len();

        info!(
            run_id = %self.run_id,
            model = %self.config.model,
            cases = cases.len(),
            strategies = strategies.len(),
            trials = planned,
            concurrency = self.config.concurrency,
            "starting experiment"
        );

        let mut completed = stream::iter(tasks.into_iter().map(|task| async move {
            if let Some(flag) = cancel_flag {
                if flag.load(AtomicOrdering::Relaxed) {
                    return None;
                }
            }
            let outcome = self.execute_trial(task.case, task.strategy, task.trial).await;
            Some((task, outcome))
        }))
        .buffer_unordered(self.config.concurrency);

        // The trace is a side channel: the first write error disables it.
        let mut trace = self.trace.as_deref();
        let mut skipped = 0usize;
        let mut untraced = 0usize;
        while let Some(item) = completed.next().await {
            let Some((task, outcome)) = item else {
                skipped += 1;
                continue;
            };
            let (result, prompt_hash) = outcome?;

            match trace {
                Some(sink) => {
                    if let Err(err) = sink.record(self.trace_event(&task, &result, prompt_hash)) {
                        warn!(error = %err, "trace write failed; tracing disabled for this run");
                        trace = None;
                        untraced += 1;
                    }
                }
                None if self.trace.is_some() => untraced += 1,
                None => {}
            }
            builder.record(&task.case.id, task.strategy, result)?;

            let recorded = builder.trials_recorded();
            if recorded % 25 == 0 {
                info!(recorded, planned, "experiment progress");
            }
        }

        if untraced > 0 {
            warn!(untraced, "trials missing from the trace");
        }
        let cancelled = skipped > 0;
        if cancelled {
            warn!(skipped, planned, "experiment cancelled; results are partial");
        }

        let results = builder.finish(cancelled);
        info!(
            run_id = %results.metadata.run_id,
            recorded = results.metadata.trials_recorded,
            succeeded = results.metadata.trials_succeeded,
            total_tokens = results.metadata.total_tokens,
            cost_usd = results.metadata.estimated_cost_usd,
            "experiment finished"
        );
        Ok(results)
    }

    fn validate(&self, strategies: &[String]) -> Result<(), ExecutorError> {
        if self.config.trials_per_cell == 0 {
            return Err(ExecutorError::InvalidConfig(
                "trials_per_cell must be at least 1".to_string(),
            ));
        }
        if self.config.concurrency == 0 {
            return Err(ExecutorError::InvalidConfig(
                "concurrency must be at least 1".to_string(),
            ));
        }
        if strategies.is_empty() {
            return Err(ExecutorError::InvalidConfig(
                "at least one strategy is required".to_string(),
            ));
        }

        let known = self.prompts.strategies();
        for (i, strategy) in strategies.iter().enumerate() {
            if !known.contains(strategy) {
                return Err(PromptError::UnknownStrategy {
                    strategy: strategy.clone(),
                    available: known.join(", "),
                }
                .into());
            }
            if strategies[..i].contains(strategy) {
                return Err(ExecutorError::InvalidConfig(format!(
                    "strategy '{strategy}' listed twice"
                )));
            }
        }
        Ok(())
    }

    async fn execute_trial(
        &self,
        case: &TestCase,
        strategy: &str,
        trial: u32,
    ) -> Result<(TrialResult, String), PromptError> {
        let prompt = self.prompts.render(strategy, &case.query, &case.response)?;
        let prompt_hash = prompt.content_hash();

        let req = ChatRequest::new(
            ChatModel::openrouter(&self.config.model),
            prompt.to_messages(),
            Attribution::new(CALLER).with_job(self.run_id),
        )
        .temperature(self.config.temperature)
        .max_tokens(self.config.max_tokens);

        let start = Instant::now();
        let result = match self.gateway.chat(req).await {
            Ok(resp) => {
                let outcome = match parse_judge_response(&resp.content) {
                    Ok(scores) => TrialOutcome::Scored {
                        scores,
                        raw_response: resp.content,
                    },
                    Err(e) => {
                        debug!(
                            case_id = %case.id,
                            strategy,
                            trial,
                            reason = e.code(),
                            "judge reply did not parse"
                        );
                        TrialOutcome::ParseFailure {
                            raw_response: resp.content,
                            reason: e.to_string(),
                            reason_code: e.code().to_string(),
                        }
                    }
                };
                TrialResult {
                    trial,
                    outcome,
                    input_tokens: resp.input_tokens,
                    output_tokens: resp.output_tokens,
                    cost_nanodollars: resp.cost_nanodollars,
                    latency_ms: start.elapsed().as_millis() as u64,
                }
            }
            Err(err) => {
                warn!(
                    case_id = %case.id,
                    strategy,
                    trial,
                    error = %err,
                    "judge request failed"
                );
                TrialResult {
                    trial,
                    outcome: TrialOutcome::RequestFailure {
                        error: err.to_string(),
                        error_code: err.code().to_string(),
                    },
                    input_tokens: 0,
                    output_tokens: 0,
                    cost_nanodollars: 0,
                    latency_ms: start.elapsed().as_millis() as u64,
                }
            }
        };

        Ok((result, prompt_hash))
    }

    fn trace_event(&self, task: &TrialTask<'_>, result: &TrialResult, prompt_hash: String) -> TrialTrace {
        let reason_code = match &result.outcome {
            TrialOutcome::Scored { .. } => None,
            TrialOutcome::ParseFailure { reason_code, .. } => Some(reason_code.clone()),
            TrialOutcome::RequestFailure { error_code, .. } => Some(error_code.clone()),
        };
        TrialTrace {
            timestamp_ms: now_epoch_ms(),
            run_id: self.run_id,
            case_id: task.case.id.clone(),
            strategy: task.strategy.to_string(),
            trial: task.trial,
            model: self.config.model.clone(),
            prompt_hash,
            status: result.status(),
            reason_code,
            input_tokens: result.input_tokens,
            output_tokens: result.output_tokens,
            cost_nanodollars: result.cost_nanodollars,
            latency_ms: result.latency_ms,
            raw_response: result.raw_response().map(str::to_string),
        }
    }
}
