//! Dry-run token and cost estimate for an experiment.
//!
//! Prompts are rendered and counted with the cl100k tokenizer. That is an
//! approximation for non-OpenAI judges, close enough for budgeting.

use serde::Serialize;
use tiktoken_rs::CoreBPE;

use crate::dataset::TestCase;
use crate::gateway::{get_pricing_or_default, nanodollars_to_usd};
use crate::prompts::{PromptError, PromptRenderer};

use super::executor::ExecutorConfig;

/// Chat framing tokens added per message.
const MESSAGE_OVERHEAD_TOKENS: u64 = 4;

/// Typical reply lengths observed for each strategy.
const JSON_REPLY_TOKENS: u32 = 80;
const REASONING_REPLY_TOKENS: u32 = 450;

#[derive(Debug, thiserror::Error)]
pub enum EstimateError {
    #[error(transparent)]
    Prompt(#[from] PromptError),
    #[error("tokenizer unavailable: {0}")]
    Tokenizer(String),
}

#[derive(Debug, Clone, Serialize)]
pub struct StrategyEstimate {
    pub strategy: String,
    pub trials: u64,
    pub input_tokens: u64,
    pub expected_output_tokens: u64,
    pub max_output_tokens: u64,
    pub expected_cost_nanodollars: i64,
    pub max_cost_nanodollars: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct CostEstimate {
    pub model: String,
    pub trials: u64,
    pub input_tokens: u64,
    pub expected_output_tokens: u64,
    pub max_output_tokens: u64,
    pub expected_cost_usd: f64,
    pub max_cost_usd: f64,
    pub strategies: Vec<StrategyEstimate>,
}

fn expected_reply_tokens(strategy: &str, max_tokens: u32) -> u32 {
    let typical = if strategy == "chain_of_thought" {
        REASONING_REPLY_TOKENS
    } else {
        JSON_REPLY_TOKENS
    };
    typical.min(max_tokens)
}

/// Estimate tokens and cost without calling the judge.
pub fn estimate_cost(
    cases: &[TestCase],
    strategies: &[String],
    prompts: &dyn PromptRenderer,
    config: &ExecutorConfig,
) -> Result<CostEstimate, EstimateError> {
    let bpe = tiktoken_rs::cl100k_base().map_err(|e| EstimateError::Tokenizer(e.to_string()))?;
    let pricing = get_pricing_or_default(&config.model);
    let trials_per_cell = u64::from(config.trials_per_cell);

    let mut per_strategy = Vec::with_capacity(strategies.len());
    for strategy in strategies {
        let mut input_tokens = 0u64;
        for case in cases {
            let prompt = prompts.render(strategy, &case.query, &case.response)?;
            input_tokens += prompt_tokens(&bpe, &prompt.system, &prompt.user);
        }
        input_tokens *= trials_per_cell;

        let trials = cases.len() as u64 * trials_per_cell;
        let expected_output_tokens =
            trials * u64::from(expected_reply_tokens(strategy, config.max_tokens));
        let max_output_tokens = trials * u64::from(config.max_tokens);

        let input_cost = input_tokens as i64 * pricing.input_nanos_per_token;
        per_strategy.push(StrategyEstimate {
            strategy: strategy.clone(),
            trials,
            input_tokens,
            expected_output_tokens,
            max_output_tokens,
            expected_cost_nanodollars: input_cost
                + expected_output_tokens as i64 * pricing.output_nanos_per_token,
            max_cost_nanodollars: input_cost
                + max_output_tokens as i64 * pricing.output_nanos_per_token,
        });
    }

    Ok(CostEstimate {
        model: config.model.clone(),
        trials: per_strategy.iter().map(|s| s.trials).sum(),
        input_tokens: per_strategy.iter().map(|s| s.input_tokens).sum(),
        expected_output_tokens: per_strategy.iter().map(|s| s.expected_output_tokens).sum(),
        max_output_tokens: per_strategy.iter().map(|s| s.max_output_tokens).sum(),
        expected_cost_usd: nanodollars_to_usd(
            per_strategy.iter().map(|s| s.expected_cost_nanodollars).sum(),
        ),
        max_cost_usd: nanodollars_to_usd(per_strategy.iter().map(|s| s.max_cost_nanodollars).sum()),
        strategies: per_strategy,
    })
}

fn prompt_tokens(bpe: &CoreBPE, system: &str, user: &str) -> u64 {
    let text_tokens = bpe.encode_with_special_tokens(system).len()
        + bpe.encode_with_special_tokens(user).len();
    text_tokens as u64 + 2 * MESSAGE_OVERHEAD_TOKENS
}
