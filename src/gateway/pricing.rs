//! Model pricing registry.
//!
//! Costs are in nanodollars (1e-9 USD) per token.

use std::collections::HashMap;
use std::sync::OnceLock;

/// Pricing information for a model.
#[derive(Debug, Clone, Copy)]
pub struct ModelPricing {
    /// Provider name.
    pub provider: &'static str,
    /// Cost per input token in nanodollars.
    pub input_nanos_per_token: i64,
    /// Cost per output token in nanodollars.
    pub output_nanos_per_token: i64,
}

impl ModelPricing {
    const fn new(provider: &'static str, input: i64, output: i64) -> Self {
        Self {
            provider,
            input_nanos_per_token: input,
            output_nanos_per_token: output,
        }
    }

    /// Calculate cost for a request.
    pub fn calculate_cost(&self, input_tokens: u32, output_tokens: u32) -> i64 {
        (input_tokens as i64) * self.input_nanos_per_token
            + (output_tokens as i64) * self.output_nanos_per_token
    }
}

// =============================================================================
// PRICING DATA
// =============================================================================

// OpenRouter pricing (verify periodically against OpenRouter model pages)
// Claude 3 Haiku: $0.25/1M input, $1.25/1M output
// Claude 3.5 Haiku: $0.80/1M input, $4.00/1M output
// Claude 3.5 Sonnet: $3.00/1M input, $15.00/1M output
// GPT-4o-mini: $0.15/1M input, $0.60/1M output

const CLAUDE_3_HAIKU: ModelPricing = ModelPricing::new("openrouter", 250, 1_250);
const CLAUDE_35_HAIKU: ModelPricing = ModelPricing::new("openrouter", 800, 4_000);
const CLAUDE_35_SONNET: ModelPricing = ModelPricing::new("openrouter", 3_000, 15_000);
const GPT_4O_MINI: ModelPricing = ModelPricing::new("openrouter", 150, 600);
// GPT-5-mini: $0.25/1M input, $2.00/1M output
const GPT_5_MINI: ModelPricing = ModelPricing::new("openrouter", 250, 2_000);

/// Fallback for unknown models: a mid-range price.
const UNKNOWN_MODEL: ModelPricing = ModelPricing::new("unknown", 1_000, 5_000);

static PRICING_MAP: OnceLock<HashMap<&'static str, ModelPricing>> = OnceLock::new();

fn init_pricing() -> HashMap<&'static str, ModelPricing> {
    let mut map = HashMap::new();

    map.insert("anthropic/claude-3-haiku", CLAUDE_3_HAIKU);
    map.insert("anthropic/claude-3-haiku-20240307", CLAUDE_3_HAIKU);
    map.insert("anthropic/claude-3-5-haiku", CLAUDE_35_HAIKU);
    map.insert("anthropic/claude-3-5-haiku-20241022", CLAUDE_35_HAIKU);
    map.insert("anthropic/claude-3-5-sonnet", CLAUDE_35_SONNET);
    map.insert("anthropic/claude-3-5-sonnet-20241022", CLAUDE_35_SONNET);
    map.insert("openai/gpt-4o-mini", GPT_4O_MINI);
    map.insert("openai/gpt-4o-mini-2024-07-18", GPT_4O_MINI);
    map.insert("openai/gpt-5-mini", GPT_5_MINI);

    map
}

/// Get pricing for a model.
pub fn get_pricing(model_id: &str) -> Option<ModelPricing> {
    let map = PRICING_MAP.get_or_init(init_pricing);
    map.get(model_id).copied()
}

/// Get pricing for a model, falling back to the unknown-model default.
pub fn get_pricing_or_default(model_id: &str) -> ModelPricing {
    get_pricing(model_id).unwrap_or(UNKNOWN_MODEL)
}

/// Calculate chat cost.
pub fn chat_cost(model: &str, input_tokens: u32, output_tokens: u32) -> i64 {
    get_pricing_or_default(model).calculate_cost(input_tokens, output_tokens)
}

/// Nanodollars to USD.
pub fn nanodollars_to_usd(nanos: i64) -> f64 {
    nanos as f64 / 1_000_000_000.0
}
