//! Experiment configuration.
//!
//! Defaults reproduce the reference experiment. A TOML file may override any
//! field; the CLI then overrides the file.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::experiment::ExecutorConfig;
use crate::gateway::GatewayConfig;
use crate::prompts::PROMPTS;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("io error reading config: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid config toml: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ExperimentConfig {
    /// OpenRouter model id of the judge.
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    /// Trials per (case, strategy) cell.
    pub num_trials: u32,
    pub strategies: Vec<String>,
    /// Judge requests in flight.
    pub concurrency: usize,
    /// Gateway retries on transient failures.
    pub max_retries: u32,
    pub retry_base_delay_ms: u64,
    /// Dataset JSON file; the built-in dataset when absent.
    pub dataset: Option<PathBuf>,
    /// Restrict the run to these case ids.
    pub cases: Vec<String>,
    /// Directory for the results document.
    pub output_dir: PathBuf,
}

impl Default for ExperimentConfig {
    fn default() -> Self {
        Self {
            model: "anthropic/claude-3-haiku".to_string(),
            temperature: 0.3,
            max_tokens: 1024,
            num_trials: 3,
            strategies: PROMPTS.iter().map(|p| p.slug.to_string()).collect(),
            concurrency: 1,
            max_retries: 2,
            retry_base_delay_ms: 1_000,
            dataset: None,
            cases: Vec::new(),
            output_dir: PathBuf::from("."),
        }
    }
}

impl ExperimentConfig {
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.model.trim().is_empty() {
            return Err(ConfigError::Invalid("model must not be empty".into()));
        }
        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(ConfigError::Invalid(format!(
                "temperature {} outside [0, 2]",
                self.temperature
            )));
        }
        if self.max_tokens == 0 {
            return Err(ConfigError::Invalid("max_tokens must be at least 1".into()));
        }
        if self.num_trials == 0 {
            return Err(ConfigError::Invalid("num_trials must be at least 1".into()));
        }
        if self.concurrency == 0 {
            return Err(ConfigError::Invalid("concurrency must be at least 1".into()));
        }
        if self.strategies.is_empty() {
            return Err(ConfigError::Invalid("at least one strategy is required".into()));
        }
        for (i, s) in self.strategies.iter().enumerate() {
            if self.strategies[..i].contains(s) {
                return Err(ConfigError::Invalid(format!("strategy '{s}' listed twice")));
            }
        }
        Ok(())
    }

    pub fn executor_config(&self) -> ExecutorConfig {
        ExecutorConfig {
            model: self.model.clone(),
            temperature: self.temperature,
            max_tokens: self.max_tokens,
            trials_per_cell: self.num_trials,
            concurrency: self.concurrency,
        }
    }

    pub fn gateway_config(&self) -> GatewayConfig {
        GatewayConfig {
            max_retries: self.max_retries,
            retry_base_delay: Duration::from_millis(self.retry_base_delay_ms),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_reference_experiment() {
        let config = ExperimentConfig::default();
        assert_eq!(config.model, "anthropic/claude-3-haiku");
        assert_eq!(config.temperature, 0.3);
        assert_eq!(config.num_trials, 3);
        assert_eq!(config.max_tokens, 1024);
        assert_eq!(
            config.strategies,
            vec!["zero_shot", "few_shot", "chain_of_thought"]
        );
        assert!(config.validate().is_ok());
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let config = ExperimentConfig::from_toml_str(
            r#"
model = "openai/gpt-4o-mini"
num_trials = 5
strategies = ["few_shot"]
"#,
        )
        .unwrap();
        assert_eq!(config.model, "openai/gpt-4o-mini");
        assert_eq!(config.num_trials, 5);
        assert_eq!(config.temperature, 0.3);
        assert_eq!(config.executor_config().trials_per_cell, 5);
    }

    #[test]
    fn invalid_values_are_rejected() {
        assert!(matches!(
            ExperimentConfig::from_toml_str("num_trials = 0"),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            ExperimentConfig::from_toml_str("temperature = 3.5"),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            ExperimentConfig::from_toml_str(r#"strategies = ["few_shot", "few_shot"]"#),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            ExperimentConfig::from_toml_str("judge = \"x\""),
            Err(ConfigError::Toml(_))
        ));
    }
}
