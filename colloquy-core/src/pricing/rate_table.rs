use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Model name under which a provider-wide fallback rate is registered.
pub const DEFAULT_MODEL_KEY: &str = "default";

/// Per-1000-token pricing of one provider/model pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelRate {
    pub provider: String,
    pub model: String,
    pub prompt_per_1k: f64,
    pub completion_per_1k: f64,
}

impl ModelRate {
    pub fn new(
        provider: impl Into<String>,
        model: impl Into<String>,
        prompt_per_1k: f64,
        completion_per_1k: f64,
    ) -> Self {
        Self {
            provider: provider.into(),
            model: model.into(),
            prompt_per_1k,
            completion_per_1k,
        }
    }

    pub fn calculate_cost(&self, prompt_tokens: u64, completion_tokens: u64) -> f64 {
        let prompt_cost = (prompt_tokens as f64 / 1000.0) * self.prompt_per_1k;
        let completion_cost = (completion_tokens as f64 / 1000.0) * self.completion_per_1k;
        prompt_cost + completion_cost
    }

    pub fn full_name(&self) -> String {
        format!("{}/{}", self.provider, self.model)
    }
}

/// Static cost lookup keyed by (provider, model).
///
/// Lookup order is the exact pair, then `(provider, "default")`. A provider
/// with neither costs nothing.
#[derive(Debug, Clone)]
pub struct RateTable {
    rates: HashMap<(String, String), ModelRate>,
}

impl Default for RateTable {
    fn default() -> Self {
        let rates = [
            ModelRate::new("openai", "gpt-4", 0.03, 0.06),
            ModelRate::new("openai", "gpt-4-turbo", 0.01, 0.03),
            ModelRate::new("openai", "gpt-4o", 0.005, 0.015),
            ModelRate::new("openai", "gpt-4o-mini", 0.00015, 0.0006),
            ModelRate::new("openai", "gpt-3.5-turbo", 0.0005, 0.0015),
            ModelRate::new("openai", DEFAULT_MODEL_KEY, 0.01, 0.03),
            ModelRate::new("anthropic", "claude-3-opus-20240229", 0.015, 0.075),
            ModelRate::new("anthropic", "claude-3-5-sonnet-20241022", 0.003, 0.015),
            ModelRate::new("anthropic", "claude-3-5-haiku-20241022", 0.001, 0.005),
            ModelRate::new("anthropic", "claude-3-haiku-20240307", 0.00025, 0.00125),
            ModelRate::new("anthropic", DEFAULT_MODEL_KEY, 0.003, 0.015),
            ModelRate::new("openrouter", DEFAULT_MODEL_KEY, 0.002, 0.006),
            ModelRate::new("ollama", DEFAULT_MODEL_KEY, 0.0, 0.0),
            ModelRate::new("mock", DEFAULT_MODEL_KEY, 0.0, 0.0),
        ];

        rates.into_iter().fold(Self::empty(), |table, rate| table.with_rate(rate))
    }
}

impl RateTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn empty() -> Self {
        Self {
            rates: HashMap::new(),
        }
    }

    pub fn with_rate(mut self, rate: ModelRate) -> Self {
        self.insert(rate);
        self
    }

    pub fn insert(&mut self, rate: ModelRate) {
        self.rates
            .insert((rate.provider.clone(), rate.model.clone()), rate);
    }

    pub fn lookup(&self, provider: &str, model: &str) -> Option<&ModelRate> {
        self.rates
            .get(&(provider.to_string(), model.to_string()))
            .or_else(|| {
                self.rates
                    .get(&(provider.to_string(), DEFAULT_MODEL_KEY.to_string()))
            })
    }

    pub fn calculate_cost(
        &self,
        provider: &str,
        model: &str,
        prompt_tokens: u64,
        completion_tokens: u64,
    ) -> f64 {
        self.lookup(provider, model)
            .map(|rate| rate.calculate_cost(prompt_tokens, completion_tokens))
            .unwrap_or(0.0)
    }

    pub fn len(&self) -> usize {
        self.rates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rates.is_empty()
    }
}
