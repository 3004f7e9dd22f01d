//! Token pricing for the chat models and a running cost total.

use serde::Deserialize;

use crate::error::PipelineError;

/// USD per 1K tokens.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ModelPricing {
    pub prompt_per_1k: f64,
    pub completion_per_1k: f64,
}

const PRICE_TABLE: &[(&str, ModelPricing)] = &[
    (
        "gpt-3.5-turbo",
        ModelPricing {
            prompt_per_1k: 0.0015,
            completion_per_1k: 0.002,
        },
    ),
    (
        "gpt-4",
        ModelPricing {
            prompt_per_1k: 0.03,
            completion_per_1k: 0.06,
        },
    ),
];

/// Look up the price of a model; unknown models are an error.
pub fn pricing_for(model: &str) -> Result<ModelPricing, PipelineError> {
    PRICE_TABLE
        .iter()
        .find(|(name, _)| *name == model)
        .map(|(_, pricing)| *pricing)
        .ok_or_else(|| PipelineError::UnknownPricing {
            model: model.to_string(),
        })
}

/// Token usage reported by a completion.
#[derive(Debug, Clone, Copy, Default, PartialEq, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
}

/// Accumulates spend across a run.
#[derive(Debug, Clone)]
pub struct CostTracker {
    pricing: ModelPricing,
    total: f64,
}

impl CostTracker {
    /// Fails up front when the model has no price entry.
    pub fn for_model(model: &str) -> Result<Self, PipelineError> {
        Ok(Self {
            pricing: pricing_for(model)?,
            total: 0.0,
        })
    }

    /// Add one completion's cost and return it.
    pub fn add(&mut self, usage: Usage) -> f64 {
        let cost = usage.prompt_tokens as f64 * self.pricing.prompt_per_1k / 1000.0
            + usage.completion_tokens as f64 * self.pricing.completion_per_1k / 1000.0;
        self.total += cost;
        cost
    }

    /// Total spent so far.
    pub fn total(&self) -> f64 {
        self.total
    }
}
