//! Per-model pricing table.
//!
//! Prices are in USD per 1 million units (tokens). Each model has an input
//! and output price. Overrides can be added at runtime from TOML config.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

/// Model used to price calls whose model is not in the table.
pub const FALLBACK_MODEL: &str = "gpt-4o-mini";

/// Per-million-unit pricing for a model.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ModelPricing {
    /// Price per 1M input units in USD.
    pub input_per_m: f64,
    /// Price per 1M output units in USD.
    pub output_per_m: f64,
}

impl ModelPricing {
    /// Create a new pricing entry.
    pub fn new(input_per_m: f64, output_per_m: f64) -> Self {
        Self {
            input_per_m,
            output_per_m,
        }
    }

    /// Compute cost for the given unit counts.
    pub fn cost(&self, input_units: u64, output_units: u64) -> f64 {
        (input_units as f64 / 1_000_000.0) * self.input_per_m
            + (output_units as f64 / 1_000_000.0) * self.output_per_m
    }
}

/// Thread-safe pricing table with built-in defaults and custom overrides.
pub struct PricingTable {
    prices: RwLock<HashMap<String, ModelPricing>>,
    fallback: String,
}

impl PricingTable {
    /// Create a pricing table with built-in model prices.
    pub fn with_defaults() -> Self {
        let mut prices = HashMap::new();

        // ── OpenAI ─────────────────────────────────────────────────
        prices.insert("gpt-4o-mini".into(), ModelPricing::new(0.15, 0.6));
        prices.insert("gpt-4o".into(), ModelPricing::new(2.5, 10.0));
        prices.insert("gpt-4-turbo".into(), ModelPricing::new(10.0, 30.0));
        prices.insert("gpt-3.5-turbo".into(), ModelPricing::new(0.5, 1.5));
        prices.insert("o3-mini".into(), ModelPricing::new(1.1, 4.4));

        // ── Anthropic ──────────────────────────────────────────────
        prices.insert("anthropic/claude-sonnet-4".into(), ModelPricing::new(3.0, 15.0));
        prices.insert("anthropic/claude-3.5-haiku".into(), ModelPricing::new(0.8, 4.0));

        // ── Google ─────────────────────────────────────────────────
        prices.insert("google/gemini-2.0-flash".into(), ModelPricing::new(0.1, 0.4));

        // ── Mistral / DeepSeek ─────────────────────────────────────
        prices.insert("mistral/mistral-small".into(), ModelPricing::new(0.2, 0.6));
        prices.insert("deepseek/deepseek-v3".into(), ModelPricing::new(0.27, 1.1));

        Self {
            prices: RwLock::new(prices),
            fallback: FALLBACK_MODEL.into(),
        }
    }

    /// Create an empty pricing table.
    pub fn empty() -> Self {
        Self {
            prices: RwLock::new(HashMap::new()),
            fallback: FALLBACK_MODEL.into(),
        }
    }

    /// Price unknown models like `model` instead of the built-in fallback.
    pub fn with_fallback(mut self, model: impl Into<String>) -> Self {
        self.fallback = model.into();
        self
    }

    /// Look up pricing for a model. Returns None if not found.
    pub fn get(&self, model: &str) -> Option<ModelPricing> {
        self.prices
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(model)
            .copied()
    }

    /// Add or update pricing for a model.
    pub fn set(&self, model: impl Into<String>, pricing: ModelPricing) {
        self.prices
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(model.into(), pricing);
    }

    /// Resolve the pricing that applies to `model`.
    ///
    /// Tries exact match first, then common provider prefixes
    /// (`gpt-4o` → `openai/gpt-4o`), then the longest key whose bare name
    /// prefixes the model (`gpt-4o-mini-2024-07-18` → `gpt-4o-mini`), and
    /// finally the fallback model.
    pub fn resolve(&self, model: &str) -> Option<ModelPricing> {
        let prices = self.prices.read().unwrap_or_else(PoisonError::into_inner);

        if let Some(p) = prices.get(model) {
            return Some(*p);
        }

        let prefixed_names = [
            format!("openai/{model}"),
            format!("anthropic/{model}"),
            format!("google/{model}"),
            format!("mistral/{model}"),
            format!("deepseek/{model}"),
        ];
        if let Some(p) = prefixed_names.iter().find_map(|name| prices.get(name.as_str())) {
            return Some(*p);
        }

        let model_lower = model.to_lowercase();
        let bare_model = model_lower.rsplit('/').next().unwrap_or(&model_lower);
        let best = prices
            .iter()
            .filter(|(key, _)| {
                let bare_key = key.rsplit('/').next().unwrap_or(key);
                bare_model.starts_with(&bare_key.to_lowercase())
            })
            .max_by_key(|(key, _)| key.rsplit('/').next().unwrap_or(key).len());
        if let Some((_, p)) = best {
            return Some(*p);
        }

        prices.get(self.fallback.as_str()).copied()
    }

    /// Compute cost for a model call; 0.0 when nothing (not even the
    /// fallback) is priced.
    pub fn compute_cost(&self, model: &str, input_units: u64, output_units: u64) -> f64 {
        self.resolve(model)
            .map(|p| p.cost(input_units, output_units))
            .unwrap_or(0.0)
    }

    /// List all known model names.
    pub fn models(&self) -> Vec<String> {
        let prices = self.prices.read().unwrap_or_else(PoisonError::into_inner);
        let mut names: Vec<String> = prices.keys().cloned().collect();
        names.sort();
        names
    }

    /// Number of models in the pricing table.
    pub fn len(&self) -> usize {
        self.prices.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Whether the table is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for PricingTable {
    fn default() -> Self {
        Self::with_defaults()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn one_million_input_units_cost_list_price() {
        let table = PricingTable::with_defaults();
        assert_eq!(table.compute_cost("gpt-4o-mini", 1_000_000, 0), 0.15);
    }

    #[test]
    fn known_model_cost() {
        let table = PricingTable::with_defaults();
        // (1000 * 3.0 + 500 * 15.0) / 1M = 0.0105
        let cost = table.compute_cost("anthropic/claude-sonnet-4", 1000, 500);
        assert!((cost - 0.0105).abs() < 1e-10);
    }

    #[test]
    fn provider_prefix_and_version_suffix_match() {
        let table = PricingTable::with_defaults();
        let bare = table.compute_cost("claude-sonnet-4", 1_000_000, 0);
        assert!((bare - 3.0).abs() < 1e-10);

        // the longer key wins over "gpt-4o"
        let dated = table.compute_cost("gpt-4o-mini-2024-07-18", 1_000_000, 0);
        assert!((dated - 0.15).abs() < 1e-10);
    }

    #[test]
    fn unknown_model_uses_fallback_pricing() {
        let table = PricingTable::with_defaults();
        let unknown = table.compute_cost("acme/model-xyz", 1000, 500);
        let fallback = table.compute_cost(FALLBACK_MODEL, 1000, 500);
        assert!(unknown > 0.0);
        assert!((unknown - fallback).abs() < 1e-12);
    }

    #[test]
    fn empty_table_costs_nothing() {
        let table = PricingTable::empty();
        assert!(table.is_empty());
        assert_eq!(table.compute_cost("gpt-4o", 1000, 1000), 0.0);
    }

    #[test]
    fn custom_pricing_and_override() {
        let table = PricingTable::empty().with_fallback("custom/model");
        table.set("custom/model", ModelPricing::new(1.0, 2.0));
        assert_eq!(table.len(), 1);

        let cost = table.compute_cost("custom/model", 1_000_000, 1_000_000);
        assert!((cost - 3.0).abs() < 1e-10);

        table.set("custom/model", ModelPricing::new(5.0, 20.0));
        let cost = table.compute_cost("custom/model", 1_000_000, 0);
        assert!((cost - 5.0).abs() < 1e-10);

        // unknown names now price like custom/model
        let other = table.compute_cost("something-else", 1_000_000, 0);
        assert!((other - 5.0).abs() < 1e-10);
    }

    #[test]
    fn list_models_sorted() {
        let models = PricingTable::with_defaults().models();
        assert!(models.contains(&"gpt-4o".to_string()));
        assert!(models.windows(2).all(|w| w[0] <= w[1]));
    }
}
