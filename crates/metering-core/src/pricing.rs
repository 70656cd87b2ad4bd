//! Static model pricing and cost estimation.

use crate::money::UsdMicros;
use crate::types::ModelId;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::warn;

/// Per-model USD rates per 1000 tokens, input and output priced separately.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ModelPrice {
    /// Cost per 1K input tokens.
    pub input_per_1k: UsdMicros,
    /// Cost per 1K output tokens.
    pub output_per_1k: UsdMicros,
}

impl ModelPrice {
    /// Create a price from floating-point USD-per-1K rates.
    #[must_use]
    pub fn per_1k_usd(input: f64, output: f64) -> Self {
        Self {
            input_per_1k: UsdMicros::from_usd(input),
            output_per_1k: UsdMicros::from_usd(output),
        }
    }
}

/// The static price table, loaded once at startup.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PriceTable {
    prices: HashMap<ModelId, ModelPrice>,
}

impl PriceTable {
    /// Build a table from explicit entries.
    #[must_use]
    pub fn new(prices: HashMap<ModelId, ModelPrice>) -> Self {
        Self { prices }
    }

    /// The stock price table shipped with the service.
    #[must_use]
    pub fn standard() -> Self {
        let mut prices = HashMap::new();
        prices.insert(ModelId::from("nova-mini"), ModelPrice::per_1k_usd(0.002, 0.004));
        prices.insert(
            ModelId::from("nova-standard"),
            ModelPrice::per_1k_usd(0.010, 0.030),
        );
        prices.insert(ModelId::from("nova-max"), ModelPrice::per_1k_usd(0.030, 0.060));
        Self { prices }
    }

    /// Look up the price for a model.
    #[must_use]
    pub fn get(&self, model: &ModelId) -> Option<ModelPrice> {
        self.prices.get(model).copied()
    }

    /// Number of priced models.
    #[must_use]
    pub fn len(&self) -> usize {
        self.prices.len()
    }

    /// Whether the table has no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.prices.is_empty()
    }
}

/// Cost estimation against the static price table.
#[derive(Debug, Clone)]
pub struct CostEstimator {
    table: PriceTable,
}

impl CostEstimator {
    /// Create an estimator over a price table.
    #[must_use]
    pub fn new(table: PriceTable) -> Self {
        Self { table }
    }

    /// USD cost for a request against the given model.
    ///
    /// An unregistered model prices at zero with a warning; by the time this
    /// runs the request is already committed, so estimation must not fail.
    #[must_use]
    pub fn estimate(&self, model: &ModelId, input_tokens: u32, output_tokens: u32) -> UsdMicros {
        let Some(price) = self.table.get(model) else {
            warn!(model = %model, "No price registered for model, estimating cost as 0");
            return UsdMicros::ZERO;
        };

        let input = per_token_cost(price.input_per_1k, input_tokens);
        let output = per_token_cost(price.output_per_1k, output_tokens);
        input.saturating_add(output)
    }
}

/// `tokens / 1000 * rate`, computed in integer micro-dollars with
/// round-half-up at the final division.
fn per_token_cost(rate_per_1k: UsdMicros, tokens: u32) -> UsdMicros {
    let micros = (i128::from(tokens) * i128::from(rate_per_1k.as_micros()) + 500) / 1000;
    UsdMicros::from_micros(micros as i64)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn estimator() -> CostEstimator {
        CostEstimator::new(PriceTable::standard())
    }

    #[test]
    fn test_estimate_known_model() {
        // nova-standard: 0.010 in / 0.030 out per 1K.
        let cost = estimator().estimate(&ModelId::from("nova-standard"), 1000, 500);
        assert_eq!(cost, UsdMicros::from_usd(0.010 + 0.015));
    }

    #[test]
    fn test_estimate_unknown_model_is_zero() {
        let cost = estimator().estimate(&ModelId::from("mystery-model"), 10_000, 10_000);
        assert_eq!(cost, UsdMicros::ZERO);
    }

    #[test]
    fn test_estimate_zero_tokens() {
        let cost = estimator().estimate(&ModelId::from("nova-mini"), 0, 0);
        assert_eq!(cost, UsdMicros::ZERO);
    }

    #[test]
    fn test_estimate_monotonic_in_tokens() {
        let est = estimator();
        let model = ModelId::from("nova-max");
        let mut prev = UsdMicros::ZERO;
        for tokens in [0u32, 1, 10, 999, 1000, 1001, 50_000] {
            let cost = est.estimate(&model, tokens, 0);
            assert!(cost >= prev, "input cost decreased at {tokens} tokens");
            prev = cost;
        }
        let mut prev = UsdMicros::ZERO;
        for tokens in [0u32, 1, 10, 999, 1000, 1001, 50_000] {
            let cost = est.estimate(&model, 0, tokens);
            assert!(cost >= prev, "output cost decreased at {tokens} tokens");
            prev = cost;
        }
    }

    #[test]
    fn test_fractional_token_rounding() {
        // 1 input token at 0.002/1K = 2 micro-dollars exactly.
        let cost = estimator().estimate(&ModelId::from("nova-mini"), 1, 0);
        assert_eq!(cost.as_micros(), 2);
        // 1 token at 0.0015/1K = 1.5 micro-dollars, rounds up to 2.
        let table = PriceTable::new(
            [(ModelId::from("m"), ModelPrice::per_1k_usd(0.0015, 0.0))]
                .into_iter()
                .collect(),
        );
        let cost = CostEstimator::new(table).estimate(&ModelId::from("m"), 1, 0);
        assert_eq!(cost.as_micros(), 2);
    }
}
