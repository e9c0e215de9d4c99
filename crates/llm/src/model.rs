use serde::{Deserialize, Serialize};

use crate::error::ProviderError;

/// Upper bound for any model's temperature range.
pub const MAX_MODEL_TEMPERATURE: f64 = 2.0;

/// Price per `tokens` tokens, in `currency`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelCost {
    pub tokens: f64,
    pub currency: String,
    pub input: f64,
    pub output: f64,
}

/// Estimated cost of one call.
#[derive(Debug, Clone, PartialEq)]
pub struct CostEstimate {
    pub input_cost: f64,
    pub output_cost: f64,
    pub total_cost: f64,
    pub currency: String,
}

/// A configured model, as loaded from the catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Model {
    pub name: String,
    /// Adapter name in the [`crate::ProviderRegistry`].
    pub provider: String,
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub deployment: Option<String>,
    #[serde(default)]
    pub api_version: Option<String>,
    /// Name of the API key; see [`crate::ApiKeys`].
    #[serde(default)]
    pub key_ref: Option<String>,
    #[serde(alias = "maxToken")]
    pub max_tokens: u32,
    #[serde(default)]
    pub min_temperature: f64,
    #[serde(default = "default_max_temperature")]
    pub max_temperature: f64,
    #[serde(default)]
    pub cost: Option<ModelCost>,
}

fn default_max_temperature() -> f64 {
    1.0
}

impl Model {
    /// Catalog-level sanity checks; adapter-specific fields are checked by
    /// the adapter's `validate_config`.
    pub fn validate(&self) -> Result<(), ProviderError> {
        if self.name.trim().is_empty() {
            return Err(ProviderError::config("model name must not be empty"));
        }
        if self.max_tokens == 0 {
            return Err(ProviderError::config(format!("model '{}': maxTokens must be > 0", self.name)));
        }
        let ordered = 0.0 <= self.min_temperature
            && self.min_temperature <= self.max_temperature
            && self.max_temperature <= MAX_MODEL_TEMPERATURE;
        if !ordered {
            return Err(ProviderError::config(format!(
                "model '{}': temperature bounds must satisfy 0 <= min <= max <= 2 (got {}..{})",
                self.name, self.min_temperature, self.max_temperature
            )));
        }
        Ok(())
    }

    /// `max(min, min(max, requested))`.
    pub fn clamp_temperature(&self, requested: f64) -> f64 {
        requested.min(self.max_temperature).max(self.min_temperature)
    }

    /// The job's cap when given, never above the model's.
    pub fn effective_max_tokens(&self, requested: Option<u32>) -> u32 {
        requested.map_or(self.max_tokens, |r| r.min(self.max_tokens))
    }

    /// `None` when the model carries no usable cost metadata.
    pub fn estimate_cost(&self, input_tokens: u64, output_tokens: u64) -> Option<CostEstimate> {
        let cost = self.cost.as_ref()?;
        if cost.tokens <= 0.0 || cost.currency.is_empty() {
            return None;
        }
        let input_cost = input_tokens as f64 / cost.tokens * cost.input;
        let output_cost = output_tokens as f64 / cost.tokens * cost.output;
        Some(CostEstimate {
            input_cost,
            output_cost,
            total_cost: input_cost + output_cost,
            currency: cost.currency.clone(),
        })
    }
}

/// Fails with a `Config` error listing every missing field, e.g.
/// `azure-openai requires the following fields: endpoint, apiVersion`.
pub(crate) fn require_fields(adapter: &str, fields: &[(&str, Option<&str>)]) -> Result<(), ProviderError> {
    let missing: Vec<&str> = fields
        .iter()
        .filter(|(_, value)| value.is_none_or(|v| v.trim().is_empty()))
        .map(|(name, _)| *name)
        .collect();
    if missing.is_empty() {
        Ok(())
    } else {
        Err(ProviderError::config(format!(
            "{adapter} requires the following fields: {}",
            missing.join(", ")
        )))
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::model;
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn clamps_into_bounds() {
        let m = model("test");
        assert_eq!(m.clamp_temperature(0.9), 0.9);
        assert_eq!(m.clamp_temperature(5.0), 1.0);
        assert_eq!(m.clamp_temperature(-2.0), 0.0);
    }

    #[test]
    fn max_tokens_never_exceed_the_model() {
        let m = model("test");
        assert_eq!(m.effective_max_tokens(None), 1000);
        assert_eq!(m.effective_max_tokens(Some(200)), 200);
        assert_eq!(m.effective_max_tokens(Some(5000)), 1000);
    }

    #[test]
    fn cost_is_priced_per_token_block() {
        let mut m = model("test");
        assert!(m.estimate_cost(10, 10).is_none());

        m.cost = Some(ModelCost {
            tokens: 1000.0,
            currency: "USD".to_string(),
            input: 2.0,
            output: 4.0,
        });
        let cost = m.estimate_cost(500, 250).unwrap();
        assert_eq!(cost.input_cost, 1.0);
        assert_eq!(cost.output_cost, 1.0);
        assert_eq!(cost.total_cost, 2.0);
        assert_eq!(cost.currency, "USD");
    }

    #[test]
    fn inverted_bounds_are_rejected() {
        let mut m = model("test");
        m.min_temperature = 0.8;
        m.max_temperature = 0.2;
        assert!(matches!(m.validate(), Err(ProviderError::Config(_))));

        m.min_temperature = 0.0;
        m.max_temperature = 2.5;
        assert!(m.validate().is_err());
    }

    #[test]
    fn missing_fields_are_listed() {
        let err = require_fields("azure-openai", &[("endpoint", None), ("deployment", Some("d")), ("apiVersion", Some(" "))])
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "configuration error: azure-openai requires the following fields: endpoint, apiVersion"
        );
    }

    #[test]
    fn catalog_alias_for_max_tokens() {
        let m: Model = serde_json::from_value(serde_json::json!({
            "name": "gpt-4o",
            "provider": "openai",
            "maxToken": 4096
        }))
        .unwrap();
        assert_eq!(m.max_tokens, 4096);
        assert_eq!(m.max_temperature, 1.0);
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 256,
            ..ProptestConfig::default()
        })]

        /// Property: the dispatched temperature always lies inside the
        /// model's bounds, and in-range requests pass through untouched.
        #[test]
        fn clamped_temperature_stays_in_bounds(
            min in 0.0f64..=2.0,
            span in 0.0f64..=2.0,
            requested in -10.0f64..10.0,
        ) {
            let mut m = model("test");
            m.min_temperature = min;
            m.max_temperature = (min + span).min(MAX_MODEL_TEMPERATURE);

            let t = m.clamp_temperature(requested);
            prop_assert!(t >= m.min_temperature && t <= m.max_temperature);
            if requested >= m.min_temperature && requested <= m.max_temperature {
                prop_assert_eq!(t, requested);
            }
        }
    }
}
