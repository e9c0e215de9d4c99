//! Read-only model and prompt catalogs.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::ProviderError;
use crate::model::Model;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Prompt {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(alias = "content")]
    pub text: String,
}

#[derive(Debug, Clone, Default)]
pub struct ModelCatalog {
    models: HashMap<String, Model>,
}

impl ModelCatalog {
    /// Validates every model; the last definition of a name wins.
    pub fn new(models: impl IntoIterator<Item = Model>) -> Result<Self, ProviderError> {
        let mut map = HashMap::new();
        for model in models {
            model.validate()?;
            map.insert(model.name.clone(), model);
        }
        Ok(Self { models: map })
    }

    pub fn get(&self, name: &str) -> Option<&Model> {
        self.models.get(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Model> {
        self.models.values()
    }

    pub fn len(&self) -> usize {
        self.models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }
}

#[derive(Debug, Clone, Default)]
pub struct PromptCatalog {
    prompts: HashMap<String, Prompt>,
}

impl PromptCatalog {
    pub fn new(prompts: impl IntoIterator<Item = Prompt>) -> Self {
        Self {
            prompts: prompts.into_iter().map(|p| (p.id.clone(), p)).collect(),
        }
    }

    pub fn get(&self, id: &str) -> Option<&Prompt> {
        self.prompts.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.prompts.contains_key(id)
    }

    /// Prompt texts in the given order.
    pub fn resolve<'a>(&'a self, ids: &[String]) -> Result<Vec<&'a str>, ProviderError> {
        ids.iter()
            .map(|id| {
                self.get(id)
                    .map(|p| p.text.as_str())
                    .ok_or_else(|| ProviderError::config(format!("prompt '{id}' does not exist")))
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.prompts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.prompts.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn prompt(id: &str, text: &str) -> Prompt {
        Prompt {
            id: id.to_string(),
            name: id.to_string(),
            text: text.to_string(),
        }
    }

    #[test]
    fn resolve_keeps_order_and_reports_missing_ids() {
        let catalog = PromptCatalog::new([prompt("a", "first"), prompt("b", "second")]);

        let texts = catalog.resolve(&["b".to_string(), "a".to_string()]).unwrap();
        assert_eq!(texts, ["second", "first"]);

        let err = catalog.resolve(&["a".to_string(), "zzz".to_string()]).unwrap_err();
        assert!(err.to_string().contains("zzz"));
    }

    #[test]
    fn invalid_models_are_refused() {
        let mut model = crate::model::test_support::model("test");
        model.max_tokens = 0;
        assert!(ModelCatalog::new([model]).is_err());
    }
}
