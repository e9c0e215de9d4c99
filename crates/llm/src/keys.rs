use std::collections::HashMap;
use std::fmt;

use crate::catalog::ModelCatalog;

/// Provider API keys, read once at startup and keyed by `keyRef`.
#[derive(Clone, Default)]
pub struct ApiKeys {
    keys: HashMap<String, String>,
}

impl ApiKeys {
    pub fn new(keys: impl IntoIterator<Item = (String, String)>) -> Self {
        Self {
            keys: keys.into_iter().collect(),
        }
    }

    /// Environment variable holding the key for `key_ref`:
    /// `openai-prod` -> `OPENAI_PROD`.
    pub fn env_var_name(key_ref: &str) -> String {
        key_ref.to_ascii_uppercase().replace('-', "_")
    }

    /// Look up every `keyRef` used by the catalog through `lookup`
    /// (normally `std::env::var`). Unset keys are simply absent.
    pub fn collect(models: &ModelCatalog, lookup: impl Fn(&str) -> Option<String>) -> Self {
        let keys = models
            .iter()
            .filter_map(|m| m.key_ref.as_deref())
            .filter_map(|key_ref| {
                lookup(&Self::env_var_name(key_ref))
                    .filter(|v| !v.is_empty())
                    .map(|v| (key_ref.to_string(), v))
            })
            .collect();
        Self { keys }
    }

    pub fn get(&self, key_ref: &str) -> Option<&str> {
        self.keys.get(key_ref).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

impl fmt::Debug for ApiKeys {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<&String> = self.keys.keys().collect();
        names.sort();
        f.debug_struct("ApiKeys").field("key_refs", &names).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::test_support::model;

    #[test]
    fn env_names_are_upper_snake_case() {
        assert_eq!(ApiKeys::env_var_name("openai-prod"), "OPENAI_PROD");
        assert_eq!(ApiKeys::env_var_name("Anthropic_Key"), "ANTHROPIC_KEY");
    }

    #[test]
    fn collects_only_present_keys_and_hides_values() {
        let mut other = model("openai");
        other.name = "other".to_string();
        other.key_ref = Some("missing-key".to_string());
        let catalog = ModelCatalog::new([model("openai"), other]).unwrap();

        let keys = ApiKeys::collect(&catalog, |name| (name == "TEST_KEY").then(|| "sk-secret".to_string()));

        assert_eq!(keys.get("test-key"), Some("sk-secret"));
        assert_eq!(keys.get("missing-key"), None);
        assert!(!format!("{keys:?}").contains("sk-secret"));
    }
}
