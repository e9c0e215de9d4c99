use std::collections::HashMap;
use std::sync::Arc;

use crate::error::ProviderError;
use crate::provider::ProviderAdapter;
use crate::providers::{AnthropicProvider, AzureOpenAiProvider, OpenAiProvider, TestProvider};

/// Provider name -> adapter. Populated once at startup; there is no
/// dynamic discovery.
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    adapters: HashMap<String, Arc<dyn ProviderAdapter>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every compiled adapter, sharing one HTTP client.
    pub fn with_defaults(http: reqwest::Client) -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(OpenAiProvider::new(http.clone())));
        registry.register(Arc::new(AzureOpenAiProvider::new(http.clone())));
        registry.register(Arc::new(AnthropicProvider::new(http)));
        registry.register(Arc::new(TestProvider));
        registry
    }

    /// Replaces any adapter already registered under the same name.
    pub fn register(&mut self, adapter: Arc<dyn ProviderAdapter>) {
        self.adapters.insert(adapter.name().to_string(), adapter);
    }

    pub fn get(&self, name: &str) -> Result<Arc<dyn ProviderAdapter>, ProviderError> {
        self.adapters
            .get(name)
            .cloned()
            .ok_or_else(|| ProviderError::config(format!("no provider adapter registered as '{name}'")))
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.adapters.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl std::fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderRegistry").field("adapters", &self.names()).finish()
    }
}
