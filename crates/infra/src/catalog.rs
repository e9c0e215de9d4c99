//! Startup catalog: models, prompts and API clients, read from one JSON file.
//!
//! ```json
//! {
//!   "models":  [{ "name": "gpt-4o", "provider": "openai", "deployment": "gpt-4o", "keyRef": "openai", "maxTokens": 4096 }],
//!   "prompts": [{ "id": "summarize", "name": "Summary", "text": "Summarize as JSON." }],
//!   "clients": [{ "clientId": "...", "name": "reports", "apiKeyHash": "$argon2id$..." }]
//! }
//! ```

use std::path::Path;

use serde::Deserialize;
use serde_json::json;

use promptq_auth::{Client, ClientDirectory};
use promptq_llm::{Model, ModelCatalog, Prompt, PromptCatalog, ProviderError};

#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("cannot read catalog {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("catalog is not valid JSON: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid model in catalog: {0}")]
    Model(#[from] ProviderError),
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CatalogFile {
    #[serde(default)]
    models: Vec<Model>,
    #[serde(default)]
    prompts: Vec<Prompt>,
    #[serde(default)]
    clients: Vec<Client>,
}

/// Everything the process reads once and never mutates.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    pub models: ModelCatalog,
    pub prompts: PromptCatalog,
    pub clients: ClientDirectory,
}

impl Catalog {
    pub fn from_json(raw: &str) -> Result<Self, CatalogError> {
        let file: CatalogFile = serde_json::from_str(raw)?;
        Self::from_file(file)
    }

    pub fn load(path: &Path) -> Result<Self, CatalogError> {
        let raw = std::fs::read_to_string(path).map_err(|source| CatalogError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json(&raw)
    }

    /// Offline catalog used when no file is configured: one `test` model and
    /// one prompt, no clients.
    pub fn builtin() -> Result<Self, CatalogError> {
        let file: CatalogFile = serde_json::from_value(json!({
            "models": [{
                "name": "test-model",
                "provider": "test",
                "deployment": "test",
                "maxTokens": 1024
            }],
            "prompts": [{
                "id": "default",
                "name": "Default",
                "text": "Answer with a JSON object."
            }]
        }))?;
        Self::from_file(file)
    }

    fn from_file(file: CatalogFile) -> Result<Self, CatalogError> {
        Ok(Self {
            models: ModelCatalog::new(file.models)?,
            prompts: PromptCatalog::new(file.prompts),
            clients: ClientDirectory::new(file.clients),
        })
    }
}
