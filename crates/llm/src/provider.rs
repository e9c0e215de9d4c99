//! The contract every provider adapter implements.

use async_trait::async_trait;
use futures::stream::BoxStream;

use promptq_jobs::Usage;

use crate::error::ProviderError;
use crate::model::Model;

/// A provider-agnostic request. Adapters decide how to shape it on the
/// wire (one combined message, or separate system and user parts).
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    pub system_prompt: String,
    pub user_content: String,
    pub temperature: f64,
    pub max_tokens: u32,
}

/// A non-empty completion with its token accounting.
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderResponse {
    pub text: String,
    pub usage: Usage,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    Fragment(String),
    /// Emitted once, after the last fragment.
    Done(Usage),
}

/// Finite and non-restartable.
pub type CompletionStream = BoxStream<'static, Result<StreamEvent, ProviderError>>;

#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    /// Registry key; matches `Model::provider`.
    fn name(&self) -> &str;

    /// Whether a `keyRef` must resolve before calling.
    fn requires_api_key(&self) -> bool {
        true
    }

    /// Fails with `ProviderError::Config` naming the missing or invalid
    /// fields.
    fn validate_config(&self, model: &Model) -> Result<(), ProviderError>;

    /// Must never return an empty completion.
    async fn complete(
        &self,
        model: &Model,
        request: &CompletionRequest,
        api_key: Option<&str>,
    ) -> Result<ProviderResponse, ProviderError>;

    async fn stream(
        &self,
        model: &Model,
        request: &CompletionRequest,
        api_key: Option<&str>,
    ) -> Result<CompletionStream, ProviderError>;
}

/// Shared guard for adapters: reject `None` and blank text.
pub(crate) fn non_empty(text: Option<String>) -> Result<String, ProviderError> {
    match text {
        Some(text) if !text.trim().is_empty() => Ok(text),
        _ => Err(ProviderError::EmptyCompletion),
    }
}

pub(crate) fn require_key<'a>(adapter: &str, api_key: Option<&'a str>) -> Result<&'a str, ProviderError> {
    api_key
        .filter(|k| !k.is_empty())
        .ok_or_else(|| ProviderError::config(format!("{adapter} requires an API key")))
}
