use async_trait::async_trait;

use crate::error::ProviderError;
use crate::model::{require_fields, Model};
use crate::provider::{require_key, CompletionRequest, CompletionStream, ProviderAdapter, ProviderResponse};
use crate::providers::chat_completions::{ChatRequest, ChatResponse, ChatStreamParser};
use crate::providers::{ensure_success, join_url};
use crate::sse::completion_stream;

const NAME: &str = "azure-openai";

/// Azure OpenAI deployments: the deployment is part of the URL, the API
/// version a query parameter, and the key goes in an `api-key` header.
#[derive(Debug, Clone)]
pub struct AzureOpenAiProvider {
    http: reqwest::Client,
}

impl AzureOpenAiProvider {
    pub fn new(http: reqwest::Client) -> Self {
        Self { http }
    }

    fn url(model: &Model) -> String {
        let endpoint = model.endpoint.as_deref().unwrap_or_default();
        let deployment = model.deployment.as_deref().unwrap_or_default();
        let api_version = model.api_version.as_deref().unwrap_or_default();
        format!(
            "{}?api-version={api_version}",
            join_url(endpoint, &format!("openai/deployments/{deployment}/chat/completions"))
        )
    }

    async fn send(
        &self,
        model: &Model,
        request: &CompletionRequest,
        api_key: Option<&str>,
        stream: bool,
    ) -> Result<reqwest::Response, ProviderError> {
        self.validate_config(model)?;
        let api_key = require_key(NAME, api_key)?;
        let body = ChatRequest::new(None, request, stream);

        let response = self
            .http
            .post(Self::url(model))
            .header("api-key", api_key)
            .json(&body)
            .send()
            .await?;
        ensure_success(response).await
    }
}

#[async_trait]
impl ProviderAdapter for AzureOpenAiProvider {
    fn name(&self) -> &str {
        NAME
    }

    fn validate_config(&self, model: &Model) -> Result<(), ProviderError> {
        require_fields(
            NAME,
            &[
                ("endpoint", model.endpoint.as_deref()),
                ("apiVersion", model.api_version.as_deref()),
                ("deployment", model.deployment.as_deref()),
            ],
        )
    }

    async fn complete(
        &self,
        model: &Model,
        request: &CompletionRequest,
        api_key: Option<&str>,
    ) -> Result<ProviderResponse, ProviderError> {
        let response = self.send(model, request, api_key, false).await?;
        let body: ChatResponse = response.json().await?;
        body.into_response(NAME)
    }

    async fn stream(
        &self,
        model: &Model,
        request: &CompletionRequest,
        api_key: Option<&str>,
    ) -> Result<CompletionStream, ProviderError> {
        let response = self.send(model, request, api_key, true).await?;
        Ok(completion_stream(response, ChatStreamParser::new(NAME)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::test_support::model;

    #[test]
    fn deployment_url_carries_api_version() {
        let mut m = model(NAME);
        m.endpoint = Some("https://acme.openai.azure.com/".to_string());
        assert_eq!(
            AzureOpenAiProvider::url(&m),
            "https://acme.openai.azure.com/openai/deployments/test-deployment/chat/completions?api-version=2024-06-01"
        );
    }

    #[test]
    fn api_version_is_required() {
        let adapter = AzureOpenAiProvider::new(reqwest::Client::new());
        let mut m = model(NAME);
        m.api_version = None;
        let err = adapter.validate_config(&m).unwrap_err();
        assert!(err.to_string().contains("apiVersion"));
    }
}
