use async_trait::async_trait;

use crate::error::ProviderError;
use crate::model::{require_fields, Model};
use crate::provider::{require_key, CompletionRequest, CompletionStream, ProviderAdapter, ProviderResponse};
use crate::providers::chat_completions::{ChatRequest, ChatResponse, ChatStreamParser};
use crate::providers::{ensure_success, join_url};
use crate::sse::completion_stream;

const NAME: &str = "openai";

/// Any OpenAI-compatible chat-completions endpoint; `endpoint` is the base
/// URL (e.g. `https://api.openai.com/v1`) and `deployment` the model id.
#[derive(Debug, Clone)]
pub struct OpenAiProvider {
    http: reqwest::Client,
}

impl OpenAiProvider {
    pub fn new(http: reqwest::Client) -> Self {
        Self { http }
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
        let endpoint = model.endpoint.as_deref().unwrap_or_default();
        let body = ChatRequest::new(model.deployment.as_deref(), request, stream);

        let response = self
            .http
            .post(join_url(endpoint, "chat/completions"))
            .bearer_auth(api_key)
            .json(&body)
            .send()
            .await?;
        ensure_success(response).await
    }
}

#[async_trait]
impl ProviderAdapter for OpenAiProvider {
    fn name(&self) -> &str {
        NAME
    }

    fn validate_config(&self, model: &Model) -> Result<(), ProviderError> {
        require_fields(
            NAME,
            &[
                ("endpoint", model.endpoint.as_deref()),
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
    fn endpoint_and_deployment_are_required() {
        let adapter = OpenAiProvider::new(reqwest::Client::new());
        assert!(adapter.validate_config(&model(NAME)).is_ok());

        let mut bare = model(NAME);
        bare.endpoint = None;
        bare.deployment = None;
        let err = adapter.validate_config(&bare).unwrap_err();
        assert!(err.to_string().contains("endpoint, deployment"));
    }

    #[tokio::test]
    async fn missing_key_fails_before_any_request() {
        let adapter = OpenAiProvider::new(reqwest::Client::new());
        let request = CompletionRequest {
            system_prompt: String::new(),
            user_content: "{}".to_string(),
            temperature: 0.0,
            max_tokens: 1,
        };
        let err = adapter.complete(&model(NAME), &request, None).await.unwrap_err();
        assert!(matches!(err, ProviderError::Config(_)));
    }
}
