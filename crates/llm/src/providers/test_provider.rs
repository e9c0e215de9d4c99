use async_trait::async_trait;
use futures::stream::{self, StreamExt};

use promptq_jobs::Usage;

use crate::error::ProviderError;
use crate::model::{require_fields, Model};
use crate::provider::{CompletionRequest, CompletionStream, ProviderAdapter, ProviderResponse, StreamEvent};

const NAME: &str = "test";

pub const CANNED_RESPONSE: &str = r#"{"test": "response", "message": "This is a dummy response from the test SDK"}"#;

const LOREM_IPSUM: &str = "Lorem ipsum dolor sit amet, consectetur adipiscing elit, sed do eiusmod tempor \
incididunt ut labore et dolore magna aliqua. Ut enim ad minim veniam, quis nostrud exercitation ullamco \
laboris nisi ut aliquip ex ea commodo consequat.";

/// Offline adapter: no network, no key, fixed answers.
#[derive(Debug, Clone, Copy, Default)]
pub struct TestProvider;

#[async_trait]
impl ProviderAdapter for TestProvider {
    fn name(&self) -> &str {
        NAME
    }

    fn requires_api_key(&self) -> bool {
        false
    }

    fn validate_config(&self, model: &Model) -> Result<(), ProviderError> {
        require_fields(NAME, &[("deployment", model.deployment.as_deref())])
    }

    async fn complete(
        &self,
        model: &Model,
        _request: &CompletionRequest,
        _api_key: Option<&str>,
    ) -> Result<ProviderResponse, ProviderError> {
        self.validate_config(model)?;
        Ok(ProviderResponse {
            text: CANNED_RESPONSE.to_string(),
            usage: Usage::new(1, 1, 2),
        })
    }

    async fn stream(
        &self,
        model: &Model,
        _request: &CompletionRequest,
        _api_key: Option<&str>,
    ) -> Result<CompletionStream, ProviderError> {
        self.validate_config(model)?;
        let fragments = LOREM_IPSUM
            .split_inclusive(' ')
            .map(|word| Ok(StreamEvent::Fragment(word.to_string())));
        let done = std::iter::once(Ok(StreamEvent::Done(Usage::new(10, 50, 60))));
        Ok(stream::iter(fragments.chain(done).collect::<Vec<_>>()).boxed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::test_support::model;

    fn request() -> CompletionRequest {
        CompletionRequest {
            system_prompt: String::new(),
            user_content: "{}".to_string(),
            temperature: 0.5,
            max_tokens: 10,
        }
    }

    #[tokio::test]
    async fn completes_with_canned_json() {
        let response = TestProvider.complete(&model(NAME), &request(), None).await.unwrap();
        assert_eq!(response.usage, Usage::new(1, 1, 2));
        let value: serde_json::Value = serde_json::from_str(&response.text).unwrap();
        assert_eq!(value["test"], "response");
    }

    #[tokio::test]
    async fn stream_reassembles_and_ends_with_usage() {
        let events: Vec<StreamEvent> = TestProvider
            .stream(&model(NAME), &request(), None)
            .await
            .unwrap()
            .map(|e| e.unwrap())
            .collect()
            .await;

        let (last, fragments) = events.split_last().unwrap();
        assert_eq!(*last, StreamEvent::Done(Usage::new(10, 50, 60)));
        let text: String = fragments
            .iter()
            .map(|e| match e {
                StreamEvent::Fragment(t) => t.as_str(),
                StreamEvent::Done(_) => panic!("usage before the end"),
            })
            .collect();
        assert_eq!(text, LOREM_IPSUM);
    }

    #[test]
    fn deployment_is_required() {
        let mut m = model(NAME);
        m.deployment = None;
        assert!(TestProvider.validate_config(&m).is_err());
    }
}
