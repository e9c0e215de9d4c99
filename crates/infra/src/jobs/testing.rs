//! Scripted provider and dispatcher wiring shared by the job tests.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;

use promptq_jobs::Usage;
use promptq_llm::{
    ApiKeys, CompletionRequest, CompletionStream, Dispatcher, Model, ModelCatalog, Prompt, PromptCatalog,
    ProviderAdapter, ProviderError, ProviderRegistry, ProviderResponse,
};

pub const MODEL: &str = "gpt-test";
pub const PROMPT: &str = "p-summary";

/// One scripted answer.
#[derive(Debug, Clone)]
pub enum Step {
    Reply(String),
    /// Answer with valid JSON after a delay.
    Slow(Duration),
    Timeout,
    RateLimited,
    Auth,
}

/// Plays its steps in order, then keeps answering with valid JSON.
#[derive(Debug, Default)]
pub struct Scripted {
    steps: Mutex<VecDeque<Step>>,
    calls: Mutex<u32>,
}

impl Scripted {
    pub fn new(steps: impl IntoIterator<Item = Step>) -> Arc<Self> {
        Arc::new(Self {
            steps: Mutex::new(steps.into_iter().collect()),
            calls: Mutex::new(0),
        })
    }

    pub fn calls(&self) -> u32 {
        *self.calls.lock().unwrap()
    }
}

#[async_trait]
impl ProviderAdapter for Scripted {
    fn name(&self) -> &str {
        "scripted"
    }

    fn requires_api_key(&self) -> bool {
        false
    }

    fn validate_config(&self, _model: &Model) -> Result<(), ProviderError> {
        Ok(())
    }

    async fn complete(
        &self,
        _model: &Model,
        _request: &CompletionRequest,
        _api_key: Option<&str>,
    ) -> Result<ProviderResponse, ProviderError> {
        *self.calls.lock().unwrap() += 1;
        let step = self.steps.lock().unwrap().pop_front();
        match step {
            None => Ok(ProviderResponse {
                text: r#"{"summary": "ok"}"#.to_string(),
                usage: Usage::new(12, 4, 16),
            }),
            Some(Step::Reply(text)) => Ok(ProviderResponse {
                text,
                usage: Usage::new(12, 4, 16),
            }),
            Some(Step::Slow(delay)) => {
                tokio::time::sleep(delay).await;
                Ok(ProviderResponse {
                    text: r#"{"summary": "ok"}"#.to_string(),
                    usage: Usage::new(12, 4, 16),
                })
            }
            Some(Step::Timeout) => Err(ProviderError::Timeout("scripted timeout".to_string())),
            Some(Step::RateLimited) => Err(ProviderError::RateLimited("scripted 429".to_string())),
            Some(Step::Auth) => Err(ProviderError::Auth("scripted 401".to_string())),
        }
    }

    async fn stream(
        &self,
        _model: &Model,
        _request: &CompletionRequest,
        _api_key: Option<&str>,
    ) -> Result<CompletionStream, ProviderError> {
        Err(ProviderError::config("scripted adapter does not stream"))
    }
}

pub fn model(name: &str) -> Model {
    serde_json::from_value(json!({
        "name": name,
        "provider": "scripted",
        "deployment": "scripted-deployment",
        "maxTokens": 256,
        "cost": { "tokens": 1000, "currency": "EUR", "input": 0.5, "output": 1.5 }
    }))
    .unwrap()
}

/// A dispatcher that knows [`MODEL`], `other-model` and [`PROMPT`], backed
/// by `adapter`.
pub fn dispatcher(adapter: Arc<Scripted>) -> Arc<Dispatcher> {
    let models = ModelCatalog::new([model(MODEL), model("other-model")]).unwrap();
    let prompts = PromptCatalog::new([Prompt {
        id: PROMPT.to_string(),
        name: "summary".to_string(),
        text: "Summarize the input as JSON.".to_string(),
    }]);
    let mut registry = ProviderRegistry::new();
    registry.register(adapter);
    Arc::new(Dispatcher::new(
        Arc::new(models),
        Arc::new(prompts),
        Arc::new(registry),
        Arc::new(ApiKeys::default()),
        Duration::from_secs(5),
    ))
}
