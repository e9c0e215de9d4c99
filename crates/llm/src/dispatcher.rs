//! One job in, one bounded provider call out.
//!
//! The dispatcher resolves the job's model, prompts and API key, clamps the
//! temperature into the model's bounds, calls the adapter under a timeout
//! and normalizes the answer (repairing almost-JSON output on the way).

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Deserialize;
use tracing::debug;

use promptq_core::{DomainError, DomainResult};
use promptq_jobs::{Completion, Job, ProcessingMetrics, ReferenceCheck};

use crate::catalog::{ModelCatalog, PromptCatalog};
use crate::error::ProviderError;
use crate::keys::ApiKeys;
use crate::model::Model;
use crate::provider::{CompletionRequest, CompletionStream, ProviderAdapter};
use crate::registry::ProviderRegistry;
use crate::repair::parse_structured;

/// Used by `POST /stream` when the caller sends no temperature.
pub const DEFAULT_STREAM_TEMPERATURE: f64 = 0.7;

/// Body of `POST /stream`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamRequest {
    pub user_prompt: String,
    #[serde(default)]
    pub additional_prompts: Option<Vec<String>>,
    pub model: String,
    #[serde(default)]
    pub temperature: Option<f64>,
}

#[derive(Clone)]
pub struct Dispatcher {
    models: Arc<ModelCatalog>,
    prompts: Arc<PromptCatalog>,
    registry: Arc<ProviderRegistry>,
    keys: Arc<ApiKeys>,
    timeout: Duration,
}

impl Dispatcher {
    pub fn new(
        models: Arc<ModelCatalog>,
        prompts: Arc<PromptCatalog>,
        registry: Arc<ProviderRegistry>,
        keys: Arc<ApiKeys>,
        timeout: Duration,
    ) -> Self {
        Self {
            models,
            prompts,
            registry,
            keys,
            timeout,
        }
    }

    pub fn models(&self) -> &ModelCatalog {
        &self.models
    }

    pub fn prompts(&self) -> &PromptCatalog {
        &self.prompts
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// The model exists, its adapter is registered and accepts its config.
    pub fn check_model(&self, name: &str) -> Result<&Model, ProviderError> {
        let model = self
            .models
            .get(name)
            .ok_or_else(|| ProviderError::config(format!("model '{name}' does not exist")))?;
        let adapter = self.registry.get(&model.provider)?;
        adapter.validate_config(model)?;
        Ok(model)
    }

    fn prepare(&self, model_name: &str) -> Result<(Arc<dyn ProviderAdapter>, &Model, Option<&str>), ProviderError> {
        let model = self.check_model(model_name)?;
        let adapter = self.registry.get(&model.provider)?;
        let api_key = if adapter.requires_api_key() {
            let key_ref = model
                .key_ref
                .as_deref()
                .ok_or_else(|| ProviderError::config(format!("model '{}' has no keyRef", model.name)))?;
            let key = self.keys.get(key_ref).ok_or_else(|| {
                ProviderError::config(format!(
                    "API key '{key_ref}' is not set (expected in {})",
                    ApiKeys::env_var_name(key_ref)
                ))
            })?;
            Some(key)
        } else {
            None
        };
        Ok((adapter, model, api_key))
    }

    /// Provider-agnostic request for `job` against `model`.
    pub fn build_request(&self, job: &Job, model: &Model) -> Result<CompletionRequest, ProviderError> {
        let system_prompt = self.prompts.resolve(job.effective_prompts())?.join("\n\n");
        let user_content = serde_json::to_string_pretty(&job.request_data)
            .map_err(|e| ProviderError::config(format!("requestData could not be rendered: {e}")))?;
        Ok(CompletionRequest {
            system_prompt,
            user_content,
            temperature: model.clamp_temperature(job.temperature),
            max_tokens: model.effective_max_tokens(job.max_tokens),
        })
    }

    /// Run `job` through its provider and parse the structured answer.
    pub async fn dispatch(&self, job: &Job) -> Result<Completion, ProviderError> {
        let (adapter, model, api_key) = self.prepare(&job.model)?;
        let request = self.build_request(job, model)?;

        debug!(
            job_id = %job.id,
            provider = adapter.name(),
            model = %model.name,
            temperature = request.temperature,
            max_tokens = request.max_tokens,
            "dispatching job"
        );

        let started = Instant::now();
        let response = tokio::time::timeout(self.timeout, adapter.complete(model, &request, api_key))
            .await
            .map_err(|_| ProviderError::Timeout(format!("no answer within {}s", self.timeout.as_secs_f64())))??;
        let elapsed = started.elapsed();

        if response.text.trim().is_empty() {
            return Err(ProviderError::EmptyCompletion);
        }
        let parsed = parse_structured(&response.text)
            .ok_or_else(|| ProviderError::MalformedOutput("response is not valid JSON, even after repair".to_string()))?;

        let usage = response.usage;
        let cost = model.estimate_cost(usage.prompt_tokens, usage.completion_tokens);
        let metrics = ProcessingMetrics {
            input_tokens: usage.prompt_tokens,
            output_tokens: usage.completion_tokens,
            total_tokens: usage.total_tokens,
            duration: round2(elapsed.as_secs_f64()),
            input_cost: cost.as_ref().map(|c| c.input_cost),
            output_cost: cost.as_ref().map(|c| c.output_cost),
            total_cost: cost.as_ref().map(|c| c.total_cost),
            currency: cost.map(|c| c.currency),
        };

        Ok(Completion {
            text: response.text,
            response_data: Some(parsed),
            usage,
            metrics,
        })
    }

    /// Open a streaming completion. Only opening the stream is bounded by
    /// the timeout.
    pub async fn stream(&self, request: &StreamRequest) -> Result<CompletionStream, ProviderError> {
        if request.user_prompt.trim().is_empty() {
            return Err(ProviderError::config("userPrompt must not be empty"));
        }
        let (adapter, model, api_key) = self.prepare(&request.model)?;

        let prompt_ids = request.additional_prompts.as_deref().unwrap_or_default();
        let system_prompt: String = self
            .prompts
            .resolve(prompt_ids)?
            .into_iter()
            .map(|text| format!("{text}\n"))
            .collect();
        let completion = CompletionRequest {
            system_prompt,
            user_content: request.user_prompt.clone(),
            temperature: model.clamp_temperature(request.temperature.unwrap_or(DEFAULT_STREAM_TEMPERATURE)),
            max_tokens: model.max_tokens,
        };

        debug!(provider = adapter.name(), model = %model.name, "opening stream");
        tokio::time::timeout(self.timeout, adapter.stream(model, &completion, api_key))
            .await
            .map_err(|_| ProviderError::Timeout(format!("stream not opened within {}s", self.timeout.as_secs_f64())))?
    }
}

impl ReferenceCheck for Dispatcher {
    fn check_model(&self, model: &str) -> DomainResult<()> {
        Dispatcher::check_model(self, model)
            .map(|_| ())
            .map_err(|e| DomainError::validation(e.to_string()))
    }

    fn check_prompt(&self, prompt_id: &str) -> DomainResult<()> {
        if self.prompts.contains(prompt_id) {
            Ok(())
        } else {
            Err(DomainError::validation(format!("prompt '{prompt_id}' does not exist")))
        }
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("models", &self.models.len())
            .field("prompts", &self.prompts.len())
            .field("registry", &self.registry)
            .field("timeout", &self.timeout)
            .finish()
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
