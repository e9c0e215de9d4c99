use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use promptq_jobs::Usage;

use crate::error::ProviderError;
use crate::model::{require_fields, Model};
use crate::provider::{
    non_empty, require_key, CompletionRequest, CompletionStream, ProviderAdapter, ProviderResponse, StreamEvent,
};
use crate::providers::{ensure_success, join_url};
use crate::sse::{completion_stream, EventParser};

const NAME: &str = "anthropic";
const API_VERSION: &str = "2023-06-01";

/// Anthropic Messages API. The system prompt travels in its own `system`
/// field; the user content is the single user message.
#[derive(Debug, Clone)]
pub struct AnthropicProvider {
    http: reqwest::Client,
}

#[derive(Debug, Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    system: &'a str,
    messages: [UserMessage<'a>; 1],
    temperature: f64,
    max_tokens: u32,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    stream: bool,
}

#[derive(Debug, Serialize)]
struct UserMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<ContentBlock>,
    #[serde(default)]
    stop_reason: Option<String>,
    #[serde(default)]
    usage: AnthropicUsage,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct AnthropicUsage {
    #[serde(default)]
    input_tokens: u64,
    #[serde(default)]
    output_tokens: u64,
}

impl AnthropicUsage {
    fn into_usage(self) -> Usage {
        Usage::new(self.input_tokens, self.output_tokens, self.input_tokens + self.output_tokens)
    }
}

impl AnthropicProvider {
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
        let body = MessagesRequest {
            model: model.deployment.as_deref().unwrap_or_default(),
            system: &request.system_prompt,
            messages: [UserMessage {
                role: "user",
                content: &request.user_content,
            }],
            temperature: request.temperature,
            max_tokens: request.max_tokens,
            stream,
        };

        let response = self
            .http
            .post(join_url(endpoint, "v1/messages"))
            .header("x-api-key", api_key)
            .header("anthropic-version", API_VERSION)
            .json(&body)
            .send()
            .await?;
        ensure_success(response).await
    }
}

fn check_stop_reason(stop_reason: Option<&str>) -> Result<(), ProviderError> {
    if stop_reason == Some("refusal") {
        return Err(ProviderError::PolicyRejected("anthropic: model refused the prompt".to_string()));
    }
    Ok(())
}

impl MessagesResponse {
    fn into_response(self) -> Result<ProviderResponse, ProviderError> {
        check_stop_reason(self.stop_reason.as_deref())?;
        let text: String = self
            .content
            .into_iter()
            .filter(|block| block.kind == "text")
            .filter_map(|block| block.text)
            .collect();
        Ok(ProviderResponse {
            text: non_empty(Some(text))?,
            usage: self.usage.into_usage(),
        })
    }
}

#[async_trait]
impl ProviderAdapter for AnthropicProvider {
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
        )?;
        let endpoint = model.endpoint.as_deref().unwrap_or_default();
        let host = reqwest::Url::parse(endpoint)
            .ok()
            .and_then(|url| url.host_str().map(str::to_ascii_lowercase))
            .unwrap_or_default();
        if !host.ends_with("anthropic.com") {
            return Err(ProviderError::config(format!(
                "invalid anthropic endpoint '{endpoint}', use 'https://api.anthropic.com'"
            )));
        }
        Ok(())
    }

    async fn complete(
        &self,
        model: &Model,
        request: &CompletionRequest,
        api_key: Option<&str>,
    ) -> Result<ProviderResponse, ProviderError> {
        let response = self.send(model, request, api_key, false).await?;
        let body: MessagesResponse = response.json().await?;
        body.into_response()
    }

    async fn stream(
        &self,
        model: &Model,
        request: &CompletionRequest,
        api_key: Option<&str>,
    ) -> Result<CompletionStream, ProviderError> {
        let response = self.send(model, request, api_key, true).await?;
        Ok(completion_stream(response, MessagesStreamParser::default()))
    }
}

/// Input tokens arrive with `message_start`, output tokens with the final
/// `message_delta`.
#[derive(Debug, Default)]
struct MessagesStreamParser {
    input_tokens: u64,
    output_tokens: u64,
}

impl EventParser for MessagesStreamParser {
    fn feed(&mut self, data: &str) -> Result<Vec<StreamEvent>, ProviderError> {
        let event: Value = serde_json::from_str(data)
            .map_err(|e| ProviderError::Upstream(format!("anthropic: unreadable stream event: {e}")))?;

        match event["type"].as_str().unwrap_or_default() {
            "message_start" => {
                let usage = &event["message"]["usage"];
                self.input_tokens = usage["input_tokens"].as_u64().unwrap_or(0);
                self.output_tokens = usage["output_tokens"].as_u64().unwrap_or(0);
                Ok(Vec::new())
            }
            "content_block_delta" => Ok(event["delta"]["text"]
                .as_str()
                .filter(|t| !t.is_empty())
                .map(|t| vec![StreamEvent::Fragment(t.to_string())])
                .unwrap_or_default()),
            "message_delta" => {
                check_stop_reason(event["delta"]["stop_reason"].as_str())?;
                if let Some(output) = event["usage"]["output_tokens"].as_u64() {
                    self.output_tokens = output;
                }
                Ok(Vec::new())
            }
            "error" => {
                let kind = event["error"]["type"].as_str().unwrap_or_default();
                let message = event["error"]["message"].as_str().unwrap_or_default().to_string();
                Err(match kind {
                    "rate_limit_error" => ProviderError::RateLimited(message),
                    "authentication_error" | "permission_error" => ProviderError::Auth(message),
                    _ => ProviderError::Upstream(format!("{kind}: {message}")),
                })
            }
            _ => Ok(Vec::new()),
        }
    }

    fn finish(&mut self) -> Vec<StreamEvent> {
        vec![StreamEvent::Done(Usage::new(
            self.input_tokens,
            self.output_tokens,
            self.input_tokens + self.output_tokens,
        ))]
    }
}
