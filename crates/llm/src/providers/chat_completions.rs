//! Wire format shared by OpenAI-compatible chat-completions endpoints.
//!
//! Both `openai` and `azure-openai` send the system prompt and the user
//! content as one combined system message.

use serde::{Deserialize, Serialize};

use promptq_jobs::Usage;

use crate::error::ProviderError;
use crate::provider::{non_empty, CompletionRequest, ProviderResponse, StreamEvent};
use crate::sse::EventParser;

#[derive(Debug, Serialize)]
pub(crate) struct ChatRequest<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<&'a str>,
    pub messages: Vec<ChatMessage>,
    pub temperature: f64,
    pub max_completion_tokens: u32,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stream_options: Option<StreamOptions>,
}

#[derive(Debug, Serialize)]
pub(crate) struct ChatMessage {
    pub role: &'static str,
    pub content: String,
}

#[derive(Debug, Serialize)]
pub(crate) struct StreamOptions {
    pub include_usage: bool,
}

impl<'a> ChatRequest<'a> {
    pub fn new(model: Option<&'a str>, request: &CompletionRequest, stream: bool) -> Self {
        Self {
            model,
            messages: vec![ChatMessage {
                role: "system",
                content: format!("{}{}", request.system_prompt, request.user_content),
            }],
            temperature: request.temperature,
            max_completion_tokens: request.max_tokens,
            stream,
            stream_options: stream.then_some(StreamOptions { include_usage: true }),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<ChatUsage>,
}

#[derive(Debug, Default, Deserialize)]
struct Choice {
    #[serde(default)]
    message: Option<ChatContent>,
    #[serde(default)]
    delta: Option<ChatContent>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ChatContent {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ChatUsage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
    #[serde(default)]
    total_tokens: u64,
}

impl From<ChatUsage> for Usage {
    fn from(u: ChatUsage) -> Self {
        Usage::new(u.prompt_tokens, u.completion_tokens, u.total_tokens)
    }
}

fn check_finish_reason(adapter: &str, choice: &Choice) -> Result<(), ProviderError> {
    if choice.finish_reason.as_deref() == Some("content_filter") {
        return Err(ProviderError::PolicyRejected(format!("{adapter}: completion stopped by content filter")));
    }
    Ok(())
}

impl ChatResponse {
    pub fn into_response(self, adapter: &str) -> Result<ProviderResponse, ProviderError> {
        let choice = self.choices.into_iter().next().unwrap_or_default();
        check_finish_reason(adapter, &choice)?;
        let text = non_empty(choice.message.and_then(|m| m.content))?;
        Ok(ProviderResponse {
            text,
            usage: self.usage.map(Usage::from).unwrap_or_default(),
        })
    }
}

/// Delta chunks become fragments; the usage chunk (sent last when
/// `include_usage` is on) becomes the closing `Done`.
pub(crate) struct ChatStreamParser {
    adapter: &'static str,
    usage: Usage,
}

impl ChatStreamParser {
    pub fn new(adapter: &'static str) -> Self {
        Self {
            adapter,
            usage: Usage::default(),
        }
    }
}

impl EventParser for ChatStreamParser {
    fn feed(&mut self, data: &str) -> Result<Vec<StreamEvent>, ProviderError> {
        if data == "[DONE]" {
            return Ok(Vec::new());
        }
        let chunk: ChatResponse = serde_json::from_str(data)
            .map_err(|e| ProviderError::Upstream(format!("{}: unreadable stream chunk: {e}", self.adapter)))?;

        let mut events = Vec::new();
        for choice in &chunk.choices {
            check_finish_reason(self.adapter, choice)?;
            if let Some(text) = choice.delta.as_ref().and_then(|d| d.content.as_deref()) {
                if !text.is_empty() {
                    events.push(StreamEvent::Fragment(text.to_string()));
                }
            }
        }
        if let Some(usage) = chunk.usage {
            self.usage = usage.into();
        }
        Ok(events)
    }

    fn finish(&mut self) -> Vec<StreamEvent> {
        vec![StreamEvent::Done(self.usage)]
    }
}
