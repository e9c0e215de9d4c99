//! Compiled provider adapters.

mod anthropic;
mod azure_openai;
mod chat_completions;
mod openai;
mod test_provider;

pub use anthropic::AnthropicProvider;
pub use azure_openai::AzureOpenAiProvider;
pub use openai::OpenAiProvider;
pub use test_provider::{TestProvider, CANNED_RESPONSE};

use crate::error::ProviderError;

/// Pass 2xx responses through; turn anything else into a classified
/// [`ProviderError`] carrying the body.
pub(crate) async fn ensure_success(response: reqwest::Response) -> Result<reqwest::Response, ProviderError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response
        .text()
        .await
        .unwrap_or_else(|_| "<unreadable body>".to_string());
    Err(ProviderError::from_status(status.as_u16(), body))
}

pub(crate) fn join_url(base: &str, path: &str) -> String {
    format!("{}/{}", base.trim_end_matches('/'), path.trim_start_matches('/'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn urls_join_with_one_slash() {
        assert_eq!(join_url("https://api.x/v1/", "/chat/completions"), "https://api.x/v1/chat/completions");
        assert_eq!(join_url("https://api.x/v1", "chat/completions"), "https://api.x/v1/chat/completions");
    }
}
