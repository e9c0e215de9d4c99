use thiserror::Error;

use promptq_jobs::{Failure, FailureKind};

/// Anything that can go wrong between picking a model and holding a
/// parsed completion.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("provider call timed out: {0}")]
    Timeout(String),

    #[error("provider rate limit hit: {0}")]
    RateLimited(String),

    #[error("provider unavailable: {0}")]
    Upstream(String),

    #[error("provider rejected credentials: {0}")]
    Auth(String),

    /// Unknown model/prompt, unregistered adapter, missing key or config
    /// field.
    #[error("configuration error: {0}")]
    Config(String),

    #[error("prompt rejected by provider policy: {0}")]
    PolicyRejected(String),

    #[error("provider returned an empty completion")]
    EmptyCompletion,

    #[error("malformed structured output: {0}")]
    MalformedOutput(String),

    /// The HTTP request itself failed (network, DNS, TLS, body decode).
    #[error("HTTP request failed: {0}")]
    Transport(#[from] reqwest::Error),

    /// Non-2xx status that none of the other variants describe.
    #[error("provider API error ({status}): {body}")]
    Api { status: u16, body: String },
}

impl ProviderError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Classify a non-2xx provider response.
    pub fn from_status(status: u16, body: String) -> Self {
        match status {
            401 | 403 => Self::Auth(body),
            408 | 504 => Self::Timeout(body),
            429 => Self::RateLimited(body),
            500..=599 => Self::Upstream(format!("status {status}: {body}")),
            400 if is_policy_rejection(&body) => Self::PolicyRejected(body),
            _ => Self::Api { status, body },
        }
    }

    pub fn failure_kind(&self) -> FailureKind {
        match self {
            ProviderError::Timeout(_) => FailureKind::Timeout,
            ProviderError::RateLimited(_) => FailureKind::RateLimited,
            ProviderError::Upstream(_) => FailureKind::Upstream,
            ProviderError::Auth(_) => FailureKind::Auth,
            ProviderError::Config(_) => FailureKind::Config,
            ProviderError::PolicyRejected(_) => FailureKind::PolicyRejected,
            ProviderError::EmptyCompletion | ProviderError::MalformedOutput(_) => FailureKind::MalformedOutput,
            ProviderError::Transport(e) if e.is_timeout() => FailureKind::Timeout,
            ProviderError::Transport(_) => FailureKind::Upstream,
            ProviderError::Api { .. } => FailureKind::Validation,
        }
    }
}

impl From<ProviderError> for Failure {
    fn from(err: ProviderError) -> Self {
        Failure::new(err.failure_kind(), err.to_string())
    }
}

fn is_policy_rejection(body: &str) -> bool {
    body.contains("content_filter") || body.contains("content_policy")
}

#[cfg(test)]
mod tests {
    use super::*;
    use promptq_jobs::FailureClass;

    #[test]
    fn status_codes_map_to_failure_classes() {
        let transient = [408, 429, 500, 502, 503, 504];
        for status in transient {
            let err = ProviderError::from_status(status, String::new());
            assert_eq!(err.failure_kind().class(), FailureClass::Transient, "{status}");
        }

        let permanent = [400, 401, 403, 404, 422];
        for status in permanent {
            let err = ProviderError::from_status(status, String::new());
            assert_eq!(err.failure_kind().class(), FailureClass::Permanent, "{status}");
        }
    }

    #[test]
    fn content_filter_is_a_policy_rejection() {
        let body = r#"{"error":{"code":"content_filter","message":"filtered"}}"#.to_string();
        assert!(matches!(ProviderError::from_status(400, body), ProviderError::PolicyRejected(_)));
    }

    #[test]
    fn failure_keeps_the_message() {
        let failure: Failure = ProviderError::config("model 'x' has no API key").into();
        assert_eq!(failure.kind, FailureKind::Config);
        assert!(failure.message.contains("model 'x' has no API key"));
    }
}
