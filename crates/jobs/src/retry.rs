//! Failure classification and retry backoff.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Whether a failure is worth another attempt.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureClass {
    Transient,
    Permanent,
}

/// What went wrong while processing a job.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Provider call exceeded its deadline.
    Timeout,
    /// Provider throttled the request.
    RateLimited,
    /// Provider-side server error or transport failure.
    Upstream,
    /// Structured output could not be parsed, even after repair.
    MalformedOutput,
    /// The worker holding the job stopped renewing it.
    LeaseExpired,
    /// Model/provider misconfiguration (unknown model, missing key, ...).
    Config,
    /// The job itself is unusable (e.g. a prompt id no longer resolves).
    Validation,
    /// Provider rejected our credentials.
    Auth,
    /// Provider refused the prompt on policy grounds.
    PolicyRejected,
}

impl FailureKind {
    pub fn class(&self) -> FailureClass {
        match self {
            FailureKind::Timeout
            | FailureKind::RateLimited
            | FailureKind::Upstream
            | FailureKind::MalformedOutput
            | FailureKind::LeaseExpired => FailureClass::Transient,
            FailureKind::Config
            | FailureKind::Validation
            | FailureKind::Auth
            | FailureKind::PolicyRejected => FailureClass::Permanent,
        }
    }
}

/// A classified failure with its message (recorded as `lastError`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Failure {
    pub kind: FailureKind,
    pub message: String,
}

impl Failure {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn class(&self) -> FailureClass {
        self.kind.class()
    }
}

impl core::fmt::Display for Failure {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.message)
    }
}

/// What to do with a job after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Back to PENDING, eligible again after `delay`.
    Retry { attempts: u32, delay: Duration },
    /// Straight to ERROR.
    GiveUp { attempts: u32 },
}

/// Capped exponential backoff: `base_delay * 2^(attempt-1)`, at most
/// `max_delay`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts after which a transiently failing job becomes ERROR
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::exponential(3, Duration::from_secs(2), Duration::from_secs(300))
    }
}

impl RetryPolicy {
    pub fn exponential(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
            max_delay,
        }
    }

    /// The same delay before every retry.
    pub fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self::exponential(max_attempts, delay, delay)
    }

    /// Delay before the retry that follows failed attempt `attempt`
    /// (1-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let factor = 1u32.checked_shl(attempt - 1).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }

    /// Check if more retries are allowed after `attempts` failed attempts.
    pub fn should_retry(&self, attempts: u32) -> bool {
        attempts < self.max_attempts
    }

    /// Decide the fate of a job that had `attempts_before` failed attempts
    /// and just failed again with `failure`.
    ///
    /// The failing attempt is always counted. Permanent failures give up
    /// immediately; transient ones retry until `max_attempts` is reached.
    pub fn decide(&self, attempts_before: u32, failure: &Failure) -> RetryDecision {
        let attempts = attempts_before.saturating_add(1);
        match failure.class() {
            FailureClass::Permanent => RetryDecision::GiveUp { attempts },
            FailureClass::Transient if self.should_retry(attempts) => RetryDecision::Retry {
                attempts,
                delay: self.delay_for_attempt(attempts),
            },
            FailureClass::Transient => RetryDecision::GiveUp { attempts },
        }
    }
}
