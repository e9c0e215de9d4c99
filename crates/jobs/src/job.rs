use core::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use promptq_core::{ClientId, DomainError, DomainResult, JobId, WorkerId};

pub const MIN_PRIORITY: i32 = 1;
pub const MAX_PRIORITY: i32 = 1000;
pub const MIN_REQUEST_TEMPERATURE: f64 = 0.0;
pub const MAX_REQUEST_TEMPERATURE: f64 = 1.0;

/// Lifecycle status of a job.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Pending,
    Processing,
    Processed,
    Error,
    ErrorConsuming,
    Consumed,
    Canceled,
}

impl JobStatus {
    pub const ALL: [JobStatus; 7] = [
        JobStatus::Pending,
        JobStatus::Processing,
        JobStatus::Processed,
        JobStatus::Error,
        JobStatus::ErrorConsuming,
        JobStatus::Consumed,
        JobStatus::Canceled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "PENDING",
            JobStatus::Processing => "PROCESSING",
            JobStatus::Processed => "PROCESSED",
            JobStatus::Error => "ERROR",
            JobStatus::ErrorConsuming => "ERROR_CONSUMING",
            JobStatus::Consumed => "CONSUMED",
            JobStatus::Canceled => "CANCELED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Canceled | JobStatus::Consumed | JobStatus::ErrorConsuming | JobStatus::Error
        )
    }
}

impl core::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        JobStatus::ALL
            .into_iter()
            .find(|status| status.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| DomainError::validation(format!("unknown job status '{s}'")))
    }
}

/// Token accounting reported by a provider.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Usage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
}

impl Usage {
    pub fn new(prompt_tokens: u64, completion_tokens: u64, total_tokens: u64) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens,
        }
    }
}

/// Time-bounded ownership of a claimed job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Lease {
    pub worker_id: WorkerId,
    pub claimed_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl Lease {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

/// Tokens, wall time and (when the model is priced) cost of one successful run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessingMetrics {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub total_tokens: u64,
    /// Seconds, rounded to two decimals.
    pub duration: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_cost: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_cost: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_cost: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub currency: Option<String>,
}

/// One unit of prompt-processing work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub id: JobId,
    pub client_id: ClientId,
    pub status: JobStatus,
    pub operation: String,
    pub prompts: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_prompts: Option<Vec<String>>,
    pub model: String,
    pub temperature: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    pub priority: i32,
    pub request_data: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_reference: Option<Value>,
    pub attempts: u32,
    #[serde(default)]
    pub last_error: Option<String>,
    #[serde(default)]
    pub result: Option<String>,
    #[serde(default)]
    pub response_data: Option<Value>,
    #[serde(default)]
    pub usage: Option<Usage>,
    #[serde(default)]
    pub processing_metrics: Option<ProcessingMetrics>,
    #[serde(default)]
    pub lease: Option<Lease>,
    #[serde(default)]
    pub not_before: Option<DateTime<Utc>>,
    #[serde(default)]
    pub is_deleted: bool,
    #[serde(default)]
    pub deleted_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Job {
    /// Build a PENDING job from a validated request.
    pub fn create(client_id: ClientId, new: NewJob, now: DateTime<Utc>) -> Self {
        Self {
            id: JobId::new(),
            client_id,
            status: JobStatus::Pending,
            operation: new.operation,
            prompts: new.prompts,
            working_prompts: new.working_prompts,
            model: new.model,
            temperature: new.temperature,
            max_tokens: new.max_tokens,
            priority: new.priority,
            request_data: new.request_data,
            client_reference: new.client_reference,
            attempts: 0,
            last_error: None,
            result: None,
            response_data: None,
            usage: None,
            processing_metrics: None,
            lease: None,
            not_before: None,
            is_deleted: false,
            deleted_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Prompt ids to dispatch: `workingPrompts` when present, else `prompts`.
    pub fn effective_prompts(&self) -> &[String] {
        match &self.working_prompts {
            Some(working) if !working.is_empty() => working,
            _ => &self.prompts,
        }
    }

    /// PENDING, not deleted, and past its backoff window.
    pub fn is_claimable(&self, now: DateTime<Utc>) -> bool {
        self.status == JobStatus::Pending
            && !self.is_deleted
            && self.not_before.is_none_or(|t| t <= now)
    }

    /// PROCESSING with a lease that ran out.
    pub fn has_expired_lease(&self, now: DateTime<Utc>) -> bool {
        self.status == JobStatus::Processing
            && !self.is_deleted
            && self.lease.as_ref().is_some_and(|l| l.is_expired(now))
    }
}

/// Existence checks against the model and prompt catalogs.
///
/// Implemented by the infrastructure layer; kept as a trait so validation
/// stays pure.
pub trait ReferenceCheck {
    /// Fails with a `Validation` error when the model is unknown or its
    /// provider configuration is unusable.
    fn check_model(&self, model: &str) -> DomainResult<()>;

    /// Fails with a `Validation` error when the prompt id is unknown.
    fn check_prompt(&self, prompt_id: &str) -> DomainResult<()>;
}

/// A client's request to enqueue a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewJob {
    pub operation: String,
    pub prompts: Vec<String>,
    #[serde(default)]
    pub working_prompts: Option<Vec<String>>,
    pub model: String,
    pub temperature: f64,
    #[serde(default)]
    pub max_tokens: Option<u32>,
    pub priority: i32,
    pub request_data: Value,
    #[serde(default)]
    pub client_reference: Option<Value>,
}

impl NewJob {
    pub fn validate(&self, refs: &dyn ReferenceCheck) -> DomainResult<()> {
        validate_operation(&self.operation)?;
        validate_prompts("prompts", &self.prompts, refs)?;
        if let Some(working) = &self.working_prompts {
            validate_prompts("workingPrompts", working, refs)?;
        }
        validate_model(&self.model, refs)?;
        validate_temperature(self.temperature)?;
        validate_priority(self.priority)?;
        if let Some(max_tokens) = self.max_tokens {
            validate_max_tokens(max_tokens)?;
        }
        validate_request_data(&self.request_data)?;
        if let Some(reference) = &self.client_reference {
            validate_client_reference(reference)?;
        }
        Ok(())
    }
}

/// A client's edit of an existing job: a status change, field edits, or both.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobUpdate {
    #[serde(default)]
    pub status: Option<JobStatus>,
    #[serde(default)]
    pub operation: Option<String>,
    #[serde(default)]
    pub prompts: Option<Vec<String>>,
    #[serde(default)]
    pub working_prompts: Option<Vec<String>>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub temperature: Option<f64>,
    #[serde(default)]
    pub max_tokens: Option<u32>,
    #[serde(default)]
    pub priority: Option<i32>,
    #[serde(default)]
    pub request_data: Option<Value>,
    #[serde(default)]
    pub client_reference: Option<Value>,
}

impl JobUpdate {
    /// True when any non-status field is being edited.
    pub fn has_field_edits(&self) -> bool {
        self.operation.is_some()
            || self.prompts.is_some()
            || self.working_prompts.is_some()
            || self.model.is_some()
            || self.temperature.is_some()
            || self.max_tokens.is_some()
            || self.priority.is_some()
            || self.request_data.is_some()
            || self.client_reference.is_some()
    }

    pub fn is_empty(&self) -> bool {
        self.status.is_none() && !self.has_field_edits()
    }

    /// Field-level constraints only; state checks happen in `batch`.
    pub fn validate_fields(&self, refs: &dyn ReferenceCheck) -> DomainResult<()> {
        if let Some(operation) = &self.operation {
            validate_operation(operation)?;
        }
        if let Some(prompts) = &self.prompts {
            validate_prompts("prompts", prompts, refs)?;
        }
        if let Some(working) = &self.working_prompts {
            validate_prompts("workingPrompts", working, refs)?;
        }
        if let Some(model) = &self.model {
            validate_model(model, refs)?;
        }
        if let Some(temperature) = self.temperature {
            validate_temperature(temperature)?;
        }
        if let Some(priority) = self.priority {
            validate_priority(priority)?;
        }
        if let Some(max_tokens) = self.max_tokens {
            validate_max_tokens(max_tokens)?;
        }
        if let Some(data) = &self.request_data {
            validate_request_data(data)?;
        }
        if let Some(reference) = &self.client_reference {
            validate_client_reference(reference)?;
        }
        Ok(())
    }
}

fn validate_operation(operation: &str) -> DomainResult<()> {
    if operation.trim().is_empty() {
        return Err(DomainError::validation("operation must not be empty"));
    }
    Ok(())
}

fn validate_prompts(field: &str, prompts: &[String], refs: &dyn ReferenceCheck) -> DomainResult<()> {
    if prompts.is_empty() {
        return Err(DomainError::validation(format!("{field} must contain at least one prompt id")));
    }
    for prompt_id in prompts {
        refs.check_prompt(prompt_id)?;
    }
    Ok(())
}

fn validate_model(model: &str, refs: &dyn ReferenceCheck) -> DomainResult<()> {
    if model.trim().is_empty() {
        return Err(DomainError::validation("model must not be empty"));
    }
    refs.check_model(model)
}

fn validate_temperature(temperature: f64) -> DomainResult<()> {
    if !(MIN_REQUEST_TEMPERATURE..=MAX_REQUEST_TEMPERATURE).contains(&temperature) {
        return Err(DomainError::validation("temperature must be between 0 and 1"));
    }
    Ok(())
}

fn validate_priority(priority: i32) -> DomainResult<()> {
    if !(MIN_PRIORITY..=MAX_PRIORITY).contains(&priority) {
        return Err(DomainError::validation("priority must be between 1 and 1000"));
    }
    Ok(())
}

fn validate_max_tokens(max_tokens: u32) -> DomainResult<()> {
    if max_tokens == 0 {
        return Err(DomainError::validation("maxTokens must be greater than 0"));
    }
    Ok(())
}

fn validate_request_data(data: &Value) -> DomainResult<()> {
    if !data.is_object() {
        return Err(DomainError::validation("requestData must be a JSON object"));
    }
    Ok(())
}

fn validate_client_reference(reference: &Value) -> DomainResult<()> {
    if !reference.is_object() {
        return Err(DomainError::validation("clientReference must be a JSON object"));
    }
    Ok(())
}
