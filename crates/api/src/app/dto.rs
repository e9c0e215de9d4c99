use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use promptq_core::{DomainError, JobId};
use promptq_infra::jobs::{ListQuery, SummaryQuery};
use promptq_jobs::{Job, JobStatus, JobUpdate, NewJob};

const CLIENT_REFERENCE_PREFIX: &str = "clientReference.";

// -------------------------
// Request DTOs
// -------------------------

#[derive(Debug, Deserialize)]
pub struct CreateBatchRequest {
    pub jobs: Vec<NewJob>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchUpdateItem {
    #[serde(alias = "id")]
    pub job_id: JobId,
    #[serde(flatten)]
    pub update: JobUpdate,
}

#[derive(Debug, Deserialize)]
pub struct BatchUpdateRequest {
    pub jobs: Vec<BatchUpdateItem>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchDeleteRequest {
    pub job_ids: Vec<JobId>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ListJobsParams {
    pub status: Option<String>,
    pub operation: Option<String>,
    pub model: Option<String>,
    pub priority: Option<i32>,
    pub limit: Option<usize>,
}

impl ListJobsParams {
    pub fn into_query(self) -> Result<ListQuery, DomainError> {
        let status = self.status.as_deref().map(str::parse::<JobStatus>).transpose()?;
        Ok(ListQuery {
            status,
            operation: self.operation,
            model: self.model,
            priority: self.priority,
            limit: self.limit,
        })
    }
}

/// `operation`, `model` and any number of `clientReference.<key>=<value>`.
pub fn summary_query(params: HashMap<String, String>) -> SummaryQuery {
    let mut query = SummaryQuery::default();
    for (key, value) in params {
        match key.as_str() {
            "operation" => query.operation = Some(value),
            "model" => query.model = Some(value),
            other => {
                if let Some(reference_key) = other.strip_prefix(CLIENT_REFERENCE_PREFIX) {
                    if !reference_key.is_empty() {
                        query.client_reference.push((reference_key.to_string(), value));
                    }
                }
            }
        }
    }
    query.client_reference.sort();
    query
}

// -------------------------
// Response DTOs
// -------------------------

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobResponse {
    pub job_id: JobId,
    #[serde(flatten)]
    pub job: Job,
}

impl From<Job> for JobResponse {
    fn from(job: Job) -> Self {
        Self { job_id: job.id, job }
    }
}

pub fn job_responses(jobs: Vec<Job>) -> Vec<JobResponse> {
    jobs.into_iter().map(JobResponse::from).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn batch_update_items_accept_id_or_job_id() {
        let id = JobId::new();
        let body: BatchUpdateRequest = serde_json::from_value(json!({
            "jobs": [
                { "jobId": id.to_string(), "priority": 10 },
                { "id": id.to_string(), "status": "CANCELED" }
            ]
        }))
        .unwrap();

        assert_eq!(body.jobs[0].job_id, id);
        assert_eq!(body.jobs[0].update.priority, Some(10));
        assert_eq!(body.jobs[1].update.status, Some(JobStatus::Canceled));
    }

    #[test]
    fn list_params_reject_unknown_status() {
        let params = ListJobsParams {
            status: Some("FINISHED".to_string()),
            ..ListJobsParams::default()
        };
        assert!(params.into_query().is_err());

        let params = ListJobsParams {
            status: Some("processed".to_string()),
            limit: Some(5),
            ..ListJobsParams::default()
        };
        let query = params.into_query().unwrap();
        assert_eq!(query.status, Some(JobStatus::Processed));
        assert_eq!(query.limit, Some(5));
    }

    #[test]
    fn summary_query_collects_client_reference_filters() {
        let params = HashMap::from([
            ("model".to_string(), "gpt-4o".to_string()),
            ("clientReference.run".to_string(), "r-1".to_string()),
            ("clientReference.".to_string(), "ignored".to_string()),
            ("unrelated".to_string(), "x".to_string()),
        ]);
        let query = summary_query(params);

        assert_eq!(query.model.as_deref(), Some("gpt-4o"));
        assert_eq!(query.client_reference, vec![("run".to_string(), "r-1".to_string())]);
    }
}
