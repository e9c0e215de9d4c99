//! Per-status counts and metric roll-ups for `GET /jobs/summary`.

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;

use crate::job::{Job, JobStatus};

/// Reported in place of a currency when the aggregated jobs do not share one.
pub const MIXED_CURRENCY_MESSAGE: &str = "different currencies found, no cost data could be summarised";

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobSummary {
    /// One entry per status, zero included (`"PENDING": 3`, ...).
    #[serde(flatten)]
    pub counts: BTreeMap<JobStatus, u64>,
    pub total: u64,
    pub processing_metrics: Option<MetricsSummary>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsSummary {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub total_tokens: u64,
    pub duration: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_cost: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_cost: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_cost: Option<f64>,
    pub currency: Option<String>,
}

impl JobSummary {
    /// Summarize already-filtered, non-deleted jobs.
    pub fn from_jobs<'a>(jobs: impl IntoIterator<Item = &'a Job>) -> Self {
        let mut counts: BTreeMap<JobStatus, u64> = JobStatus::ALL.into_iter().map(|s| (s, 0)).collect();
        let mut total = 0;
        let mut rollup = MetricsRollup::default();

        for job in jobs {
            *counts.entry(job.status).or_default() += 1;
            total += 1;
            if matches!(job.status, JobStatus::Processed | JobStatus::Consumed) {
                rollup.add(job);
            }
        }

        Self {
            counts,
            total,
            processing_metrics: rollup.finish(),
        }
    }

    pub fn count(&self, status: JobStatus) -> u64 {
        self.counts.get(&status).copied().unwrap_or(0)
    }
}

#[derive(Default)]
struct MetricsRollup {
    jobs: usize,
    input_tokens: u64,
    output_tokens: u64,
    total_tokens: u64,
    duration: f64,
    input_cost: f64,
    output_cost: f64,
    total_cost: f64,
    currencies: BTreeSet<String>,
    without_currency: usize,
}

impl MetricsRollup {
    fn add(&mut self, job: &Job) {
        let Some(m) = &job.processing_metrics else {
            return;
        };
        self.jobs += 1;
        self.input_tokens += m.input_tokens;
        self.output_tokens += m.output_tokens;
        self.total_tokens += m.total_tokens;
        self.duration += m.duration;

        match m.currency.as_deref().filter(|c| !c.is_empty()) {
            Some(currency) => {
                self.currencies.insert(currency.to_string());
                self.input_cost += m.input_cost.unwrap_or(0.0);
                self.output_cost += m.output_cost.unwrap_or(0.0);
                self.total_cost += m.total_cost.unwrap_or(0.0);
            }
            None => self.without_currency += 1,
        }
    }

    fn finish(self) -> Option<MetricsSummary> {
        if self.jobs == 0 {
            return None;
        }
        let mut summary = MetricsSummary {
            input_tokens: self.input_tokens,
            output_tokens: self.output_tokens,
            total_tokens: self.total_tokens,
            duration: round2(self.duration),
            ..MetricsSummary::default()
        };

        // Costs only add up when every job was priced in the same currency.
        match (self.currencies.len(), self.without_currency) {
            (0, _) => {}
            (1, 0) => {
                summary.input_cost = Some(self.input_cost);
                summary.output_cost = Some(self.output_cost);
                summary.total_cost = Some(self.total_cost);
                summary.currency = self.currencies.into_iter().next();
            }
            _ => summary.currency = Some(MIXED_CURRENCY_MESSAGE.to_string()),
        }
        Some(summary)
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::test_support::pending_job;
    use crate::job::ProcessingMetrics;
    use promptq_core::ClientId;

    fn processed(tokens: u64, cost: Option<(f64, &str)>) -> Job {
        let mut job = pending_job(ClientId::new());
        job.status = JobStatus::Processed;
        job.processing_metrics = Some(ProcessingMetrics {
            input_tokens: tokens,
            output_tokens: tokens,
            total_tokens: tokens * 2,
            duration: 0.125,
            input_cost: cost.map(|(c, _)| c),
            output_cost: cost.map(|(c, _)| c),
            total_cost: cost.map(|(c, _)| c * 2.0),
            currency: cost.map(|(_, cur)| cur.to_string()),
        });
        job
    }

    #[test]
    fn counts_every_status_including_zeroes() {
        let mut canceled = pending_job(ClientId::new());
        canceled.status = JobStatus::Canceled;
        let jobs = [pending_job(ClientId::new()), pending_job(ClientId::new()), canceled];

        let summary = JobSummary::from_jobs(&jobs);
        assert_eq!(summary.total, 3);
        assert_eq!(summary.count(JobStatus::Pending), 2);
        assert_eq!(summary.count(JobStatus::Canceled), 1);
        assert_eq!(summary.count(JobStatus::Error), 0);
        assert!(summary.processing_metrics.is_none());

        let value = serde_json::to_value(&summary).unwrap();
        assert_eq!(value["PENDING"], 2);
        assert_eq!(value["ERROR_CONSUMING"], 0);
        assert_eq!(value["total"], 3);
    }

    #[test]
    fn same_currency_sums_costs() {
        let jobs = [processed(10, Some((0.5, "USD"))), processed(20, Some((0.25, "USD")))];
        let metrics = JobSummary::from_jobs(&jobs).processing_metrics.unwrap();

        assert_eq!(metrics.input_tokens, 30);
        assert_eq!(metrics.total_tokens, 60);
        assert_eq!(metrics.duration, 0.25);
        assert_eq!(metrics.total_cost, Some(1.5));
        assert_eq!(metrics.currency.as_deref(), Some("USD"));
    }

    #[test]
    fn mixed_or_missing_currency_drops_costs() {
        let mixed = [processed(1, Some((1.0, "USD"))), processed(1, Some((1.0, "EUR")))];
        let metrics = JobSummary::from_jobs(&mixed).processing_metrics.unwrap();
        assert!(metrics.total_cost.is_none());
        assert_eq!(metrics.currency.as_deref(), Some(MIXED_CURRENCY_MESSAGE));

        let partial = [processed(1, Some((1.0, "USD"))), processed(1, None)];
        let metrics = JobSummary::from_jobs(&partial).processing_metrics.unwrap();
        assert_eq!(metrics.currency.as_deref(), Some(MIXED_CURRENCY_MESSAGE));

        let unpriced = [processed(1, None)];
        let metrics = JobSummary::from_jobs(&unpriced).processing_metrics.unwrap();
        assert!(metrics.currency.is_none());
    }

    #[test]
    fn only_processed_and_consumed_jobs_are_aggregated() {
        let mut errored = processed(100, None);
        errored.status = JobStatus::Error;
        let mut consumed = processed(5, None);
        consumed.status = JobStatus::Consumed;

        let metrics = JobSummary::from_jobs(&[errored, consumed]).processing_metrics.unwrap();
        assert_eq!(metrics.input_tokens, 5);
    }
}
