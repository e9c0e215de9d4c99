//! Two-phase batch mutation.
//!
//! Phase 1 ([`validate_batch`]) checks every entry against a snapshot of the
//! targeted jobs and turns it into a [`PlannedMutation`]. Nothing is written
//! unless every entry passes; phase 2 (applying the plans one by one through
//! the store's conditional update) lives in the service layer.

use std::collections::{HashMap, HashSet};

use thiserror::Error;

use promptq_auth::{authorize_job_access, Principal};
use promptq_core::{DomainError, DomainResult, JobId};

use crate::job::{Job, JobStatus, JobUpdate, ReferenceCheck};
use crate::patch::{Expected, JobPatch};
use crate::transition::{check_transition, Actor};

/// What a client wants done to one job.
#[derive(Debug, Clone, PartialEq)]
pub enum BatchMutation {
    Update(JobUpdate),
    Delete,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BatchEntry {
    pub job_id: JobId,
    pub mutation: BatchMutation,
}

impl BatchEntry {
    pub fn update(job_id: JobId, update: JobUpdate) -> Self {
        Self {
            job_id,
            mutation: BatchMutation::Update(update),
        }
    }

    pub fn delete(job_id: JobId) -> Self {
        Self {
            job_id,
            mutation: BatchMutation::Delete,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum PlannedAction {
    Patch(JobPatch),
    Delete,
}

/// A validated mutation, ready for the store.
///
/// `expected` pins the status the job had when it was validated, so a
/// concurrent change between the two phases makes the write fail instead of
/// silently landing on a different state.
#[derive(Debug, Clone, PartialEq)]
pub struct PlannedMutation {
    pub job_id: JobId,
    pub expected: Expected,
    pub action: PlannedAction,
}

/// The first entry that failed validation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("batch entry {index} rejected: {error}")]
pub struct BatchError {
    /// Zero-based position in the request.
    pub index: usize,
    pub error: DomainError,
}

/// Validate a single mutation against the job it targets.
///
/// `job` is `None` when the id does not resolve (or the job is deleted).
pub fn plan_mutation(
    job: Option<&Job>,
    mutation: &BatchMutation,
    principal: &Principal,
    refs: &dyn ReferenceCheck,
) -> DomainResult<PlannedMutation> {
    let job = job.filter(|j| !j.is_deleted).ok_or(DomainError::NotFound)?;
    authorize_job_access(principal, job.client_id)?;

    let expected = Expected::status(job.status);
    let action = match mutation {
        BatchMutation::Delete => PlannedAction::Delete,
        BatchMutation::Update(update) => {
            if update.is_empty() {
                return Err(DomainError::validation("update must change at least one field"));
            }
            update.validate_fields(refs)?;
            if update.has_field_edits() && job.status != JobStatus::Pending {
                return Err(DomainError::validation(format!(
                    "job fields can only be edited while PENDING (job is {})",
                    job.status
                )));
            }
            if let Some(to) = update.status {
                check_transition(job.status, to, Actor::Client)?;
            }
            PlannedAction::Patch(patch_from_update(update))
        }
    };

    Ok(PlannedMutation {
        job_id: job.id,
        expected,
        action,
    })
}

/// Phase 1: validate every entry, stopping at the first failure.
///
/// `jobs` is the caller's snapshot of the referenced jobs; ids missing from
/// it are reported as not found.
pub fn validate_batch(
    entries: &[BatchEntry],
    jobs: &HashMap<JobId, Job>,
    principal: &Principal,
    refs: &dyn ReferenceCheck,
) -> Result<Vec<PlannedMutation>, BatchError> {
    if entries.is_empty() {
        return Err(BatchError {
            index: 0,
            error: DomainError::validation("batch must contain at least one entry"),
        });
    }

    let mut seen = HashSet::with_capacity(entries.len());
    let mut planned = Vec::with_capacity(entries.len());

    for (index, entry) in entries.iter().enumerate() {
        if !seen.insert(entry.job_id) {
            return Err(BatchError {
                index,
                error: DomainError::validation(format!("job {} appears more than once", entry.job_id)),
            });
        }
        let plan = plan_mutation(jobs.get(&entry.job_id), &entry.mutation, principal, refs)
            .map_err(|error| BatchError { index, error })?;
        planned.push(plan);
    }

    Ok(planned)
}

fn patch_from_update(update: &JobUpdate) -> JobPatch {
    JobPatch {
        status: update.status,
        operation: update.operation.clone(),
        prompts: update.prompts.clone(),
        working_prompts: update.working_prompts.clone().map(Some),
        model: update.model.clone(),
        temperature: update.temperature,
        max_tokens: update.max_tokens.map(Some),
        priority: update.priority,
        request_data: update.request_data.clone(),
        client_reference: update.client_reference.clone().map(Some),
        ..JobPatch::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::test_support::{pending_job, FixedRefs};
    use chrono::Utc;
    use promptq_core::ClientId;
    use proptest::prelude::*;

    fn snapshot(jobs: &[Job]) -> HashMap<JobId, Job> {
        jobs.iter().map(|j| (j.id, j.clone())).collect()
    }

    fn priority(p: i32) -> BatchMutation {
        BatchMutation::Update(JobUpdate {
            priority: Some(p),
            ..JobUpdate::default()
        })
    }

    fn status(s: JobStatus) -> BatchMutation {
        BatchMutation::Update(JobUpdate {
            status: Some(s),
            ..JobUpdate::default()
        })
    }

    #[test]
    fn unknown_job_is_reported_with_its_index() {
        let owner = ClientId::new();
        let a = pending_job(owner);
        let entries = vec![
            BatchEntry {
                job_id: a.id,
                mutation: priority(10),
            },
            BatchEntry {
                job_id: JobId::new(),
                mutation: priority(10),
            },
        ];

        let err = validate_batch(&entries, &snapshot(&[a]), &Principal::Client(owner), &FixedRefs).unwrap_err();
        assert_eq!(err.index, 1);
        assert_eq!(err.error, DomainError::NotFound);
    }

    #[test]
    fn foreign_job_looks_missing_to_clients_but_not_to_admin() {
        let job = pending_job(ClientId::new());
        let stranger = Principal::Client(ClientId::new());

        assert_eq!(
            plan_mutation(Some(&job), &priority(5), &stranger, &FixedRefs),
            Err(DomainError::NotFound)
        );
        assert!(plan_mutation(Some(&job), &priority(5), &Principal::Admin, &FixedRefs).is_ok());
    }

    #[test]
    fn field_edits_require_pending() {
        let owner = ClientId::new();
        let mut job = pending_job(owner);
        job.status = JobStatus::Processed;

        assert!(matches!(
            plan_mutation(Some(&job), &priority(5), &Principal::Client(owner), &FixedRefs),
            Err(DomainError::Validation(_))
        ));
        // A pure status change is still fine.
        assert!(plan_mutation(Some(&job), &status(JobStatus::Consumed), &Principal::Client(owner), &FixedRefs).is_ok());
    }

    #[test]
    fn worker_only_transition_is_rejected() {
        let owner = ClientId::new();
        let job = pending_job(owner);
        assert!(matches!(
            plan_mutation(Some(&job), &status(JobStatus::Processing), &Principal::Client(owner), &FixedRefs),
            Err(DomainError::InvalidTransition(_))
        ));
    }

    #[test]
    fn empty_update_is_rejected() {
        let owner = ClientId::new();
        let job = pending_job(owner);
        let empty = BatchMutation::Update(JobUpdate::default());
        assert!(matches!(
            plan_mutation(Some(&job), &empty, &Principal::Client(owner), &FixedRefs),
            Err(DomainError::Validation(_))
        ));
    }

    #[test]
    fn duplicate_ids_are_rejected() {
        let owner = ClientId::new();
        let job = pending_job(owner);
        let entries = vec![BatchEntry::delete(job.id), BatchEntry::delete(job.id)];

        let err = validate_batch(&entries, &snapshot(&[job]), &Principal::Client(owner), &FixedRefs).unwrap_err();
        assert_eq!(err.index, 1);
        assert!(matches!(err.error, DomainError::Validation(_)));
    }

    #[test]
    fn deleted_jobs_are_not_found() {
        let owner = ClientId::new();
        let mut job = pending_job(owner);
        job.is_deleted = true;
        job.deleted_at = Some(Utc::now());
        assert_eq!(
            plan_mutation(Some(&job), &BatchMutation::Delete, &Principal::Client(owner), &FixedRefs),
            Err(DomainError::NotFound)
        );
    }

    #[test]
    fn plan_pins_current_status_and_carries_edits() {
        let owner = ClientId::new();
        let job = pending_job(owner);
        let plan = plan_mutation(Some(&job), &priority(900), &Principal::Client(owner), &FixedRefs).unwrap();

        assert_eq!(plan.expected, Expected::status(JobStatus::Pending));
        match plan.action {
            PlannedAction::Patch(patch) => {
                assert_eq!(patch.priority, Some(900));
                assert!(patch.status.is_none());
            }
            PlannedAction::Delete => panic!("expected a patch"),
        }
    }

    /// Applies plans in memory the way the service does against a store.
    fn apply_all(jobs: &mut HashMap<JobId, Job>, plans: &[PlannedMutation]) {
        let now = Utc::now();
        for plan in plans {
            let job = jobs.get_mut(&plan.job_id).unwrap();
            assert!(plan.expected.matches(job));
            match &plan.action {
                PlannedAction::Patch(patch) => patch.apply(job, now),
                PlannedAction::Delete => {
                    job.is_deleted = true;
                    job.deleted_at = Some(now);
                }
            }
        }
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 256,
            ..ProptestConfig::default()
        })]

        /// Property: one invalid entry anywhere in the batch means no plans
        /// are produced, so every referenced job stays as it was.
        #[test]
        fn one_bad_entry_leaves_every_job_unchanged(
            size in 1usize..12,
            bad_at in 0usize..12,
            new_priority in 1i32..=1000,
        ) {
            let owner = ClientId::new();
            let bad_at = bad_at % size;
            let jobs: Vec<Job> = (0..size).map(|_| pending_job(owner)).collect();
            let mut store = snapshot(&jobs);
            let before = store.clone();

            let entries: Vec<BatchEntry> = jobs
                .iter()
                .enumerate()
                .map(|(i, job)| BatchEntry {
                    job_id: job.id,
                    mutation: if i == bad_at { priority(0) } else { priority(new_priority) },
                })
                .collect();

            let result = validate_batch(&entries, &store, &Principal::Client(owner), &FixedRefs);
            match result {
                Ok(plans) => {
                    apply_all(&mut store, &plans);
                    prop_assert!(false, "batch with an invalid entry was accepted");
                }
                Err(err) => {
                    prop_assert_eq!(err.index, bad_at);
                    prop_assert_eq!(&store, &before);
                }
            }
        }

        /// Property: a fully valid batch yields one plan per entry, and
        /// applying them updates every job.
        #[test]
        fn valid_batch_applies_to_every_job(size in 1usize..12, new_priority in 1i32..=1000) {
            let owner = ClientId::new();
            let jobs: Vec<Job> = (0..size).map(|_| pending_job(owner)).collect();
            let mut store = snapshot(&jobs);
            let entries: Vec<BatchEntry> = jobs
                .iter()
                .map(|job| BatchEntry { job_id: job.id, mutation: priority(new_priority) })
                .collect();

            let plans = validate_batch(&entries, &store, &Principal::Client(owner), &FixedRefs).unwrap();
            prop_assert_eq!(plans.len(), size);
            apply_all(&mut store, &plans);
            prop_assert!(store.values().all(|j| j.priority == new_priority));
        }
    }
}
