//! The job status transition table.
//!
//! Every status change in the system goes through [`check_transition`].
//! Pairs not listed in [`TRANSITIONS`] are rejected with
//! `DomainError::InvalidTransition` and the job is left untouched.

use chrono::{DateTime, Utc};

use promptq_core::{DomainError, DomainResult};

use crate::job::{Job, JobStatus};

/// Who is asking for the transition.
///
/// An admin acting through the API is a `Client` here; ownership is checked
/// separately.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Actor {
    Client,
    Worker,
}

/// `(from, to, actor)` triples that are allowed.
pub const TRANSITIONS: &[(JobStatus, JobStatus, Actor)] = &[
    (JobStatus::Pending, JobStatus::Canceled, Actor::Client),
    (JobStatus::Pending, JobStatus::Processing, Actor::Worker),
    (JobStatus::Processing, JobStatus::Processed, Actor::Worker),
    (JobStatus::Processing, JobStatus::Pending, Actor::Worker),
    (JobStatus::Processing, JobStatus::Error, Actor::Worker),
    (JobStatus::Processed, JobStatus::Consumed, Actor::Client),
    (JobStatus::Processed, JobStatus::ErrorConsuming, Actor::Client),
];

pub fn is_allowed(from: JobStatus, to: JobStatus, actor: Actor) -> bool {
    TRANSITIONS
        .iter()
        .any(|&(f, t, a)| f == from && t == to && a == actor)
}

pub fn check_transition(from: JobStatus, to: JobStatus, actor: Actor) -> DomainResult<()> {
    if is_allowed(from, to, actor) {
        Ok(())
    } else {
        Err(DomainError::invalid_transition(format!(
            "{from} -> {to} is not allowed"
        )))
    }
}

impl Job {
    /// Apply a status change in place, or leave the job unchanged on error.
    pub fn transition(&mut self, to: JobStatus, actor: Actor, now: DateTime<Utc>) -> DomainResult<()> {
        check_transition(self.status, to, actor)?;
        self.status = to;
        self.updated_at = now;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::test_support::pending_job;
    use promptq_core::ClientId;
    use proptest::prelude::*;

    #[test]
    fn terminal_states_have_no_outgoing_transitions() {
        for &(from, _, _) in TRANSITIONS {
            assert!(!from.is_terminal(), "{from} is terminal but has an outgoing edge");
        }
    }

    #[test]
    fn clients_cannot_claim() {
        assert!(matches!(
            check_transition(JobStatus::Pending, JobStatus::Processing, Actor::Client),
            Err(DomainError::InvalidTransition(_))
        ));
    }

    #[test]
    fn workers_cannot_cancel() {
        assert!(check_transition(JobStatus::Pending, JobStatus::Canceled, Actor::Worker).is_err());
    }

    #[test]
    fn cancel_after_claim_is_rejected() {
        let mut job = pending_job(ClientId::new());
        job.transition(JobStatus::Processing, Actor::Worker, Utc::now()).unwrap();

        let before = job.clone();
        assert!(job.transition(JobStatus::Canceled, Actor::Client, Utc::now()).is_err());
        assert_eq!(job, before);
    }

    fn any_status() -> impl Strategy<Value = JobStatus> {
        prop::sample::select(JobStatus::ALL.to_vec())
    }

    fn any_actor() -> impl Strategy<Value = Actor> {
        prop::sample::select(vec![Actor::Client, Actor::Worker])
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 256,
            ..ProptestConfig::default()
        })]

        /// Property: a listed transition updates the status; any other pair
        /// leaves the job exactly as it was.
        #[test]
        fn transitions_follow_the_table(from in any_status(), to in any_status(), actor in any_actor()) {
            let mut job = pending_job(ClientId::new());
            job.status = from;
            let before = job.clone();
            let now = Utc::now();

            let result = job.transition(to, actor, now);

            if TRANSITIONS.contains(&(from, to, actor)) {
                prop_assert!(result.is_ok());
                prop_assert_eq!(job.status, to);
                prop_assert_eq!(job.updated_at, now);
            } else {
                prop_assert!(matches!(result, Err(DomainError::InvalidTransition(_))));
                prop_assert_eq!(&job, &before);
            }
        }
    }
}
