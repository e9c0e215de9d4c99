//! `promptq-core` — shared domain primitives.
//!
//! Identifiers and the domain error model used by every other crate. No IO,
//! no async, no infrastructure concerns.

pub mod error;
pub mod id;

pub use error::{DomainError, DomainResult};
pub use id::{ClientId, JobId, WorkerId};
