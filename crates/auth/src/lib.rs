//! `promptq-auth` — authentication/authorization boundary.
//!
//! This crate is decoupled from HTTP and storage: callers hand it raw header
//! values and a client directory, and get back a [`Principal`]. Everything
//! past this boundary trusts the principal and never looks at raw keys again.

pub mod api_key;
pub mod authorize;
pub mod client;
pub mod principal;

pub use api_key::{ApiKeyHasher, AuthError};
pub use authorize::{authorize_job_access, Authenticator, Credentials};
pub use client::{Client, ClientDirectory};
pub use principal::Principal;
