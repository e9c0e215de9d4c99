//! `promptq-llm`
//!
//! **Responsibility:** the boundary between queued jobs and language-model
//! providers.
//!
//! - Model and prompt catalogs (read-only, loaded at startup)
//! - The [`ProviderAdapter`] contract and the explicit [`ProviderRegistry`]
//! - The [`Dispatcher`], which turns a job into one bounded provider call
//!   and normalizes the answer into a [`promptq_jobs::Completion`]
//!
//! This crate never touches the job store; it only reads jobs.

pub mod catalog;
pub mod dispatcher;
pub mod error;
pub mod keys;
pub mod model;
pub mod provider;
pub mod providers;
pub mod registry;
pub mod repair;

mod sse;

pub use catalog::{ModelCatalog, Prompt, PromptCatalog};
pub use dispatcher::{Dispatcher, StreamRequest, DEFAULT_STREAM_TEMPERATURE};
pub use error::ProviderError;
pub use keys::ApiKeys;
pub use model::{Model, ModelCost};
pub use provider::{CompletionRequest, CompletionStream, ProviderAdapter, ProviderResponse, StreamEvent};
pub use registry::ProviderRegistry;
pub use repair::parse_structured;
