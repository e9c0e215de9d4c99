//! Infrastructure layer: job stores, the worker scheduler, configuration and
//! the startup catalog.

pub mod catalog;
pub mod config;
pub mod jobs;

pub use catalog::{Catalog, CatalogError};
pub use config::{AppConfig, ConfigError};
