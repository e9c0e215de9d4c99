//! Process configuration, read once from the environment at startup.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use promptq_jobs::RetryPolicy;

use crate::jobs::{StoreRetryConfig, WorkerConfig};

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{var} has an invalid value {value:?}: {reason}")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },
}

impl ConfigError {
    fn invalid(var: &'static str, value: &str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            var,
            value: value.to_string(),
            reason: reason.into(),
        }
    }
}

/// Immutable application configuration.
///
/// | Env Var                  | Default        |
/// |--------------------------|----------------|
/// | `PROMPTQ_BIND`           | `0.0.0.0:8080` |
/// | `DATABASE_URL`           | unset          |
/// | `DATABASE_MAX_CONNECTIONS` | `10`         |
/// | `PROMPTQ_CATALOG`        | unset          |
/// | `ADMIN_API_KEY`          | unset          |
/// | `API_KEY_PEPPER`         | empty          |
/// | `NUM_LLM_WORKERS`        | `10`           |
/// | `POLL_INTERVAL_SECS`     | `10`           |
/// | `MAX_ITEMS_PER_BATCH`    | `50`           |
/// | `LEASE_TTL_SECS`         | `300`          |
/// | `MAX_ATTEMPTS`           | `3`            |
/// | `BACKOFF_BASE_MS`        | `2000`         |
/// | `BACKOFF_MAX_SECS`       | `300`          |
/// | `PROVIDER_TIMEOUT_SECS`  | `120`          |
/// | `STORE_MAX_RETRIES`      | `5`            |
/// | `WORKER_MODEL`           | unset          |
/// | `WORKER_OPERATION`       | unset          |
/// | `WORKER_EXIT_WHEN_EMPTY` | `false`        |
#[derive(Clone)]
pub struct AppConfig {
    pub bind: SocketAddr,
    pub database_url: Option<String>,
    pub database_max_connections: u32,
    pub catalog_path: Option<PathBuf>,
    pub admin_api_key: Option<String>,
    pub api_key_pepper: String,
    pub num_workers: usize,
    pub poll_interval: Duration,
    pub max_items_per_batch: usize,
    pub lease_ttl: Duration,
    pub max_attempts: u32,
    pub backoff_base: Duration,
    pub backoff_max: Duration,
    pub provider_timeout: Duration,
    pub store_max_retries: u32,
    pub worker_model: Option<String>,
    pub worker_operation: Option<String>,
    pub worker_exit_when_empty: bool,
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("bind", &self.bind)
            .field("database_url", &self.database_url.as_ref().map(|_| "<set>"))
            .field("catalog_path", &self.catalog_path)
            .field("admin_api_key", &self.admin_api_key.as_ref().map(|_| "<set>"))
            .field("num_workers", &self.num_workers)
            .field("poll_interval", &self.poll_interval)
            .field("max_items_per_batch", &self.max_items_per_batch)
            .field("lease_ttl", &self.lease_ttl)
            .field("max_attempts", &self.max_attempts)
            .field("provider_timeout", &self.provider_timeout)
            .finish_non_exhaustive()
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build from an arbitrary variable source. Unset and blank values fall
    /// back to their defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let var = |name: &str| lookup(name).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let bind = parse(&var, "PROMPTQ_BIND", SocketAddr::from(([0, 0, 0, 0], 8080)))?;
        let poll_interval_secs: u64 = parse(&var, "POLL_INTERVAL_SECS", 10)?;
        if poll_interval_secs == 0 {
            return Err(ConfigError::invalid("POLL_INTERVAL_SECS", "0", "must be at least 1"));
        }
        let max_items_per_batch: usize = parse(&var, "MAX_ITEMS_PER_BATCH", 50)?;
        if max_items_per_batch == 0 {
            return Err(ConfigError::invalid("MAX_ITEMS_PER_BATCH", "0", "must be at least 1"));
        }
        let max_attempts: u32 = parse(&var, "MAX_ATTEMPTS", 3)?;
        if max_attempts == 0 {
            return Err(ConfigError::invalid("MAX_ATTEMPTS", "0", "must be at least 1"));
        }

        Ok(Self {
            bind,
            database_url: var("DATABASE_URL"),
            database_max_connections: parse(&var, "DATABASE_MAX_CONNECTIONS", 10)?,
            catalog_path: var("PROMPTQ_CATALOG").map(PathBuf::from),
            admin_api_key: var("ADMIN_API_KEY"),
            api_key_pepper: lookup("API_KEY_PEPPER").unwrap_or_default(),
            num_workers: parse(&var, "NUM_LLM_WORKERS", 10)?,
            poll_interval: Duration::from_secs(poll_interval_secs),
            max_items_per_batch,
            lease_ttl: Duration::from_secs(parse(&var, "LEASE_TTL_SECS", 300)?),
            max_attempts,
            backoff_base: Duration::from_millis(parse(&var, "BACKOFF_BASE_MS", 2000)?),
            backoff_max: Duration::from_secs(parse(&var, "BACKOFF_MAX_SECS", 300)?),
            provider_timeout: Duration::from_secs(parse(&var, "PROVIDER_TIMEOUT_SECS", 120)?),
            store_max_retries: parse(&var, "STORE_MAX_RETRIES", 5)?,
            worker_model: var("WORKER_MODEL"),
            worker_operation: var("WORKER_OPERATION"),
            worker_exit_when_empty: parse_bool(&var, "WORKER_EXIT_WHEN_EMPTY", false)?,
        })
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::exponential(self.max_attempts, self.backoff_base, self.backoff_max)
    }

    pub fn worker_config(&self) -> WorkerConfig {
        let mut config = WorkerConfig::default()
            .with_poll_interval(self.poll_interval)
            .with_batch_size(self.max_items_per_batch)
            .with_lease_ttl(self.lease_ttl)
            .with_retry_policy(self.retry_policy())
            .with_exit_when_empty(self.worker_exit_when_empty);
        if let Some(model) = &self.worker_model {
            config = config.with_model(model.clone());
        }
        if let Some(operation) = &self.worker_operation {
            config = config.with_operation(operation.clone());
        }
        config
    }

    pub fn store_retry(&self) -> StoreRetryConfig {
        StoreRetryConfig::default().with_max_retries(self.store_max_retries)
    }
}

fn parse<T>(var: &impl Fn(&str) -> Option<String>, name: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match var(name) {
        None => Ok(default),
        Some(raw) => raw
            .parse()
            .map_err(|e: T::Err| ConfigError::invalid(name, &raw, e.to_string())),
    }
}

fn parse_bool(var: &impl Fn(&str) -> Option<String>, name: &'static str, default: bool) -> Result<bool, ConfigError> {
    match var(name).as_deref().map(str::to_ascii_lowercase).as_deref() {
        None => Ok(default),
        Some("1" | "true" | "yes" | "on") => Ok(true),
        Some("0" | "false" | "no" | "off") => Ok(false),
        Some(other) => Err(ConfigError::invalid(name, other, "expected true or false")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> Result<AppConfig, ConfigError> {
        let vars: HashMap<String, String> = vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        AppConfig::from_lookup(|name| vars.get(name).cloned())
    }

    #[test]
    fn defaults_apply_when_nothing_is_set() {
        let cfg = config(&[]).unwrap();
        assert_eq!(cfg.bind.port(), 8080);
        assert_eq!(cfg.num_workers, 10);
        assert_eq!(cfg.poll_interval, Duration::from_secs(10));
        assert_eq!(cfg.max_items_per_batch, 50);
        assert_eq!(cfg.lease_ttl, Duration::from_secs(300));
        assert_eq!(cfg.max_attempts, 3);
        assert_eq!(cfg.provider_timeout, Duration::from_secs(120));
        assert!(cfg.database_url.is_none());
        assert!(cfg.admin_api_key.is_none());
        assert!(!cfg.worker_exit_when_empty);
    }

    #[test]
    fn values_are_parsed() {
        let cfg = config(&[
            ("PROMPTQ_BIND", "127.0.0.1:9000"),
            ("NUM_LLM_WORKERS", "0"),
            ("MAX_ATTEMPTS", "5"),
            ("WORKER_MODEL", "gpt-4o"),
            ("WORKER_EXIT_WHEN_EMPTY", "true"),
        ])
        .unwrap();

        assert_eq!(cfg.bind, "127.0.0.1:9000".parse().unwrap());
        assert_eq!(cfg.num_workers, 0);
        assert_eq!(cfg.retry_policy().max_attempts, 5);

        let worker = cfg.worker_config();
        assert_eq!(worker.model.as_deref(), Some("gpt-4o"));
        assert!(worker.exit_when_empty);
    }

    #[test]
    fn blank_values_fall_back_to_defaults() {
        let cfg = config(&[("DATABASE_URL", "  "), ("POLL_INTERVAL_SECS", "")]).unwrap();
        assert!(cfg.database_url.is_none());
        assert_eq!(cfg.poll_interval, Duration::from_secs(10));
    }

    #[test]
    fn invalid_numbers_are_rejected() {
        let err = config(&[("LEASE_TTL_SECS", "five minutes")]).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { var: "LEASE_TTL_SECS", .. }));

        assert!(config(&[("POLL_INTERVAL_SECS", "0")]).is_err());
        assert!(config(&[("MAX_ATTEMPTS", "0")]).is_err());
        assert!(config(&[("WORKER_EXIT_WHEN_EMPTY", "maybe")]).is_err());
    }

    #[test]
    fn debug_output_hides_secrets() {
        let cfg = config(&[("ADMIN_API_KEY", "super-secret"), ("DATABASE_URL", "postgres://u:pw@db/q")]).unwrap();
        let rendered = format!("{cfg:?}");
        assert!(!rendered.contains("super-secret"));
        assert!(!rendered.contains("pw@db"));
    }
}
