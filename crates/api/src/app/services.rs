use std::sync::Arc;

use anyhow::Context;
use tracing::{info, warn};

use promptq_auth::{ApiKeyHasher, Authenticator};
use promptq_infra::jobs::{InMemoryJobStore, JobService, JobStore, PostgresJobStore, RetryingJobStore, WorkerMonitor};
use promptq_infra::{AppConfig, Catalog};
use promptq_llm::{ApiKeys, Dispatcher, ProviderRegistry};

/// Everything the handlers and the worker pool share.
///
/// Built once at startup; every field is immutable or internally
/// synchronized.
#[derive(Clone)]
pub struct AppServices {
    pub jobs: JobService,
    pub dispatcher: Arc<Dispatcher>,
    pub authenticator: Arc<Authenticator>,
    /// Set when this process runs a worker pool.
    pub workers: Option<WorkerMonitor>,
}

impl AppServices {
    pub fn new(store: Arc<dyn JobStore>, dispatcher: Arc<Dispatcher>, authenticator: Arc<Authenticator>) -> Self {
        Self {
            jobs: JobService::new(store, dispatcher.clone()),
            dispatcher,
            authenticator,
            workers: None,
        }
    }

    pub fn store(&self) -> Arc<dyn JobStore> {
        self.jobs.store().clone()
    }
}

/// Postgres when `DATABASE_URL` is set, otherwise the in-memory store.
/// Either way, transient failures are retried a bounded number of times.
pub async fn build_store(config: &AppConfig) -> anyhow::Result<Arc<dyn JobStore>> {
    match &config.database_url {
        Some(url) => {
            let store = PostgresJobStore::connect(url, config.database_max_connections)
                .await
                .context("failed to connect to Postgres")?;
            info!("using Postgres job store");
            Ok(Arc::new(RetryingJobStore::new(store, config.store_retry())))
        }
        None => {
            warn!("DATABASE_URL not set; jobs are kept in memory and lost on restart");
            Ok(Arc::new(RetryingJobStore::new(InMemoryJobStore::new(), config.store_retry())))
        }
    }
}

pub fn build_dispatcher(config: &AppConfig, catalog: &Catalog) -> anyhow::Result<Arc<Dispatcher>> {
    let http = reqwest::Client::builder()
        .timeout(config.provider_timeout)
        .build()
        .context("failed to build HTTP client")?;
    let keys = ApiKeys::collect(&catalog.models, |name| std::env::var(name).ok());
    info!(
        models = catalog.models.len(),
        prompts = catalog.prompts.len(),
        api_keys = keys.len(),
        "catalog loaded"
    );

    Ok(Arc::new(Dispatcher::new(
        Arc::new(catalog.models.clone()),
        Arc::new(catalog.prompts.clone()),
        Arc::new(ProviderRegistry::with_defaults(http)),
        Arc::new(keys),
        config.provider_timeout,
    )))
}

/// The admin key is hashed once here; requests are verified against the
/// hash, never the plain key.
pub fn build_authenticator(config: &AppConfig, catalog: &Catalog) -> anyhow::Result<Arc<Authenticator>> {
    let hasher = ApiKeyHasher::new(config.api_key_pepper.clone());
    let admin_key_hash = match &config.admin_api_key {
        Some(key) => Some(hasher.hash(key).context("failed to hash ADMIN_API_KEY")?),
        None => {
            warn!("ADMIN_API_KEY not set; admin access is disabled");
            None
        }
    };
    Ok(Arc::new(Authenticator::new(hasher, admin_key_hash, catalog.clients.clone())))
}

pub async fn build_services(config: &AppConfig, catalog: &Catalog) -> anyhow::Result<AppServices> {
    let store = build_store(config).await?;
    let dispatcher = build_dispatcher(config, catalog)?;
    let authenticator = build_authenticator(config, catalog)?;
    Ok(AppServices::new(store, dispatcher, authenticator))
}
