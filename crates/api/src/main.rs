use std::sync::Arc;

use anyhow::Context;
use tokio_util::sync::CancellationToken;

use promptq_api::app::{build_app, services};
use promptq_infra::jobs::WorkerPool;
use promptq_infra::{AppConfig, Catalog};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    promptq_observability::init();

    let config = AppConfig::from_env().context("invalid configuration")?;
    tracing::info!(bind = %config.bind, workers = config.num_workers, "loaded configuration");

    let catalog = match &config.catalog_path {
        Some(path) => Catalog::load(path)?,
        None => {
            tracing::warn!("PROMPTQ_CATALOG not set; using the built-in test catalog");
            Catalog::builtin()?
        }
    };

    let mut services = services::build_services(&config, &catalog).await?;

    let cancel = CancellationToken::new();
    let workers = (config.num_workers > 0).then(|| {
        let pool = WorkerPool::spawn(
            config.worker_config(),
            config.num_workers,
            services.store(),
            services.dispatcher.clone(),
            cancel.child_token(),
        );
        services.workers = Some(pool.monitor());
        let drain = config.worker_exit_when_empty;
        let cancel = cancel.clone();
        tokio::spawn(async move {
            pool.join().await;
            if drain {
                tracing::info!("queue drained, stopping");
                cancel.cancel();
            }
        })
    });

    let app = build_app(Arc::new(services));
    let listener = tokio::net::TcpListener::bind(config.bind)
        .await
        .with_context(|| format!("failed to bind {}", config.bind))?;
    tracing::info!(addr = %listener.local_addr()?, "listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(cancel.clone()))
        .await
        .context("server error")?;

    // Workers release unstarted claims on cancellation.
    cancel.cancel();
    if let Some(workers) = workers {
        workers.await.context("worker pool task failed")?;
    }

    tracing::info!("graceful shutdown complete");
    Ok(())
}

/// Resolves on SIGINT/SIGTERM, or when the worker pool asks the process to
/// stop (drain mode).
async fn shutdown_signal(cancel: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to install Ctrl-C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => tracing::info!("received SIGINT, starting graceful shutdown"),
        () = terminate => tracing::info!("received SIGTERM, starting graceful shutdown"),
        () = cancel.cancelled() => tracing::info!("shutdown requested"),
    }
}
