//! Tenantry authplane HTTP service entry point.
//!
//! # Purpose
//! Wires configuration, observability and storage, brings the authorization engine up to
//! date, then serves the API and the metrics endpoint until shutdown.
//!
//! # Notes
//! The `build_state` helper keeps wiring testable and minimizes main setup logic.
use anyhow::Context;
use authplane::app::{AppState, build_router, build_state_with_store};
use authplane::config::{AuthplaneConfig, StorageBackend};
use authplane::observability;
use authplane::store::DirectoryStore;
use authplane::store::memory::InMemoryStore;
use authplane::store::postgres::PostgresStore;
use std::future::Future;
use std::sync::Arc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AuthplaneConfig::from_env_or_yaml().context("authplane config")?;
    run_with_shutdown(config, async {
        let _ = tokio::signal::ctrl_c().await;
    })
    .await
}

async fn run_with_shutdown<F>(config: AuthplaneConfig, shutdown: F) -> anyhow::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let metrics_handle = observability::init_observability("tenantry-authplane")?;
    let state = build_state(&config).await?;
    tracing::info!(
        backend = state.store.backend_name(),
        durable = state.store.is_durable(),
        "authplane state ready"
    );

    let (metrics_stop, metrics_stopped) = tokio::sync::oneshot::channel::<()>();
    let metrics_addr = config.metrics_bind;
    let metrics_task = tokio::spawn(async move {
        let stopped = async {
            let _ = metrics_stopped.await;
        };
        if let Err(err) = observability::serve_metrics(metrics_handle, metrics_addr, stopped).await
        {
            tracing::warn!(error = %err, "metrics listener failed");
        }
    });

    let app = build_router(state);
    let addr = config.bind_addr;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("bind {addr}"))?;
    tracing::info!(%addr, "authplane listening");
    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown)
        .await
        .context("serve api")?;

    let _ = metrics_stop.send(());
    let _ = metrics_task.await;
    tracing::info!("authplane stopped");
    Ok(())
}

async fn build_state(config: &AuthplaneConfig) -> anyhow::Result<AppState> {
    match config.storage {
        StorageBackend::Memory => {
            build_state_with_store(config, Arc::new(InMemoryStore::new())).await
        }
        StorageBackend::Postgres => {
            let pg = config
                .postgres
                .as_ref()
                .context("postgres configuration missing")?;
            let store = PostgresStore::connect(pg)
                .await
                .context("connect postgres")?;
            build_state_with_store(config, Arc::new(store)).await
        }
    }
}
