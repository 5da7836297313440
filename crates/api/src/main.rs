use std::sync::Arc;

use anyhow::Context;

use inferq_infra::{InferenceService, ServiceConfig};

fn main() -> anyhow::Result<()> {
    inferq_observability::init();

    let config = ServiceConfig::from_env()?;
    let grace = config.worker.shutdown_grace;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to build tokio runtime")?;
    let served = runtime.block_on(serve(config));

    // An execution abandoned at shutdown may still hold a blocking thread.
    runtime.shutdown_timeout(grace);
    served
}

async fn serve(config: ServiceConfig) -> anyhow::Result<()> {
    let bind_addr = config.bind_addr;

    let service = Arc::new(InferenceService::open(config)?);
    service.start_worker();

    let app = inferq_api::app::build_app(service.clone());

    let listener = tokio::net::TcpListener::bind(bind_addr)
        .await
        .with_context(|| format!("failed to bind {bind_addr}"))?;

    tracing::info!("listening on {}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    service.stop_worker().await;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "failed to install ctrl-c handler");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown signal received");
}
