//! `vigil-api` binary entrypoint.
//!
//! Loads configuration from environment variables, connects the
//! repository, starts the liveness sweeper, and serves the HTTP API.

#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;

use vigil_api::config::Config;
use vigil_api::server::{AppState, router};
use vigil_core::observability::init_logging;
use vigil_ops::events::TracingEventSink;
use vigil_ops::manager::LivenessManager;
use vigil_ops::repository::{Repository, memory::MemoryRepository, mongo::MongoRepository};
use vigil_ops::service::OperationService;

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %err, "failed to listen for shutdown signal");
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env()?;
    init_logging(config.log_format);

    let repo: Arc<dyn Repository> = if config.memory {
        tracing::warn!("VIGIL_MEMORY is set; using the in-memory repository (dev only)");
        Arc::new(MemoryRepository::new())
    } else {
        let mongo_url = config
            .mongo_url
            .as_deref()
            .context("MONGO_URL is required")?;
        let repo = MongoRepository::connect(mongo_url, &config.database)
            .await
            .context("failed to connect to MongoDB")?;
        tracing::info!(database = %config.database, "connected to MongoDB");
        Arc::new(repo)
    };

    let manager = Arc::new(LivenessManager::new(Arc::clone(&repo)));
    let service =
        OperationService::new(repo).with_event_sink(Arc::new(TracingEventSink));
    service.attach_manager(&manager);

    let cancel = CancellationToken::new();
    manager.start(cancel.clone());

    let state = AppState::new(service);
    let app = router(state, &config.allowed_origins);

    // Optional admin listener serving the same router.
    if let Some(admin_addr) = config.admin_listen_addr()? {
        let admin_app = app.clone();
        let admin_listener = tokio::net::TcpListener::bind(admin_addr)
            .await
            .with_context(|| format!("failed to bind admin listener on {admin_addr}"))?;
        tracing::info!(addr = %admin_addr, "admin listener bound");

        tokio::spawn(async move {
            if let Err(err) = axum::serve(admin_listener, admin_app).await {
                tracing::error!(error = %err, "admin server error");
            }
        });
    }

    let addr = config.listen_addr()?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    tracing::info!(addr = %addr, "listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    // Stop the sweeper and wait for the loop to exit.
    cancel.cancel();
    manager.wait().await;

    Ok(())
}
