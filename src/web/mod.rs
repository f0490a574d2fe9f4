//! HTTP server: routing, identity resolution, request handlers.

pub(crate) mod auth;
mod router;
mod routes;
mod state;

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::info;

use crate::base_system::config::Config;
use crate::jobs::orchestrator::Orchestrator;
use crate::tts::{EdgeEngineFactory, EngineFactory};
use auth::IdentityResolver;
use state::AppState;

pub fn run(config: Config) -> Result<()> {
    let bind: SocketAddr = config
        .bind_addr
        .parse()
        .with_context(|| format!("invalid bind_addr {:?}", config.bind_addr))?;

    let engines: Arc<dyn EngineFactory> = Arc::new(EdgeEngineFactory);
    let orchestrator = Arc::new(Orchestrator::new(config.clone(), engines.clone())?);
    let identity = Arc::new(IdentityResolver::new(
        Some(config.identity_endpoint.clone()).filter(|e| !e.is_empty()),
    ));

    let state = AppState {
        config: Arc::new(config),
        jobs: orchestrator.jobs(),
        orchestrator,
        identity,
        engines,
    };

    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    rt.block_on(run_async(bind, state))
}

async fn run_async(bind: SocketAddr, state: AppState) -> Result<()> {
    let app = router::build_router(state);

    let listener = tokio::net::TcpListener::bind(bind).await?;
    info!(target: "web", "listening on http://{bind}/");
    println!("Narrio listening on http://{bind}/");
    println!("Press Ctrl+C to stop.");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<std::net::SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
