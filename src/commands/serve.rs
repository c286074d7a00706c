//! Run the HTTP wire server.

use anyhow::{Context, Result};
use coldstore::Registry;
use coldstore::server::{AppState, router, serve};
use std::path::Path;
use tokio::net::TcpListener;
use tracing::{info, warn};

/// Serve every configured namespace until Ctrl+C.
pub async fn execute(
    config: Option<&Path>,
    host: Option<String>,
    port: Option<u16>,
    json_logs: bool,
) -> Result<()> {
    super::init_logging(json_logs);

    let mut settings = super::load_settings(config)?;
    if let Some(host) = host {
        settings.server.host = host;
    }
    if let Some(port) = port {
        settings.server.port = port;
    }
    super::check_settings(&settings)?;

    let addr = format!("{}:{}", settings.server.host, settings.server.port);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    info!(
        "coldstore listening on http://{} (locators from {}_<NAME>)",
        listener.local_addr()?,
        settings.env_prefix
    );

    let app = router(AppState::new(Registry::new(settings)));
    serve(listener, app, shutdown_signal())
        .await
        .context("Server error")?;

    info!("coldstore stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Ctrl+C handler unavailable, shutdown only by termination");
        std::future::pending::<()>().await;
    }
    info!("Shutting down...");
}
