//! Startup helpers for the scholar agent server.

use std::future::Future;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, anyhow};

use crate::chat::ScholarConfig;
use crate::server::{self, AppState};

/// Run the server (used by the `scholar-server` binary).
///
/// # Returns
/// `ExitCode::SUCCESS` on graceful shutdown, `1` on failure.
#[must_use]
pub fn run() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    tracing::info!("Starting scholar agent v{}", env!("CARGO_PKG_VERSION"));

    let config = match ScholarConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!("Invalid configuration: {e}");
            return ExitCode::from(1);
        }
    };
    tracing::info!(
        model = %config.llm.model,
        documents = %config.storage.documents_path.display(),
        checkpoints = %config.storage.checkpoint_path.display(),
        "configuration loaded"
    );

    let rt = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            tracing::error!("Failed to create runtime: {e}");
            return ExitCode::from(1);
        }
    };

    if let Err(e) = rt.block_on(serve(config, shutdown_signal())) {
        tracing::error!("Server error: {e:#}");
        return ExitCode::from(1);
    }

    ExitCode::SUCCESS
}

/// Initialize application state without starting the server.
///
/// # Errors
/// Returns an error if state creation fails.
pub async fn initialize(config: &ScholarConfig) -> anyhow::Result<Arc<AppState>> {
    AppState::new(config)
        .await
        .context("Failed to create state")
}

/// Build the state and run the server until `shutdown_signal` completes.
///
/// # Errors
/// Returns an error if state creation or the server fails.
pub async fn serve<F>(config: ScholarConfig, shutdown_signal: F) -> anyhow::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let state = initialize(&config).await?;
    server::run_server_with_shutdown(state, config.server.port, shutdown_signal)
        .await
        .map_err(|e| anyhow!(e))
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!("Failed to listen for shutdown signal: {e}");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown requested");
}
