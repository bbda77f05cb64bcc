use std::sync::Arc;

use anyhow::Result;
use tokio::net::TcpListener;
use tokio::signal;

use notify_dispatch::config::Settings;
use notify_dispatch::engine::NotifyEngine;
use notify_dispatch::server::{create_app, AppState};
use notify_dispatch::telemetry::init_telemetry;

#[tokio::main]
async fn main() -> Result<()> {
    let settings = Settings::new()?;

    let _telemetry = init_telemetry(&settings.otel)?;
    tracing::info!("Configuration loaded");

    let engine = Arc::new(NotifyEngine::build(settings.clone()).await?);
    engine.start().await;

    let app = create_app(AppState::new(Arc::clone(&engine)));

    let addr = settings.server_addr();
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!("Ops server listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal_handler())
        .await?;

    engine.shutdown().await;

    tracing::info!("Shutdown complete");
    Ok(())
}

async fn shutdown_signal_handler() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install terminate handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            tracing::info!("Received terminate signal, initiating graceful shutdown");
        }
    }
}
