//! WebSocket server that greets every message and sends heartbeats.
//!
//! Run with: cargo run -p greeter-server
//!
//! Then connect a WebSocket client to ws://localhost:8765/.

mod config;

use anyhow::Context;
use greeter_transport::{WsState, create_ws_router};
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::ServerConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Loads `.env` too, so RUST_LOG set there reaches the filter below.
    let config = ServerConfig::from_env().context("invalid configuration")?;

    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    tracing::info!(
        interval = ?config.session.heartbeat_interval,
        message = %config.session.heartbeat_message,
        "Loaded session configuration"
    );

    let shutdown = CancellationToken::new();
    let state = WsState::new(config.session, shutdown.clone()).context("invalid configuration")?;
    let app = create_ws_router(state).layer(TraceLayer::new_for_http());

    let listener = tokio::net::TcpListener::bind((config.host.as_str(), config.port))
        .await
        .with_context(|| format!("failed to bind {}:{}", config.host, config.port))?;
    tracing::info!("Server listening on ws://{}", listener.local_addr()?);

    // Upgraded sockets stay open until their session is cancelled.
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown))
        .await
        .context("server error")?;

    tracing::info!("Shutdown complete");
    Ok(())
}

/// Wait for SIGINT or SIGTERM, then cancel every session.
async fn shutdown_signal(shutdown: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl-C: {e}");
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
                tracing::error!("Failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }

    tracing::info!("Shutdown signal received, closing sessions");
    shutdown.cancel();
}
