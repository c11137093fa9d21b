//! kensa - FHIR structural validation service entry point

use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use kensa_server::{AppState, build_router, config::ServerConfig};

#[tokio::main]
async fn main() {
    let loaded = ServerConfig::load(
        std::path::Path::new("config.yaml")
            .exists()
            .then_some("config.yaml"),
    );
    let (level, json) = loaded
        .as_ref()
        .map(|c| (c.log.level.clone(), c.log.json))
        .unwrap_or_else(|_| ("info".to_string(), false));

    // Initialize logging
    tracing_subscriber::registry()
        .with(json.then(|| tracing_subscriber::fmt::layer().json()))
        .with((!json).then(tracing_subscriber::fmt::layer))
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&level)),
        )
        .init();

    tracing::info!("Starting kensa validation server...");

    let config = loaded.unwrap_or_else(|e| {
        tracing::warn!("Failed to load config, using defaults: {}", e);
        ServerConfig::default()
    });

    let state = AppState::from_config(config.clone()).unwrap_or_else(|e| {
        tracing::error!("Failed to load structure definitions: {}", e);
        std::process::exit(1);
    });

    let revisions: Vec<String> = state
        .registry
        .revisions()
        .iter()
        .map(|r| format!("{} ({} types)", r, state.registry.type_names(*r).len()))
        .collect();
    tracing::info!(
        "Revisions: {}; default {}",
        revisions.join(", "),
        config.validation.revision
    );

    let app = build_router(Arc::new(state));

    let bind_addr = config.bind_addr();
    let listener = match tokio::net::TcpListener::bind(&bind_addr).await {
        Ok(l) => l,
        Err(e) => {
            tracing::error!("Failed to bind to {}: {}", bind_addr, e);
            std::process::exit(1);
        }
    };

    tracing::info!("Listening on http://{}", bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .unwrap_or_else(|e| {
            tracing::error!("Server error: {}", e);
        });

    tracing::info!("Server shut down gracefully");
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
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
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received Ctrl+C, shutting down..."),
        _ = terminate => tracing::info!("Received SIGTERM, shutting down..."),
    }
}
