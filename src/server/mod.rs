//! HTTP API.

pub mod error;
mod form;
pub mod handlers;
pub mod state;

pub use error::{ApiError, ErrorResponse};
pub use state::AppState;

use crate::config::Config;
use anyhow::{Context, Result};
use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::Router;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

pub fn build_router(state: Arc<AppState>) -> Router {
    let body_limit = state.config.body_limit();

    Router::new()
        .route("/api/health", get(handlers::health))
        .route("/api/models", get(handlers::list_models))
        .route("/api/warmup", post(handlers::warmup))
        .route("/api/remove-background", post(handlers::remove_background))
        .route("/api/remove-background-file", post(handlers::remove_background_file))
        .route("/api/batch-process", post(handlers::batch_process))
        .route("/api/batch-remove", post(handlers::batch_process))
        .route("/api/download/{id}", get(handlers::download))
        .route("/api/mask/{id}", get(handlers::mask))
        .route("/api/preview/{id}", get(handlers::preview))
        .route("/api/edit-mask", post(handlers::edit_mask))
        .route("/api/refine-mask", post(handlers::refine_mask))
        .route("/api/cleanup", post(handlers::cleanup))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Delete expired results on a fixed interval until the process exits
pub fn spawn_cleanup_task(state: Arc<AppState>) -> Option<tokio::task::JoinHandle<()>> {
    let period = state.config.cleanup_interval()?;
    let ttl = state.config.result_ttl();

    Some(tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        // The first tick completes immediately
        interval.tick().await;
        loop {
            interval.tick().await;
            let state = Arc::clone(&state);
            match tokio::task::spawn_blocking(move || state.store.cleanup(ttl)).await {
                Ok(Ok(removed)) => tracing::debug!(removed, "Periodic cleanup finished"),
                Ok(Err(e)) => tracing::warn!(error = %format!("{e:#}"), "Periodic cleanup failed"),
                Err(e) => tracing::warn!(error = %e, "Periodic cleanup task panicked"),
            }
        }
    }))
}

/// Load models, bind and serve until Ctrl+C or SIGTERM
pub async fn serve(config: Config) -> Result<()> {
    let state = Arc::new(AppState::new(config)?);

    if !state.config.preload.is_empty() {
        let preload_state = Arc::clone(&state);
        tokio::task::spawn_blocking(move || {
            for name in &preload_state.config.preload {
                match preload_state.registry().get(name) {
                    Ok(_) => tracing::info!(model = %name, "Model preloaded"),
                    Err(e) => tracing::warn!(model = %name, error = %e, "Failed to preload model"),
                }
            }
        })
        .await
        .context("Model preloading panicked")?;
    }

    let cleanup = spawn_cleanup_task(Arc::clone(&state));

    let addr = state.config.bind_address();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;

    tracing::info!(
        addr = %addr,
        models_dir = %state.registry().models_dir().display(),
        results_dir = %state.store.dir().display(),
        default_model = %state.config.default_model,
        device = state.config.device(),
        max_file_mb = state.config.max_file_size / 1024 / 1024,
        extensions = %state.limits.allowed_extensions.join(","),
        "Server ready and accepting connections"
    );

    axum::serve(listener, build_router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    if let Some(handle) = cleanup {
        handle.abort();
    }
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
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
                tracing::error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received Ctrl+C signal"),
        _ = terminate => tracing::info!("Received terminate signal"),
    }

    tracing::info!("Shutting down gracefully");
}
