pub mod api;
pub mod auth;
pub mod config;
pub mod digest;
pub mod download;
pub mod error;
pub mod fileops;
pub mod kv;
pub mod lock;
pub mod models;
pub mod paths;
pub mod sessions;
pub mod sweeper;
pub mod upload;

use api::{create_api_router, AppState};
use config::Config;
use download::DownloadEngine;
use lock::LockManager;
use paths::PathResolver;
use sessions::SessionStore;
use std::io::IsTerminal;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use upload::UploadEngine;
use utoipa_rapidoc::RapiDoc;

/// Initialize the tracing subscriber for logging
/// Uses journald when running as a service (no terminal), fmt when running interactively
pub fn init_tracing() {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "depo_file_repo=info,tower_http=warn".into());

    if std::io::stdout().is_terminal() {
        tracing_subscriber::fmt().with_env_filter(env_filter).init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_journald::layer().expect("Failed to connect to journald"))
            .init();
    }
}

/// Worker thread count: available cores minus the configured surplus,
/// floored at one
pub fn worker_count(config: &Config) -> usize {
    let cores = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    cores.saturating_sub(config.server.surplus_processors).max(1)
}

/// Build the shared application state from a validated configuration
pub async fn build_state(config: Config) -> Result<Arc<AppState>, Box<dyn std::error::Error>> {
    let resolver = PathResolver::new(&config);
    let kv = kv::connect(&config).await?;
    let sessions = Arc::new(SessionStore::new(&config, kv.clone(), resolver.clone()));
    let locks = Arc::new(LockManager::new(&config, kv.clone()));
    let uploads = UploadEngine::new(&config, resolver.clone(), sessions.clone(), locks.clone())?;
    let downloads = DownloadEngine::new(resolver.clone(), config.storage.hash_type);

    Ok(Arc::new(AppState {
        config,
        resolver,
        kv,
        sessions,
        locks,
        uploads,
        downloads,
    }))
}

/// Build the full router, API plus documentation routes
pub fn build_router(state: Arc<AppState>) -> axum::Router {
    // one chunk plus multipart framing headroom
    let body_limit = (state.config.storage.chunk_size.as_u64() as usize).saturating_mul(2);
    let (api_router, api_doc) = create_api_router(state).split_for_parts();

    let doc_routes = axum::Router::new()
        .merge(RapiDoc::with_openapi("/api-docs/openapi.json", api_doc).path("/api-docs"));

    axum::Router::new()
        .merge(api_router)
        .merge(doc_routes)
        .layer(axum::extract::DefaultBodyLimit::max(body_limit))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

/// Run the deposition file service
pub async fn run_service(config: Config) -> Result<(), Box<dyn std::error::Error>> {
    tracing::info!("depo-file-repo version {}", env!("CARGO_PKG_VERSION"));
    tracing::info!("Starting server with config: {:?}", config);

    sweeper::ensure_directories(&config).await?;

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let state = build_state(config).await?;

    sweeper::spawn_sweep_task(
        state.sessions.clone(),
        state.locks.clone(),
        sweeper::DEFAULT_SWEEP_INTERVAL_SECS,
    );

    let app = build_router(state.clone());

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on {}", addr);
    tracing::info!("API documentation available at http://{}/api-docs", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(state.clone()))
        .await?;

    Ok(())
}

/// Wait for a shutdown signal, then sweep sessions and lock records
async fn shutdown_signal(state: Arc<AppState>) {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received, sweeping sessions and locks");
    sweeper::shutdown_sweep(&state.sessions, &state.locks).await;
}
