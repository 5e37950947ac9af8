//! `QVault` server entry point.
//!
//! Bootstraps the storage backend, collection store, signing-key resolver,
//! and quorum authorizer, then starts the Axum HTTP server with graceful
//! shutdown.

use std::sync::Arc;

use anyhow::Context;
use axum::Router;
use chrono::Utc;
use qvault_core::{
    CollectionStore, QuorumAuthorizer, ServerId, SigkeyRecord, SigkeyResolver, StaticSigkeySource,
    TokenVerifier,
};
use qvault_server::config::ServerConfig;
use qvault_server::routes;
use qvault_server::state::AppState;
use qvault_storage::MemoryStore;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = ServerConfig::from_env();

    // Initialize structured logging.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.log_level)),
        )
        .json()
        .init();

    info!(
        ac_servers = config.ac_servers.len(),
        ac_required = ?config.ac_required,
        "QVault starting"
    );
    if config.ac_servers.is_empty() {
        warn!("no AC servers configured; every authorization will fail");
    }

    let state = build_app_state(&config).await?;
    let app = build_router(Arc::new(state));

    let listener = TcpListener::bind(config.bind_addr)
        .await
        .with_context(|| format!("failed to bind to {}", config.bind_addr))?;

    info!(addr = %config.bind_addr, "QVault server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    info!("QVault server stopped");
    Ok(())
}

/// Build the shared application state from configuration.
async fn build_app_state(config: &ServerConfig) -> anyhow::Result<AppState> {
    info!("using in-memory storage (data will not persist)");
    let store = Arc::new(MemoryStore::new());

    // Bootstrap the key source from configuration. Keys are stored as given;
    // a malformed key fails the tokens that depend on it, not startup.
    let source = Arc::new(StaticSigkeySource::new());
    for (server, key) in &config.ac_keys {
        source
            .insert(SigkeyRecord {
                server: ServerId::new(server.clone()),
                public_key: key.clone(),
                valid_from: Utc::now(),
                valid_until: None,
            })
            .await;
    }
    info!(keys = config.ac_keys.len(), "verification keys bootstrapped");

    let resolver = Arc::new(SigkeyResolver::new(source));
    let verifier = TokenVerifier::with_timeout(resolver, config.verify_timeout);
    let authorizer = QuorumAuthorizer::new(Arc::new(verifier));

    let collections = CollectionStore::open(store)
        .await
        .context("failed to open collection store")?;

    Ok(AppState {
        collections,
        authorizer,
        ac_servers: config.ac_servers.iter().map(ServerId::new).collect(),
        ac_required: config.ac_required,
    })
}

/// Build the Axum router with all routes and middleware.
fn build_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([
            axum::http::Method::GET,
            axum::http::Method::POST,
            axum::http::Method::DELETE,
        ])
        .allow_headers([
            axum::http::header::CONTENT_TYPE,
            axum::http::HeaderName::from_static(routes::TOKENS_HEADER),
        ]);

    routes::router()
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Wait for SIGINT or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.ok();
    };

    #[cfg(unix)]
    let terminate = async {
        if let Ok(mut sig) =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
        {
            sig.recv().await;
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    info!("shutdown signal received, stopping server");
}
