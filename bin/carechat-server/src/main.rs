//! carechat-server – entry point.
//!
//! Startup order:
//! 1. Parse configuration from environment variables.
//! 2. Initialise structured tracing (JSON in production, pretty in dev).
//! 3. Validate configuration; refuse to start when it is unsafe.
//! 4. Open the SQLite database and run pending migrations.
//! 5. Build the Access Gate, Session Cache and Model Caller.
//! 6. Start the expired-record purge task when a record TTL is configured.
//! 7. Build the Axum router and serve with graceful shutdown.

mod auth;
mod cache;
mod config;
mod entities;
mod error;
mod middleware;
mod routes;
mod schemas;
mod services;
mod state;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::auth::JwksVerifier;
use crate::cache::{CacheHealth, SessionCache};
use crate::config::Config;
use crate::entities::{MessageStore, SqliteStore};
use crate::middleware::OriginPolicy;
use crate::services::completion::ModelCaller;
use crate::state::AppState;

const PURGE_INTERVAL: Duration = Duration::from_secs(3_600);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── 1. Configuration ───────────────────────────────────────────────────────
    let cfg = Config::from_env();

    // ── 2. Tracing ─────────────────────────────────────────────────────────────
    let env_filter = match tracing_subscriber::EnvFilter::try_from_default_env() {
        Ok(f) => f,
        Err(_) => match cfg.log_level.parse::<tracing_subscriber::EnvFilter>() {
            Ok(f) => f,
            Err(e) => {
                eprintln!(
                    "WARN: CARECHAT_LOG='{}' is not a valid tracing filter ({}); \
                     falling back to 'info'",
                    cfg.log_level, e
                );
                tracing_subscriber::EnvFilter::new("info")
            }
        },
    };

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(true)
        .with_thread_ids(true);

    if cfg.log_json {
        subscriber.json().init();
    } else {
        subscriber.init();
    }

    info!(version = env!("CARGO_PKG_VERSION"), "carechat-server starting");

    // ── 3. Validation ──────────────────────────────────────────────────────────
    cfg.validate()?;

    // ── 4. Database ────────────────────────────────────────────────────────────
    let store = Arc::new(SqliteStore::connect(&cfg.database_url).await?);
    info!(database_url = %cfg.database_url, "database ready");

    // ── 5. Pipeline components ─────────────────────────────────────────────────
    let gate = JwksVerifier::from_config(&cfg.identity)?;
    let model = ModelCaller::from_config(&cfg.model)?;
    let cache = SessionCache::from_config(&cfg.cache, Arc::new(CacheHealth::default()));
    let origins = OriginPolicy::from_list(&cfg.cors_allowed_origins);
    info!(?cache, "session cache configured");

    let state = Arc::new(AppState {
        config: Arc::new(cfg.clone()),
        store: Arc::clone(&store),
        cache: Arc::new(cache),
        gate: Arc::new(gate),
        model: Arc::new(model),
        origins: Arc::new(origins),
    });

    // ── 6. Expired-record purge ────────────────────────────────────────────────
    if cfg.record_ttl_days > 0 {
        let purge_store = Arc::clone(&store);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(PURGE_INTERVAL);
            loop {
                ticker.tick().await;
                match purge_store.purge_expired().await {
                    Ok(0) => {}
                    Ok(n) => info!(purged = n, "expired records removed"),
                    Err(e) => warn!(error = %e, "expired-record purge failed"),
                }
            }
        });
    }

    // ── 7. HTTP server with graceful shutdown ──────────────────────────────────
    let app = routes::build(Arc::clone(&state));
    let addr: SocketAddr = cfg.bind_address.parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "HTTP server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    store.close().await;
    info!("carechat-server stopped");
    Ok(())
}

/// Returns a future that resolves when SIGINT (Ctrl-C) or SIGTERM is received.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to install CTRL+C signal handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut s) => {
                s.recv().await;
            }
            Err(e) => warn!(error = %e, "failed to install SIGTERM handler"),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }

    info!("shutdown signal received; starting graceful shutdown");
}
