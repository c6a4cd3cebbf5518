//! Shared application state injected into every Axum handler.

use std::sync::Arc;

use crate::auth::TokenVerifier;
use crate::cache::SessionCache;
use crate::config::Config;
use crate::entities::SqliteStore;
use crate::middleware::OriginPolicy;
use crate::services::completion::ModelCaller;

/// State shared across all HTTP handlers and middleware.
#[derive(Clone)]
pub struct AppState {
    /// Server configuration (env-derived).
    pub config: Arc<Config>,
    /// Authoritative per-owner message log.
    pub store: Arc<SqliteStore>,
    /// Encrypted recent-turn cache; may be disabled.
    pub cache: Arc<SessionCache>,
    /// Access Gate.
    pub gate: Arc<dyn TokenVerifier>,
    pub model: Arc<ModelCaller>,
    pub origins: Arc<OriginPolicy>,
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("config", &self.config)
            .field("store", &self.store)
            .field("cache", &self.cache)
            .field("origins", &self.origins)
            .finish_non_exhaustive()
    }
}
