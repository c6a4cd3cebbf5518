//! Server configuration, loaded from environment variables at startup.

use std::fmt;
use std::time::Duration;

use anyhow::{bail, Context};

/// Minimum length of the cache encryption key material.
pub const MIN_CACHE_KEY_LEN: usize = 32;

/// Runtime configuration for carechat-server.
///
/// Every field has a default so the server starts with only the identity
/// provider and model credentials set. [`Config::validate`] rejects the
/// combinations that must never run.
#[derive(Clone)]
pub struct Config {
    /// TCP address to bind (default: `"0.0.0.0:3000"`).
    pub bind_address: String,

    /// sqlx SQLite URL of the durable conversation store.
    pub database_url: String,

    /// `tracing` filter string, e.g. `"info"` or `"debug,tower_http=warn"`.
    pub log_level: String,

    /// When `true`, emit log records as newline-delimited JSON.
    pub log_json: bool,

    /// Serve Swagger UI and the OpenAPI document.
    pub enable_swagger: bool,

    pub identity: IdentityConfig,
    pub model: ModelConfig,
    pub context: ContextConfig,
    pub cache: CacheConfig,

    /// Durable record expiry in days; `0` keeps records forever.
    pub record_ttl_days: u32,

    /// Comma-separated browser origin allowlist.
    pub cors_allowed_origins: String,

    /// Prepended to every model call when set.
    pub system_prompt: Option<String>,
}

#[derive(Clone, Debug)]
pub struct IdentityConfig {
    pub region: String,
    pub pool_id: Option<String>,
    /// Explicit issuer; overrides the one derived from region and pool id.
    pub issuer: Option<String>,
    /// Claim consulted when `sub` is absent.
    pub username_claim: String,
}

impl IdentityConfig {
    /// Issuer that tokens must carry in `iss`, compared exactly.
    pub fn issuer_url(&self) -> Option<String> {
        if let Some(issuer) = &self.issuer {
            return Some(issuer.trim().to_owned());
        }
        self.pool_id
            .as_ref()
            .map(|pool| format!("https://cognito-idp.{}.amazonaws.com/{}", self.region, pool))
    }

    pub fn jwks_url(&self) -> Option<String> {
        self.issuer_url()
            .map(|issuer| format!("{}/.well-known/jwks.json", issuer.trim_end_matches('/')))
    }
}

#[derive(Clone)]
pub struct ModelConfig {
    pub base_url: String,
    pub api_key: Option<String>,
    pub primary_model: String,
    /// `None` disables the fallback attempt.
    pub fallback_model: Option<String>,
    pub primary_timeout: Duration,
    pub fallback_timeout: Duration,
}

#[derive(Clone, Debug)]
pub struct ContextConfig {
    pub max_messages: usize,
    pub max_message_chars: usize,
    pub max_attachments: usize,
}

#[derive(Clone)]
pub struct CacheConfig {
    pub enabled: bool,
    pub host: Option<String>,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub tls: bool,
    pub encryption_key: Option<String>,
    pub ttl_seconds: u64,
    pub connect_timeout: Duration,
    pub command_timeout: Duration,
    pub message_limit: usize,
}

impl CacheConfig {
    /// The key material, when present and long enough to be used.
    pub fn usable_key(&self) -> Option<&str> {
        self.encryption_key
            .as_deref()
            .filter(|key| key.chars().count() >= MIN_CACHE_KEY_LEN)
    }

    /// `redis://` (or `rediss://`) URL for the configured endpoint.
    pub fn redis_url(&self) -> anyhow::Result<Option<String>> {
        let Some(host) = self.host.as_deref() else {
            return Ok(None);
        };
        let scheme = if self.tls { "rediss" } else { "redis" };
        let mut url = reqwest::Url::parse(&format!("{scheme}://{host}:{}", self.port))
            .with_context(|| format!("invalid cache host {host:?}"))?;
        if let Some(user) = self.username.as_deref() {
            url.set_username(user)
                .map_err(|_| anyhow::anyhow!("cache username cannot be set on {host:?}"))?;
        }
        if let Some(password) = self.password.as_deref() {
            url.set_password(Some(password))
                .map_err(|_| anyhow::anyhow!("cache password cannot be set on {host:?}"))?;
        }
        Ok(Some(url.to_string()))
    }
}

impl Config {
    /// Build [`Config`] from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self {
            bind_address: env_or("CARECHAT_BIND", "0.0.0.0:3000"),
            database_url: env_or("CARECHAT_DATABASE_URL", "sqlite://carechat.db"),
            log_level: env_or("CARECHAT_LOG", "info"),
            log_json: env_flag("CARECHAT_LOG_JSON", false),
            enable_swagger: env_flag("CARECHAT_ENABLE_SWAGGER", false),
            identity: IdentityConfig {
                region: env_or("CARECHAT_IDP_REGION", "us-east-1"),
                pool_id: env_opt("CARECHAT_IDP_POOL_ID"),
                issuer: env_opt("CARECHAT_IDP_ISSUER"),
                username_claim: env_or("CARECHAT_IDP_USERNAME_CLAIM", "cognito:username"),
            },
            model: ModelConfig {
                base_url: env_or("CARECHAT_MODEL_API_URL", "https://api.x.ai/v1"),
                api_key: env_opt("CARECHAT_MODEL_API_KEY"),
                primary_model: env_or("CARECHAT_MODEL", "grok-4"),
                fallback_model: match std::env::var("CARECHAT_FALLBACK_MODEL") {
                    Ok(v) => Some(v).filter(|v| !v.trim().is_empty()),
                    Err(_) => Some("grok-3-mini".to_owned()),
                },
                primary_timeout: Duration::from_millis(parse_env("CARECHAT_MODEL_TIMEOUT_MS", 20_000)),
                fallback_timeout: Duration::from_millis(parse_env("CARECHAT_FALLBACK_TIMEOUT_MS", 10_000)),
            },
            context: ContextConfig {
                max_messages: parse_env("CARECHAT_CONTEXT_MESSAGES", 20),
                max_message_chars: parse_env("CARECHAT_MAX_MESSAGE_CHARS", 4_000),
                max_attachments: parse_env("CARECHAT_MAX_ATTACHMENTS", 4),
            },
            cache: CacheConfig {
                enabled: env_flag("CARECHAT_CACHE_ENABLED", true),
                host: env_opt("CARECHAT_CACHE_HOST"),
                port: parse_env("CARECHAT_CACHE_PORT", 6379),
                username: env_opt("CARECHAT_CACHE_USERNAME"),
                password: env_opt("CARECHAT_CACHE_PASSWORD"),
                tls: env_flag("CARECHAT_CACHE_TLS", false),
                encryption_key: env_opt("CARECHAT_CACHE_ENCRYPTION_KEY"),
                ttl_seconds: parse_env("CARECHAT_CACHE_TTL_SECONDS", 604_800),
                connect_timeout: Duration::from_millis(parse_env("CARECHAT_CACHE_CONNECT_TIMEOUT_MS", 300)),
                command_timeout: Duration::from_millis(parse_env("CARECHAT_CACHE_COMMAND_TIMEOUT_MS", 1_000)),
                message_limit: parse_env("CARECHAT_CACHE_MESSAGE_LIMIT", 20),
            },
            record_ttl_days: parse_env("CARECHAT_RECORD_TTL_DAYS", 0),
            cors_allowed_origins: env_or("CARECHAT_CORS_ORIGINS", ""),
            system_prompt: env_opt("CARECHAT_SYSTEM_PROMPT"),
        }
    }

    /// Reject configurations that cannot serve requests safely.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.identity.issuer_url().is_none() {
            bail!("identity provider is not configured; set CARECHAT_IDP_POOL_ID or CARECHAT_IDP_ISSUER");
        }
        if self.model.api_key.is_none() {
            bail!("model provider key is not configured; set CARECHAT_MODEL_API_KEY");
        }
        if self.context.max_messages == 0 {
            bail!("CARECHAT_CONTEXT_MESSAGES must be at least 1");
        }
        if self.context.max_message_chars == 0 {
            bail!("CARECHAT_MAX_MESSAGE_CHARS must be at least 1");
        }
        Ok(())
    }
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("bind_address", &self.bind_address)
            .field("database_url", &self.database_url)
            .field("log_level", &self.log_level)
            .field("log_json", &self.log_json)
            .field("enable_swagger", &self.enable_swagger)
            .field("identity", &self.identity)
            .field("model", &self.model)
            .field("context", &self.context)
            .field("cache", &self.cache)
            .field("record_ttl_days", &self.record_ttl_days)
            .field("cors_allowed_origins", &self.cors_allowed_origins)
            .field("system_prompt", &self.system_prompt.as_ref().map(|_| "<set>"))
            .finish()
    }
}

impl fmt::Debug for ModelConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelConfig")
            .field("base_url", &self.base_url)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("primary_model", &self.primary_model)
            .field("fallback_model", &self.fallback_model)
            .field("primary_timeout", &self.primary_timeout)
            .field("fallback_timeout", &self.fallback_timeout)
            .finish()
    }
}

impl fmt::Debug for CacheConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheConfig")
            .field("enabled", &self.enabled)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("tls", &self.tls)
            .field("encryption_key", &self.encryption_key.as_ref().map(|_| "<redacted>"))
            .field("ttl_seconds", &self.ttl_seconds)
            .field("connect_timeout", &self.connect_timeout)
            .field("command_timeout", &self.command_timeout)
            .field("message_limit", &self.message_limit)
            .finish()
    }
}

// ── private helpers ──────────────────────────────────────────────────────────

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_owned())
}

fn env_opt(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn env_flag(key: &str, default: bool) -> bool {
    std::env::var(key)
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
        .unwrap_or(default)
}

fn parse_env<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
pub(crate) fn test_config() -> Config {
    Config {
        bind_address: "127.0.0.1:0".into(),
        database_url: "sqlite::memory:".into(),
        log_level: "debug".into(),
        log_json: false,
        enable_swagger: false,
        identity: IdentityConfig {
            region: "us-east-1".into(),
            pool_id: Some("us-east-1_TEST".into()),
            issuer: None,
            username_claim: "cognito:username".into(),
        },
        model: ModelConfig {
            base_url: "https://model.example/v1".into(),
            api_key: Some("test-key".into()),
            primary_model: "primary".into(),
            fallback_model: Some("fallback".into()),
            primary_timeout: Duration::from_millis(200),
            fallback_timeout: Duration::from_millis(200),
        },
        context: ContextConfig { max_messages: 20, max_message_chars: 4_000, max_attachments: 4 },
        cache: CacheConfig {
            enabled: true,
            host: None,
            port: 6379,
            username: None,
            password: None,
            tls: false,
            encryption_key: Some("k".repeat(MIN_CACHE_KEY_LEN)),
            ttl_seconds: 604_800,
            connect_timeout: Duration::from_millis(300),
            command_timeout: Duration::from_millis(1_000),
            message_limit: 20,
        },
        record_ttl_days: 0,
        cors_allowed_origins: "https://app.example".into(),
        system_prompt: Some("You are a careful health assistant.".into()),
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn issuer_is_derived_from_region_and_pool() {
        let cfg = test_config();
        assert_eq!(
            cfg.identity.issuer_url().as_deref(),
            Some("https://cognito-idp.us-east-1.amazonaws.com/us-east-1_TEST")
        );
        assert_eq!(
            cfg.identity.jwks_url().as_deref(),
            Some("https://cognito-idp.us-east-1.amazonaws.com/us-east-1_TEST/.well-known/jwks.json")
        );
    }

    #[test]
    fn explicit_issuer_wins() {
        let mut cfg = test_config();
        cfg.identity.issuer = Some("https://id.example/".into());
        assert_eq!(cfg.identity.issuer_url().as_deref(), Some("https://id.example/"));
        assert_eq!(
            cfg.identity.jwks_url().as_deref(),
            Some("https://id.example/.well-known/jwks.json")
        );
    }

    #[test]
    fn short_cache_key_is_unusable() {
        let mut cfg = test_config();
        assert!(cfg.cache.usable_key().is_some());
        cfg.cache.encryption_key = Some("too-short".into());
        assert!(cfg.cache.usable_key().is_none());
    }

    #[test]
    fn redis_url_encodes_credentials_and_tls() {
        let mut cfg = test_config();
        assert!(cfg.cache.redis_url().unwrap().is_none());
        cfg.cache.host = Some("cache.internal".into());
        cfg.cache.tls = true;
        cfg.cache.username = Some("app".into());
        cfg.cache.password = Some("p@ss:word".into());
        let url = cfg.cache.redis_url().unwrap().unwrap();
        assert!(url.starts_with("rediss://app:"));
        assert!(url.ends_with("@cache.internal:6379"));
        assert!(!url.contains("p@ss:word"));
    }

    #[test]
    fn debug_output_redacts_secrets() {
        let rendered = format!("{:?}", test_config());
        assert!(!rendered.contains("test-key"));
        assert!(!rendered.contains(&"k".repeat(MIN_CACHE_KEY_LEN)));
    }

    #[test]
    fn validate_requires_identity_and_model_key() {
        assert!(test_config().validate().is_ok());
        let mut cfg = test_config();
        cfg.model.api_key = None;
        assert!(cfg.validate().is_err());
        let mut cfg = test_config();
        cfg.identity.pool_id = None;
        assert!(cfg.validate().is_err());
    }
}
