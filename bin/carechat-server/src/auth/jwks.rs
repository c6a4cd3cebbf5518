//! JWKS-backed [`TokenVerifier`].
//!
//! Keys are fetched from the issuer's well-known key set and cached for
//! [`KEY_SET_TTL`]. A token naming an unknown `kid` forces one early refresh,
//! at most once per [`FORCED_REFRESH_INTERVAL`], so key rotation is picked up
//! without letting garbage `kid`s hammer the provider.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use jsonwebtoken::{Algorithm, DecodingKey, Validation};
use serde::Deserialize;
use serde_json::{Map, Value};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use super::{AuthError, Caller, TokenVerifier};
use crate::config::IdentityConfig;

pub const KEY_SET_TTL: Duration = Duration::from_secs(300);
pub const FORCED_REFRESH_INTERVAL: Duration = Duration::from_secs(30);
const FETCH_TIMEOUT: Duration = Duration::from_secs(5);

/// One entry of a JSON Web Key Set.
#[derive(Clone, Debug, Deserialize)]
pub struct Jwk {
    pub kid: String,
    #[serde(default)]
    pub kty: String,
    #[serde(default)]
    pub alg: Option<String>,
    #[serde(default)]
    pub n: Option<String>,
    #[serde(default)]
    pub e: Option<String>,
    #[serde(default)]
    pub k: Option<String>,
}

#[derive(Deserialize)]
struct JwkSet {
    keys: Vec<Jwk>,
}

enum KeySource {
    Http { url: String, client: reqwest::Client },
    #[cfg(test)]
    Static(Vec<Jwk>),
}

impl KeySource {
    fn fetches(&self) -> bool {
        match self {
            KeySource::Http { .. } => true,
            #[cfg(test)]
            KeySource::Static(_) => false,
        }
    }
}

struct CachedKeys {
    keys: HashMap<String, (DecodingKey, Algorithm)>,
    expires_at: Option<Instant>,
}

pub struct JwksVerifier {
    issuer: String,
    username_claim: String,
    source: KeySource,
    cache: RwLock<Option<CachedKeys>>,
    last_forced: Mutex<Option<Instant>>,
}

impl JwksVerifier {
    /// Verifier for the configured identity provider's published key set.
    pub fn from_config(cfg: &IdentityConfig) -> anyhow::Result<Self> {
        let (Some(issuer), Some(url)) = (cfg.issuer_url(), cfg.jwks_url()) else {
            anyhow::bail!("identity provider issuer is not configured");
        };
        let client = reqwest::Client::builder().timeout(FETCH_TIMEOUT).build()?;
        info!(%issuer, "access gate verifying tokens against published key set");
        Ok(Self::with_source(issuer, cfg.username_claim.clone(), KeySource::Http { url, client }))
    }

    /// Verifier over a fixed key set; never fetches. Symmetric keys are allowed.
    #[cfg(test)]
    pub(crate) fn with_static_keys(issuer: impl Into<String>, username_claim: impl Into<String>, keys: Vec<Jwk>) -> Self {
        Self::with_source(issuer.into(), username_claim.into(), KeySource::Static(keys))
    }

    fn with_source(issuer: String, username_claim: String, source: KeySource) -> Self {
        Self {
            issuer,
            username_claim,
            source,
            cache: RwLock::new(None),
            last_forced: Mutex::new(None),
        }
    }

    async fn key_for(&self, kid: &str) -> Result<(DecodingKey, Algorithm), AuthError> {
        if let Some(found) = self.lookup(kid, false).await? {
            return Ok(found);
        }
        if self.may_force_refresh().await {
            debug!(kid, "unknown signing key; refreshing key set");
            if let Some(found) = self.lookup(kid, true).await? {
                return Ok(found);
            }
        }
        Err(AuthError::UnknownKey(kid.to_owned()))
    }

    async fn lookup(&self, kid: &str, force: bool) -> Result<Option<(DecodingKey, Algorithm)>, AuthError> {
        self.refresh(force).await?;
        let guard = self.cache.read().await;
        Ok(guard.as_ref().and_then(|cached| cached.keys.get(kid).cloned()))
    }

    async fn may_force_refresh(&self) -> bool {
        if !self.source.fetches() {
            return false;
        }
        let mut last = self.last_forced.lock().await;
        let now = Instant::now();
        if last.is_some_and(|at| now.duration_since(at) < FORCED_REFRESH_INTERVAL) {
            return false;
        }
        *last = Some(now);
        true
    }

    async fn refresh(&self, force: bool) -> Result<(), AuthError> {
        let stale = {
            let guard = self.cache.read().await;
            match guard.as_ref() {
                Some(cached) => cached.expires_at.is_some_and(|at| at <= Instant::now()),
                None => true,
            }
        };
        if !stale && !force {
            return Ok(());
        }

        let fresh = match &self.source {
            #[cfg(test)]
            KeySource::Static(keys) => CachedKeys { keys: build_keys(keys, true), expires_at: None },
            KeySource::Http { url, client } => {
                let set: JwkSet = client
                    .get(url)
                    .send()
                    .await
                    .and_then(reqwest::Response::error_for_status)
                    .map_err(|e| AuthError::KeySet(e.to_string()))?
                    .json()
                    .await
                    .map_err(|e| AuthError::KeySet(format!("decode: {e}")))?;
                // A symmetric key published in a key set is public.
                CachedKeys {
                    keys: build_keys(&set.keys, false),
                    expires_at: Some(Instant::now() + KEY_SET_TTL),
                }
            }
        };
        debug!(keys = fresh.keys.len(), "key set loaded");
        *self.cache.write().await = Some(fresh);
        Ok(())
    }

    fn subject(&self, claims: &Map<String, Value>) -> Result<String, AuthError> {
        ["sub", self.username_claim.as_str()]
            .into_iter()
            .filter_map(|name| claims.get(name).and_then(Value::as_str))
            .map(str::trim)
            .find(|s| !s.is_empty())
            .map(str::to_owned)
            .ok_or(AuthError::MissingSubject)
    }
}

fn build_keys(keys: &[Jwk], allow_symmetric: bool) -> HashMap<String, (DecodingKey, Algorithm)> {
    keys.iter()
        .filter_map(|jwk| match decoding_key(jwk, allow_symmetric) {
            Some(entry) => Some((jwk.kid.clone(), entry)),
            None => {
                warn!(kid = %jwk.kid, kty = %jwk.kty, "skipping unusable signing key");
                None
            }
        })
        .collect()
}

fn decoding_key(jwk: &Jwk, allow_symmetric: bool) -> Option<(DecodingKey, Algorithm)> {
    let (key, alg) = match jwk.kty.as_str() {
        "RSA" => (
            DecodingKey::from_rsa_components(jwk.n.as_deref()?, jwk.e.as_deref()?).ok()?,
            Algorithm::RS256,
        ),
        "oct" if allow_symmetric => {
            let secret = URL_SAFE_NO_PAD.decode(jwk.k.as_deref()?.trim_end_matches('=')).ok()?;
            (DecodingKey::from_secret(&secret), Algorithm::HS256)
        }
        _ => return None,
    };
    // A key that declares some other algorithm is not one we can verify with.
    match jwk.alg.as_deref() {
        Some(declared) if declared.parse::<Algorithm>().ok() != Some(alg) => None,
        _ => Some((key, alg)),
    }
}

#[async_trait]
impl TokenVerifier for JwksVerifier {
    async fn verify(&self, token: &str) -> Result<Caller, AuthError> {
        let header = jsonwebtoken::decode_header(token).map_err(|e| AuthError::MalformedHeader(e.to_string()))?;
        let kid = header.kid.as_deref().ok_or(AuthError::MissingKeyId)?;
        let (key, alg) = self.key_for(kid).await?;
        if header.alg != alg {
            return Err(AuthError::AlgorithmMismatch(header.alg));
        }

        let mut validation = Validation::new(alg);
        validation.set_issuer(&[self.issuer.as_str()]);
        validation.validate_aud = false;

        let data = jsonwebtoken::decode::<Map<String, Value>>(token, &key, &validation)?;
        let owner_id = self.subject(&data.claims)?;
        Ok(Caller { owner_id })
    }
}
