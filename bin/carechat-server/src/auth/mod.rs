//! Access Gate: bearer-token verification against the identity provider.

pub mod jwks;

use async_trait::async_trait;
use thiserror::Error;

pub use jwks::JwksVerifier;

/// Verified identity of the caller. `owner_id` partitions every stored record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Caller {
    pub owner_id: String,
}

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("token header is invalid: {0}")]
    MalformedHeader(String),

    #[error("token does not name a signing key")]
    MissingKeyId,

    #[error("no signing key with id {0}")]
    UnknownKey(String),

    #[error("token algorithm {0:?} does not match its signing key")]
    AlgorithmMismatch(jsonwebtoken::Algorithm),

    #[error("token verification failed: {0}")]
    Rejected(#[from] jsonwebtoken::errors::Error),

    #[error("token carries no subject")]
    MissingSubject,

    #[error("key set unavailable: {0}")]
    KeySet(String),
}

/// Turns a bearer token into a [`Caller`].
#[async_trait]
pub trait TokenVerifier: Send + Sync + 'static {
    async fn verify(&self, token: &str) -> Result<Caller, AuthError>;
}
