//! Authenticated encryption for cached turns.
//!
//! Stored form: `base64(nonce):base64(tag):base64(ciphertext)` using AES-256-GCM
//! with a fresh 96-bit nonce per value. The 256-bit key is the SHA-256 digest
//! of the configured key material.

use aes_gcm::aead::{Aead, AeadCore, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use sha2::{Digest, Sha256};
use thiserror::Error;

const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;
const SEPARATOR: char = ':';

#[derive(Debug, Error)]
pub enum CipherError {
    #[error("stored value is not nonce:tag:ciphertext")]
    Malformed,

    #[error("stored value is not valid base64: {0}")]
    Encoding(#[from] base64::DecodeError),

    /// Tag verification failed; the value was altered or sealed with another key.
    #[error("integrity check failed")]
    Integrity,

    #[error("encryption failed")]
    Seal,
}

#[derive(Clone)]
pub struct TurnCipher {
    cipher: Aes256Gcm,
}

impl std::fmt::Debug for TurnCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("TurnCipher(<redacted>)")
    }
}

impl TurnCipher {
    pub fn new(key_material: &str) -> Self {
        let digest = Sha256::digest(key_material.as_bytes());
        let key = Key::<Aes256Gcm>::from_slice(&digest[..]);
        Self { cipher: Aes256Gcm::new(key) }
    }

    pub fn seal(&self, plaintext: &[u8]) -> Result<String, CipherError> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let mut sealed = self.cipher.encrypt(&nonce, plaintext).map_err(|_| CipherError::Seal)?;
        // aes-gcm appends the tag to the ciphertext.
        let tag = sealed.split_off(sealed.len() - TAG_LEN);
        Ok(format!(
            "{}{SEPARATOR}{}{SEPARATOR}{}",
            STANDARD.encode(nonce),
            STANDARD.encode(tag),
            STANDARD.encode(sealed)
        ))
    }

    pub fn open(&self, stored: &str) -> Result<Vec<u8>, CipherError> {
        let mut fields = stored.split(SEPARATOR);
        let (Some(nonce), Some(tag), Some(body), None) = (fields.next(), fields.next(), fields.next(), fields.next())
        else {
            return Err(CipherError::Malformed);
        };
        let nonce = STANDARD.decode(nonce)?;
        let tag = STANDARD.decode(tag)?;
        let mut sealed = STANDARD.decode(body)?;
        if nonce.len() != NONCE_LEN || tag.len() != TAG_LEN {
            return Err(CipherError::Malformed);
        }
        sealed.extend_from_slice(&tag);
        self.cipher
            .decrypt(Nonce::from_slice(&nonce), sealed.as_slice())
            .map_err(|_| CipherError::Integrity)
    }
}
