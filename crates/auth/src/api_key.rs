//! Argon2id hashing of client API keys.
//!
//! Keys are hashed as `api_key || pepper`. The pepper is process
//! configuration and never stored next to the hash; the per-hash salt is
//! embedded in the PHC string.

use argon2::password_hash::rand_core::OsRng;
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthError {
    /// No usable credentials were presented.
    #[error("missing credentials")]
    MissingCredentials,

    /// Credentials were presented but did not verify.
    #[error("invalid credentials")]
    InvalidCredentials,

    /// The stored hash could not be parsed or computed.
    #[error("credential hash error: {0}")]
    Hash(String),
}

/// Hashes and verifies API keys with a shared pepper.
#[derive(Clone)]
pub struct ApiKeyHasher {
    pepper: String,
}

impl core::fmt::Debug for ApiKeyHasher {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ApiKeyHasher").finish_non_exhaustive()
    }
}

impl ApiKeyHasher {
    pub fn new(pepper: impl Into<String>) -> Self {
        Self {
            pepper: pepper.into(),
        }
    }

    fn peppered(&self, api_key: &str) -> Vec<u8> {
        let mut material = Vec::with_capacity(api_key.len() + self.pepper.len());
        material.extend_from_slice(api_key.as_bytes());
        material.extend_from_slice(self.pepper.as_bytes());
        material
    }

    /// Hash an API key with a fresh random salt. Returns a PHC string.
    pub fn hash(&self, api_key: &str) -> Result<String, AuthError> {
        let salt = SaltString::generate(&mut OsRng);
        let hash = Argon2::default()
            .hash_password(&self.peppered(api_key), &salt)
            .map_err(|e| AuthError::Hash(e.to_string()))?;
        Ok(hash.to_string())
    }

    /// Verify an API key against a stored PHC string.
    ///
    /// `Ok(false)` means the key is wrong; `Err` means the stored hash is
    /// unusable.
    pub fn verify(&self, api_key: &str, phc: &str) -> Result<bool, AuthError> {
        let parsed = PasswordHash::new(phc).map_err(|e| AuthError::Hash(e.to_string()))?;
        match Argon2::default().verify_password(&self.peppered(api_key), &parsed) {
            Ok(()) => Ok(true),
            Err(argon2::password_hash::Error::Password) => Ok(false),
            Err(e) => Err(AuthError::Hash(e.to_string())),
        }
    }
}
