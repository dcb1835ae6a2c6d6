//! One-way password digests.
//!
//! The relay never stores or compares plaintext passwords. Registration
//! stores `digest(password)`; Auth asks the digest to `verify` the supplied
//! password against what was stored. The algorithm is chosen by
//! `auth.digest` in the config.

use argon2::password_hash::rand_core::OsRng;
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::sync::Arc;

/// A one-way credential digest.
pub trait CredentialDigest: Send + Sync {
    /// Digest a plaintext password for storage.
    fn digest(&self, password: &str) -> Result<String, DigestError>;

    /// Check a plaintext password against a stored digest.
    fn verify(&self, password: &str, stored: &str) -> bool;
}

/// Selectable digest algorithms.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DigestAlgorithm {
    /// Argon2id with a random salt, stored as a PHC string.
    #[default]
    Argon2,
    /// Unsalted SHA-256, hex encoded. Only for stores created that way.
    Sha256,
}

impl DigestAlgorithm {
    /// Build the digest implementation for this algorithm.
    pub fn build(self) -> Arc<dyn CredentialDigest> {
        match self {
            DigestAlgorithm::Argon2 => Arc::new(Argon2Digest),
            DigestAlgorithm::Sha256 => Arc::new(Sha256Digest),
        }
    }
}

/// Digest errors.
#[derive(Debug, thiserror::Error)]
pub enum DigestError {
    /// The hasher rejected the input or parameters.
    #[error("hashing failed: {0}")]
    Hash(String),
}

/// Argon2id digest (PHC string format).
#[derive(Debug, Clone, Copy, Default)]
pub struct Argon2Digest;

impl CredentialDigest for Argon2Digest {
    fn digest(&self, password: &str) -> Result<String, DigestError> {
        let salt = SaltString::generate(&mut OsRng);
        Argon2::default()
            .hash_password(password.as_bytes(), &salt)
            .map(|hash| hash.to_string())
            .map_err(|e| DigestError::Hash(e.to_string()))
    }

    fn verify(&self, password: &str, stored: &str) -> bool {
        match PasswordHash::new(stored) {
            Ok(hash) => Argon2::default()
                .verify_password(password.as_bytes(), &hash)
                .is_ok(),
            Err(e) => {
                tracing::warn!("Stored digest is not a PHC string: {}", e);
                false
            }
        }
    }
}

/// Hex-encoded SHA-256 digest.
#[derive(Debug, Clone, Copy, Default)]
pub struct Sha256Digest;

impl CredentialDigest for Sha256Digest {
    fn digest(&self, password: &str) -> Result<String, DigestError> {
        Ok(hex::encode(Sha256::digest(password.as_bytes())))
    }

    fn verify(&self, password: &str, stored: &str) -> bool {
        let computed = hex::encode(Sha256::digest(password.as_bytes()));
        constant_time_eq(computed.as_bytes(), stored.as_bytes())
    }
}

/// Byte comparison whose running time does not depend on where inputs differ.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    a.len() == b.len() && a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}
