//! Credential hashing for caller accounts.

use argon2::Argon2;
use argon2::password_hash::rand_core::OsRng;
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use sha2::{Digest, Sha512};

use fleetgate_core::config::HasherKind;

/// Failure to produce or parse a stored hash.
#[derive(Debug, thiserror::Error)]
#[error("password hashing failed: {0}")]
pub struct HashError(String);

/// Hash and verify account passwords.
pub trait CredentialHasher: Send + Sync {
    fn hash(&self, password: &str) -> Result<String, HashError>;

    /// `Ok(false)` on mismatch; `Err` only when `stored` is not a hash this
    /// hasher understands.
    fn verify(&self, password: &str, stored: &str) -> Result<bool, HashError>;
}

/// Argon2id with a random salt per hash.
#[derive(Debug, Default, Clone, Copy)]
pub struct Argon2Hasher;

impl CredentialHasher for Argon2Hasher {
    fn hash(&self, password: &str) -> Result<String, HashError> {
        let salt = SaltString::generate(&mut OsRng);
        let hash = Argon2::default()
            .hash_password(password.as_bytes(), &salt)
            .map_err(|e| HashError(e.to_string()))?;
        Ok(hash.to_string())
    }

    fn verify(&self, password: &str, stored: &str) -> Result<bool, HashError> {
        let parsed = PasswordHash::new(stored).map_err(|e| HashError(e.to_string()))?;
        Ok(Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok())
    }
}

/// Unsalted SHA-512 hex digest, for account stores migrated from
/// deployments that kept plain digests.
#[derive(Debug, Default, Clone, Copy)]
pub struct Sha512Hasher;

impl CredentialHasher for Sha512Hasher {
    fn hash(&self, password: &str) -> Result<String, HashError> {
        let mut hasher = Sha512::new();
        hasher.update(password.as_bytes());
        Ok(format!("{:x}", hasher.finalize()))
    }

    fn verify(&self, password: &str, stored: &str) -> Result<bool, HashError> {
        let computed = self.hash(password)?;
        Ok(constant_time_eq(computed.as_bytes(), stored.as_bytes()))
    }
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

/// Hasher selected by configuration.
pub fn hasher_for(kind: HasherKind) -> Box<dyn CredentialHasher> {
    match kind {
        HasherKind::Argon2 => Box::new(Argon2Hasher),
        HasherKind::Sha512 => Box::new(Sha512Hasher),
    }
}
