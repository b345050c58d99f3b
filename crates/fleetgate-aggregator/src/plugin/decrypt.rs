//! Access to stored plugin and device passwords.

/// Stored password bytes could not be turned back into a password.
#[derive(Debug, thiserror::Error)]
#[error("password decryption failed: {0}")]
pub struct DecryptError(pub String);

/// Recovers a plaintext password from its stored form.
pub trait PasswordDecryptor: Send + Sync {
    fn decrypt(&self, stored: &[u8]) -> Result<String, DecryptError>;
}

/// Passwords stored as UTF-8 plaintext. For lab deployments and tests.
#[derive(Debug, Default, Clone, Copy)]
pub struct PlainPasswords;

impl PasswordDecryptor for PlainPasswords {
    fn decrypt(&self, stored: &[u8]) -> Result<String, DecryptError> {
        String::from_utf8(stored.to_vec()).map_err(|e| DecryptError(e.to_string()))
    }
}
