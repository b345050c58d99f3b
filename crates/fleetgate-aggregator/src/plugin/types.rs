//! Request and response shapes exchanged with plugins.

use std::time::Duration;

use reqwest::Method;
use serde::Serialize;

/// A southbound call, addressed by path relative to the plugin root.
#[derive(Debug, Clone)]
pub struct PluginRequest {
    pub method: Method,
    pub path: String,
    pub body: Option<Vec<u8>>,
    /// Overrides the transport's default timeout.
    pub timeout: Option<Duration>,
}

impl PluginRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            body: None,
            timeout: None,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::DELETE, path)
    }

    pub fn with_body(mut self, body: Vec<u8>) -> Self {
        self.body = Some(body);
        self
    }

    /// Serialize `value` as the JSON body.
    pub fn with_json<T: Serialize>(self, value: &T) -> Result<Self, serde_json::Error> {
        Ok(self.with_body(serde_json::to_vec(value)?))
    }

    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// What a plugin sent back. Any status is representable; interpreting it
/// is up to the caller.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PluginResponse {
    pub status: u16,
    pub body: Vec<u8>,
    /// Value of the `X-Auth-Token` header.
    pub auth_token: Option<String>,
    /// Value of the `Location` header.
    pub location: Option<String>,
}

impl PluginResponse {
    /// 200 and 201 are the only statuses plugins use for success.
    pub const fn is_success(&self) -> bool {
        matches!(self.status, 200 | 201)
    }

    pub fn json(&self) -> Result<serde_json::Value, serde_json::Error> {
        serde_json::from_slice(&self.body)
    }
}

/// How a single call authenticates.
#[derive(Clone, PartialEq, Eq)]
pub enum Credential {
    None,
    Token(String),
    Basic { username: String, password: String },
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::None => f.write_str("None"),
            Self::Token(_) => f.write_str("Token(..)"),
            Self::Basic { username, .. } => write!(f, "Basic({username}, ..)"),
        }
    }
}
