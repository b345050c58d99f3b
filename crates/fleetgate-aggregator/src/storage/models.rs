//! Data models for aggregator storage.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct User {
    pub username: String,
    pub password_hash: String,
    pub role_id: String,
    /// JSON array of account type names.
    pub account_types: String,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Session row as stored. Privileges are a JSON array of privilege names.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct SessionRecord {
    pub token: String,
    pub username: String,
    pub privileges: String,
    pub created_at: i64,
    pub last_used_at: i64,
}

/// How a plugin expects southbound calls to be authenticated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AuthMode {
    /// Bearer session token obtained by logging in to the plugin.
    TokenAuth,
    /// Static credentials on every call.
    BasicAuth,
}

impl AuthMode {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::TokenAuth => "TokenAuth",
            Self::BasicAuth => "BasicAuth",
        }
    }
}

impl fmt::Display for AuthMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AuthMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // "XAuthToken" is the legacy spelling still found in plugin registrations.
        if s.eq_ignore_ascii_case("TokenAuth") || s.eq_ignore_ascii_case("XAuthToken") {
            Ok(Self::TokenAuth)
        } else if s.eq_ignore_ascii_case("BasicAuth") {
            Ok(Self::BasicAuth)
        } else {
            Err(format!("unknown auth mode: {s}"))
        }
    }
}

/// A southbound manager service.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Plugin {
    pub id: String,
    /// `host:port`
    pub address: String,
    pub preferred_auth: String,
    pub username: String,
    /// Encrypted; decrypted only for the duration of a login or call.
    #[serde(skip_serializing)]
    pub password: Vec<u8>,
    pub created_at: i64,
}

impl Plugin {
    /// Parsed auth mode. Unknown values fall back to basic credentials.
    pub fn auth_mode(&self) -> AuthMode {
        self.preferred_auth.parse().unwrap_or(AuthMode::BasicAuth)
    }
}

/// One managed hardware endpoint.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Device {
    pub uuid: String,
    pub manager_address: String,
    pub username: String,
    #[serde(skip_serializing)]
    pub password: Vec<u8>,
    pub plugin_id: String,
    pub created_at: i64,
}

/// Cached Redfish resource keyed by its northbound URL.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct ResourceRecord {
    pub url: String,
    pub table_name: String,
    pub device_uuid: Option<String>,
    pub body: String,
    pub updated_at: i64,
}

impl ResourceRecord {
    pub fn json(&self) -> Result<serde_json::Value, serde_json::Error> {
        serde_json::from_str(&self.body)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Fabric {
    pub fabric_uuid: String,
    pub plugin_id: String,
}
