//! Southbound plugin contact.
//!
//! - `client`: the transport capability and its reqwest implementation
//! - `token_cache`: per-plugin bearer tokens and login gates
//! - `status`: liveness probing after transport failures
//! - `contact`: authenticated calls with recovery and 401 retry

pub mod client;
pub mod contact;
pub mod decrypt;
pub mod status;
pub mod token_cache;
pub mod types;


pub use client::{AUTH_TOKEN_HEADER, HttpTransport, PluginTransport, TransportError};
pub use contact::{ContactError, ContactProtocol};
pub use decrypt::{DecryptError, PasswordDecryptor, PlainPasswords};
pub use status::StatusProbe;
pub use token_cache::TokenCache;
pub use types::{Credential, PluginRequest, PluginResponse};
