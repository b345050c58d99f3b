//! Authenticated calls to plugins with liveness recovery and token refresh.

use std::sync::Arc;

use serde_json::json;
use tracing::{debug, info, instrument, warn};

use fleetgate_core::config::{PluginConfig, PluginStatusPolling};

use super::client::{PluginTransport, TransportError};
use super::decrypt::PasswordDecryptor;
use super::status::StatusProbe;
use super::token_cache::TokenCache;
use super::types::{Credential, PluginRequest, PluginResponse};
use crate::error::AggregatorError;
use crate::storage::{AuthMode, Plugin};

/// Southbound login endpoint.
pub const SESSIONS_PATH: &str = "/ODIM/v1/Sessions";

#[derive(Debug, thiserror::Error)]
pub enum ContactError {
    #[error("plugin {plugin_id} unreachable: {source}")]
    Unreachable {
        plugin_id: String,
        #[source]
        source: TransportError,
    },

    #[error("unable to create session with plugin {plugin_id}")]
    NoValidSession { plugin_id: String },

    #[error("cannot decrypt credentials of plugin {plugin_id}: {message}")]
    Decrypt { plugin_id: String, message: String },

    #[error("plugin responded with status {status}")]
    Protocol { status: u16, body: Vec<u8> },
}

impl From<ContactError> for AggregatorError {
    fn from(e: ContactError) -> Self {
        match e {
            ContactError::Unreachable { .. } => Self::PluginUnreachable(e.to_string()),
            ContactError::NoValidSession { plugin_id } => Self::NoValidPluginSession(plugin_id),
            ContactError::Decrypt { .. } => Self::Internal(e.to_string()),
            ContactError::Protocol { status, body } => Self::PluginProtocol { status, body },
        }
    }
}

/// Talks to plugins on behalf of every aggregator service.
pub struct ContactProtocol {
    transport: Arc<dyn PluginTransport>,
    decryptor: Arc<dyn PasswordDecryptor>,
    tokens: TokenCache,
    probe: StatusProbe,
    scheme: String,
}

impl ContactProtocol {
    pub fn new(
        transport: Arc<dyn PluginTransport>,
        decryptor: Arc<dyn PasswordDecryptor>,
        plugin: &PluginConfig,
        polling: &PluginStatusPolling,
    ) -> Self {
        let probe = StatusProbe::new(
            Arc::clone(&transport),
            plugin.scheme.clone(),
            polling.clone(),
        );
        Self {
            transport,
            decryptor,
            tokens: TokenCache::new(),
            probe,
            scheme: plugin.scheme.clone(),
        }
    }

    pub const fn tokens(&self) -> &TokenCache {
        &self.tokens
    }

    pub fn decryptor(&self) -> &dyn PasswordDecryptor {
        self.decryptor.as_ref()
    }

    fn url(&self, plugin: &Plugin, path: &str) -> String {
        format!("{}://{}{path}", self.scheme, plugin.address)
    }

    fn decrypt_password(&self, plugin: &Plugin) -> Result<String, ContactError> {
        self.decryptor
            .decrypt(&plugin.password)
            .map_err(|e| ContactError::Decrypt {
                plugin_id: plugin.id.clone(),
                message: e.to_string(),
            })
    }

    fn basic_credential(&self, plugin: &Plugin) -> Result<Credential, ContactError> {
        Ok(Credential::Basic {
            username: plugin.username.clone(),
            password: self.decrypt_password(plugin)?,
        })
    }

    async fn call_plugin(
        &self,
        plugin: &Plugin,
        url: &str,
        request: &PluginRequest,
        credential: &Credential,
    ) -> Result<PluginResponse, TransportError> {
        if plugin.auth_mode() == AuthMode::BasicAuth {
            // Priming call. Its outcome is ignored.
            if let Err(e) = self.transport.call(url, request, credential).await {
                debug!(plugin_id = %plugin.id, error = %e, "Priming call failed");
            }
        }
        self.transport.call(url, request, credential).await
    }

    /// Send one request. A transport failure triggers a status probe and,
    /// if the plugin recovers, exactly one more attempt. Any HTTP status is
    /// returned as a response.
    pub async fn contact(
        &self,
        plugin: &Plugin,
        request: &PluginRequest,
        credential: &Credential,
    ) -> Result<PluginResponse, ContactError> {
        let url = self.url(plugin, &request.path);
        let first = match self.call_plugin(plugin, &url, request, credential).await {
            Ok(resp) => return Ok(resp),
            Err(e) => e,
        };

        warn!(plugin_id = %plugin.id, error = %first, "Plugin call failed, checking plugin status");
        if !self.probe.check_status(plugin).await {
            return Err(ContactError::Unreachable {
                plugin_id: plugin.id.clone(),
                source: first,
            });
        }

        // Unreachable carries the first failure, which triggered the status check.
        self.call_plugin(plugin, &url, request, credential)
            .await
            .map_err(|second| {
                warn!(
                    plugin_id = %plugin.id,
                    error = %second,
                    "Plugin call failed again after status check"
                );
                ContactError::Unreachable {
                    plugin_id: plugin.id.clone(),
                    source: first,
                }
            })
    }

    /// Log in to a token-auth plugin and return the new token.
    async fn login(&self, plugin: &Plugin) -> Result<String, ContactError> {
        let password = self.decrypt_password(plugin)?;
        let body = json!({ "Username": plugin.username, "Password": password });
        let request = PluginRequest::post(SESSIONS_PATH).with_body(body.to_string().into_bytes());

        let resp = self.contact(plugin, &request, &Credential::None).await?;
        match resp.auth_token {
            Some(token) if resp.is_success() => {
                info!(plugin_id = %plugin.id, "Logged in to plugin");
                Ok(token)
            }
            _ => {
                warn!(
                    plugin_id = %plugin.id,
                    status = resp.status,
                    "Plugin login returned no token"
                );
                Err(ContactError::NoValidSession {
                    plugin_id: plugin.id.clone(),
                })
            }
        }
    }

    /// Cached token for `plugin`, logging in on a miss. Concurrent callers
    /// for the same plugin share a single login.
    pub async fn ensure_token(&self, plugin: &Plugin) -> Result<String, ContactError> {
        if let Some(token) = self.tokens.get(&plugin.id) {
            return Ok(token);
        }

        let gate = self.tokens.login_gate(&plugin.id);
        let _guard = gate.lock().await;
        if let Some(token) = self.tokens.get(&plugin.id) {
            return Ok(token);
        }

        let token = self.login(plugin).await?;
        self.tokens.set(&plugin.id, token.clone());
        Ok(token)
    }

    /// Replace a token the plugin rejected. If another caller already
    /// replaced `stale` while this one waited at the gate, that token is
    /// reused instead of logging in again.
    async fn refresh_token(&self, plugin: &Plugin, stale: &str) -> Result<String, ContactError> {
        let gate = self.tokens.login_gate(&plugin.id);
        let _guard = gate.lock().await;
        if let Some(current) = self.tokens.get(&plugin.id) {
            if current != stale {
                return Ok(current);
            }
        }

        let token = self.login(plugin).await?;
        self.tokens.set(&plugin.id, token.clone());
        Ok(token)
    }

    /// Re-authenticate after a 401 and replay `request` once. A second 401
    /// is returned as is.
    pub async fn retry_on_unauthorized(
        &self,
        plugin: &Plugin,
        request: &PluginRequest,
        stale_token: &str,
    ) -> Result<PluginResponse, ContactError> {
        info!(plugin_id = %plugin.id, "Plugin rejected token, logging in again");
        let token = self.refresh_token(plugin, stale_token).await?;
        self.contact(plugin, request, &Credential::Token(token)).await
    }

    /// Credential a plugin expects for ordinary calls.
    async fn credential_for(&self, plugin: &Plugin) -> Result<Credential, ContactError> {
        match plugin.auth_mode() {
            AuthMode::TokenAuth => Ok(Credential::Token(self.ensure_token(plugin).await?)),
            AuthMode::BasicAuth => self.basic_credential(plugin),
        }
    }

    /// Authenticated call with one transparent retry on a token-auth 401.
    /// Returns the plugin's response whatever its status.
    #[instrument(
        skip_all,
        fields(plugin_id = %plugin.id, method = %request.method, path = %request.path)
    )]
    pub async fn send(
        &self,
        plugin: &Plugin,
        request: &PluginRequest,
    ) -> Result<PluginResponse, ContactError> {
        let credential = self.credential_for(plugin).await?;
        let resp = self.contact(plugin, request, &credential).await?;
        match (&credential, resp.status) {
            (Credential::Token(stale), 401) => {
                self.retry_on_unauthorized(plugin, request, stale).await
            }
            _ => Ok(resp),
        }
    }

    /// Like [`send`](Self::send), but any status other than 200/201 becomes
    /// [`ContactError::Protocol`] carrying the plugin's body.
    pub async fn dispatch(
        &self,
        plugin: &Plugin,
        request: &PluginRequest,
    ) -> Result<PluginResponse, ContactError> {
        let resp = self.send(plugin, request).await?;
        if resp.is_success() {
            Ok(resp)
        } else {
            Err(ContactError::Protocol {
                status: resp.status,
                body: resp.body,
            })
        }
    }
}
