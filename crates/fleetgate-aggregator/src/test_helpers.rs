//! Shared test helpers: a scripted in-process plugin transport and fixtures.
//!
//! Used by the contact, device, rediscovery, subscription and server test
//! modules.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Method;
use serde_json::Value;

use fleetgate_core::config::{PluginConfig, PluginStatusPolling};

use crate::plugin::{
    ContactProtocol, Credential, PlainPasswords, PluginRequest, PluginResponse, PluginTransport,
    TransportError,
};
use crate::storage::{AggregatorDatabase, AuthMode, NewDevice, NewPlugin, Plugin};

/// One call observed by [`ScriptedTransport`].
#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub method: Method,
    /// `host:port` part of the URL.
    pub host: String,
    pub path: String,
    pub body: Option<Value>,
    pub credential: Credential,
}

impl RecordedCall {
    pub fn token(&self) -> Option<&str> {
        match &self.credential {
            Credential::Token(t) => Some(t),
            _ => None,
        }
    }
}

type Handler = dyn Fn(&RecordedCall) -> Result<PluginResponse, TransportError> + Send + Sync;

/// In-process plugin fake. Every call is recorded and answered by the
/// handler closure.
pub struct ScriptedTransport {
    handler: Box<Handler>,
    calls: Mutex<Vec<RecordedCall>>,
    delay: Duration,
}

impl ScriptedTransport {
    pub fn new(
        handler: impl Fn(&RecordedCall) -> Result<PluginResponse, TransportError>
        + Send
        + Sync
        + 'static,
    ) -> Arc<Self> {
        Arc::new(Self {
            handler: Box::new(handler),
            calls: Mutex::new(Vec::new()),
            delay: Duration::ZERO,
        })
    }

    /// Like [`new`](Self::new), sleeping `delay` before answering so that
    /// concurrent callers overlap.
    pub fn with_delay(
        delay: Duration,
        handler: impl Fn(&RecordedCall) -> Result<PluginResponse, TransportError>
        + Send
        + Sync
        + 'static,
    ) -> Arc<Self> {
        Arc::new(Self {
            handler: Box::new(handler),
            calls: Mutex::new(Vec::new()),
            delay,
        })
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().unwrap().clone()
    }

    /// Number of calls with `method` to `path`.
    pub fn count(&self, method: &Method, path: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| &c.method == method && c.path == path)
            .count()
    }

    pub fn logins(&self) -> usize {
        self.count(&Method::POST, "/ODIM/v1/Sessions")
    }
}

fn split_url(url: &str) -> (String, String) {
    let rest = url.split_once("://").map_or(url, |(_, r)| r);
    match rest.find('/') {
        Some(i) => (rest[..i].to_string(), rest[i..].to_string()),
        None => (rest.to_string(), "/".to_string()),
    }
}

#[async_trait]
impl PluginTransport for ScriptedTransport {
    async fn call(
        &self,
        url: &str,
        request: &PluginRequest,
        credential: &Credential,
    ) -> Result<PluginResponse, TransportError> {
        let (host, path) = split_url(url);
        let call = RecordedCall {
            method: request.method.clone(),
            host,
            path,
            body: request
                .body
                .as_ref()
                .and_then(|b| serde_json::from_slice(b).ok()),
            credential: credential.clone(),
        };
        self.calls.lock().unwrap().push(call.clone());
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        (self.handler)(&call)
    }
}

/// Response with a JSON body.
pub fn json_response(status: u16, body: &Value) -> Result<PluginResponse, TransportError> {
    Ok(PluginResponse {
        status,
        body: serde_json::to_vec(body).unwrap(),
        auth_token: None,
        location: None,
    })
}

/// Empty response with only a status.
pub fn status_response(status: u16) -> Result<PluginResponse, TransportError> {
    Ok(PluginResponse {
        status,
        ..PluginResponse::default()
    })
}

/// Successful plugin login handing out `token`.
pub fn token_response(token: &str) -> Result<PluginResponse, TransportError> {
    Ok(PluginResponse {
        status: 201,
        body: b"{}".to_vec(),
        auth_token: Some(token.to_string()),
        location: None,
    })
}

pub fn connection_refused(call: &RecordedCall) -> Result<PluginResponse, TransportError> {
    Err(TransportError::Request {
        url: format!("https://{}{}", call.host, call.path),
        message: "connection refused".into(),
    })
}

/// Probe settings that fail fast.
pub fn fast_polling() -> PluginStatusPolling {
    PluginStatusPolling {
        response_timeout_secs: 1,
        max_retry_attempt: 3,
        retry_interval_secs: 0,
    }
}

pub fn contact_protocol(transport: Arc<dyn PluginTransport>) -> Arc<ContactProtocol> {
    Arc::new(ContactProtocol::new(
        transport,
        Arc::new(PlainPasswords),
        &PluginConfig::default(),
        &fast_polling(),
    ))
}

pub fn test_plugin(id: &str, mode: AuthMode) -> Plugin {
    Plugin {
        id: id.to_string(),
        address: format!("{}.plugin:45001", id.to_lowercase()),
        preferred_auth: mode.as_str().to_string(),
        username: "plugin-admin".to_string(),
        password: b"plugin-secret".to_vec(),
        created_at: 0,
    }
}

/// In-memory database holding `plugin` and one device per entry of
/// `devices`, all managed by that plugin.
pub async fn db_with_devices(plugin: &Plugin, devices: &[&str]) -> AggregatorDatabase {
    let db = AggregatorDatabase::open_in_memory().await.unwrap();
    db.create_plugin(&NewPlugin {
        id: &plugin.id,
        address: &plugin.address,
        auth_mode: plugin.auth_mode(),
        username: &plugin.username,
        password: &plugin.password,
    })
    .await
    .unwrap();
    for (i, uuid) in devices.iter().enumerate() {
        db.create_device(&NewDevice {
            uuid,
            manager_address: &format!("10.0.0.{}", i + 1),
            username: "root",
            password: b"device-secret",
            plugin_id: &plugin.id,
        })
        .await
        .unwrap();
    }
    db
}
