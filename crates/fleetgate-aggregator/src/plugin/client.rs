//! HTTP transport to plugins.
//!
//! Uses reqwest (rustls) with the deployment's root CA to reach plugins.

use std::path::Path;

use async_trait::async_trait;
use reqwest::header::{CONTENT_TYPE, HeaderValue, LOCATION};
use thiserror::Error;

use fleetgate_core::config::{PluginConfig, TlsConfig};

use super::types::{Credential, PluginRequest, PluginResponse};

/// Header carrying plugin and caller session tokens.
pub const AUTH_TOKEN_HEADER: &str = "X-Auth-Token";

/// Failure to exchange a request with a plugin. A plugin answering with an
/// error status is not a transport error.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("request to {url} failed: {message}")]
    Request { url: String, message: String },

    #[error("request to {url} timed out")]
    Timeout { url: String },

    #[error("failed to read response from {url}: {message}")]
    Body { url: String, message: String },

    #[error("TLS configuration error: {0}")]
    Tls(String),
}

/// Sends one request to an absolute plugin URL.
#[async_trait]
pub trait PluginTransport: Send + Sync {
    async fn call(
        &self,
        url: &str,
        request: &PluginRequest,
        credential: &Credential,
    ) -> Result<PluginResponse, TransportError>;
}

/// reqwest-backed transport.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    http: reqwest::Client,
}

impl HttpTransport {
    pub fn new(plugin: &PluginConfig, tls: &TlsConfig) -> Result<Self, TransportError> {
        // reqwest is built with rustls-no-provider; an `Err` here only means
        // a provider is already installed.
        let _ = rustls::crypto::ring::default_provider().install_default();

        let mut builder = reqwest::Client::builder().timeout(plugin.request_timeout());
        if let Some(path) = &tls.root_ca_certificate {
            builder = builder.add_root_certificate(load_root_ca(path)?);
        }
        let http = builder
            .build()
            .map_err(|e| TransportError::Tls(e.to_string()))?;
        Ok(Self { http })
    }
}

fn load_root_ca(path: &Path) -> Result<reqwest::Certificate, TransportError> {
    let pem = std::fs::read(path).map_err(|e| {
        TransportError::Tls(format!("failed to read root CA {}: {e}", path.display()))
    })?;
    reqwest::Certificate::from_pem(&pem)
        .map_err(|e| TransportError::Tls(format!("invalid root CA {}: {e}", path.display())))
}

fn header_string(value: Option<&HeaderValue>) -> Option<String> {
    value
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .map(ToString::to_string)
}

#[async_trait]
impl PluginTransport for HttpTransport {
    async fn call(
        &self,
        url: &str,
        request: &PluginRequest,
        credential: &Credential,
    ) -> Result<PluginResponse, TransportError> {
        let mut builder = self.http.request(request.method.clone(), url);
        builder = match credential {
            Credential::None => builder,
            Credential::Token(token) => builder.header(AUTH_TOKEN_HEADER, token),
            Credential::Basic { username, password } => {
                builder.basic_auth(username, Some(password))
            }
        };
        if let Some(body) = &request.body {
            builder = builder
                .header(CONTENT_TYPE, "application/json")
                .body(body.clone());
        }
        if let Some(timeout) = request.timeout {
            builder = builder.timeout(timeout);
        }

        let resp = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                TransportError::Timeout {
                    url: url.to_string(),
                }
            } else {
                TransportError::Request {
                    url: url.to_string(),
                    message: e.to_string(),
                }
            }
        })?;

        let status = resp.status().as_u16();
        let auth_token = header_string(resp.headers().get(AUTH_TOKEN_HEADER));
        let location = header_string(resp.headers().get(LOCATION));
        let body = resp.bytes().await.map_err(|e| TransportError::Body {
            url: url.to_string(),
            message: e.to_string(),
        })?;

        Ok(PluginResponse {
            status,
            body: body.to_vec(),
            auth_token,
            location,
        })
    }
}

#[cfg(test)]
#[allow(clippy::panic, clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn builds_without_root_ca() {
        HttpTransport::new(&PluginConfig::default(), &TlsConfig::default()).unwrap();
    }

    #[test]
    fn missing_root_ca_is_tls_error() {
        let tls = TlsConfig {
            root_ca_certificate: Some("/nonexistent/ca.pem".into()),
        };
        let err = HttpTransport::new(&PluginConfig::default(), &tls).unwrap_err();
        assert!(matches!(err, TransportError::Tls(_)));
    }

    #[test]
    fn empty_headers_are_ignored() {
        assert_eq!(header_string(Some(&HeaderValue::from_static(""))), None);
        assert_eq!(
            header_string(Some(&HeaderValue::from_static("abc"))).as_deref(),
            Some("abc")
        );
    }
}
