//! Pass-through of northbound requests to the plugin that owns a resource.

use std::sync::Arc;

use reqwest::Method;
use serde_json::Value;
use tracing::{debug, instrument};

use crate::error::{AggregatorError, Result};
use crate::plugin::{ContactProtocol, PluginRequest};
use crate::storage::AggregatorDatabase;
use crate::translate::IdentityTranslator;

/// Plugin answer in northbound form.
#[derive(Debug, Clone, PartialEq)]
pub struct ProxyResponse {
    pub status: u16,
    pub location: Option<String>,
    /// Absent for `DELETE`.
    pub body: Option<Value>,
}

pub struct PluginProxy {
    db: AggregatorDatabase,
    contact: Arc<ContactProtocol>,
    translator: Arc<IdentityTranslator>,
}

impl PluginProxy {
    pub fn new(
        db: AggregatorDatabase,
        contact: Arc<ContactProtocol>,
        translator: Arc<IdentityTranslator>,
    ) -> Self {
        Self {
            db,
            contact,
            translator,
        }
    }

    /// Forward a request to `plugin_id`, translating URL, body and
    /// `Location` across the boundary.
    #[instrument(skip(self, body))]
    pub async fn forward(
        &self,
        plugin_id: &str,
        method: Method,
        url: &str,
        body: Option<&[u8]>,
    ) -> Result<ProxyResponse> {
        let plugin = self.db.get_plugin(plugin_id).await.map_err(|e| {
            if e.is_not_found() {
                AggregatorError::not_found("Plugin", plugin_id)
            } else {
                e.into()
            }
        })?;

        let raw = body
            .map(|b| String::from_utf8_lossy(b).into_owned())
            .unwrap_or_default();
        let (path, south_body) = self.translator.to_southbound(url, &raw);

        let mut request = PluginRequest::new(method.clone(), path);
        if !(method == Method::GET || method == Method::DELETE) && !south_body.trim().is_empty() {
            serde_json::from_str::<Value>(&south_body).map_err(|e| {
                AggregatorError::MalformedJson(format!(
                    "error while trying to get JSON request body: {e}"
                ))
            })?;
            request = request.with_body(south_body.into_bytes());
        }

        let resp = self.contact.dispatch(&plugin, &request).await?;
        debug!(status = resp.status, "Plugin answered");

        let location = resp.location.as_deref().unwrap_or_default();
        let (location, north_body) =
            self.translator
                .to_northbound(location, &String::from_utf8_lossy(&resp.body));
        let body = if method == Method::DELETE || north_body.trim().is_empty() {
            None
        } else {
            Some(serde_json::from_str(&north_body).map_err(|e| {
                AggregatorError::Internal(format!("invalid JSON from plugin {plugin_id}: {e}"))
            })?)
        };

        Ok(ProxyResponse {
            status: resp.status,
            location: (!location.is_empty()).then_some(location),
            body,
        })
    }

    /// Forward a request addressed to a fabric to its managing plugin.
    pub async fn forward_to_fabric(
        &self,
        fabric_id: &str,
        method: Method,
        url: &str,
        body: Option<&[u8]>,
    ) -> Result<ProxyResponse> {
        let fabric = self.db.get_fabric(fabric_id).await.map_err(|e| {
            if e.is_not_found() {
                AggregatorError::not_found("Fabric", fabric_id)
            } else {
                e.into()
            }
        })?;
        self.forward(&fabric.plugin_id, method, url, body).await
    }
}
