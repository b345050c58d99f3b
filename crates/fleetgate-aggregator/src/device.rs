//! Device-scoped calls routed through the owning plugin.
//!
//! Northbound ids of device resources are qualified with the device UUID
//! (`/redfish/v1/Systems/{uuid}:{id}`); plugins only know the bare `{id}`.

use std::sync::Arc;

use reqwest::Method;
use serde_json::{Map, Value, json};
use tracing::debug;

use crate::error::{AggregatorError, Result};
use crate::plugin::{ContactProtocol, PluginRequest, PluginResponse};
use crate::storage::{AggregatorDatabase, Device, Plugin};
use crate::translate::IdentityTranslator;

/// Resource collections whose members are device-qualified.
pub const DEVICE_COLLECTIONS: [&str; 3] = ["Systems", "Managers", "Chassis"];

/// Everything needed to talk to one device.
#[derive(Debug, Clone)]
pub struct DeviceContext {
    pub device: Device,
    pub plugin: Plugin,
    password: String,
}

impl DeviceContext {
    /// Device credentials as plugins expect them in request bodies.
    pub fn credentials(&self) -> Map<String, Value> {
        let mut map = Map::new();
        map.insert("ManagerAddress".into(), json!(self.device.manager_address));
        map.insert("UserName".into(), json!(self.device.username));
        map.insert("Password".into(), json!(self.password));
        map
    }

    /// `host` part of the device's manager address.
    pub fn host(&self) -> &str {
        &self.device.manager_address
    }
}

/// Split a device-qualified URL into the device UUID and the URL with the
/// qualifier removed. `None` when no path segment is qualified.
pub fn split_device_id(url: &str) -> Option<(String, String)> {
    let mut uuid = None;
    let stripped: Vec<&str> = url
        .split('/')
        .map(|segment| match segment.split_once(':') {
            Some((id, rest)) if uuid.is_none() && !id.is_empty() => {
                uuid = Some(id.to_string());
                rest
            }
            _ => segment,
        })
        .collect();
    uuid.map(|uuid| (uuid, stripped.join("/")))
}

/// Qualify every member link of the device collections with `uuid`.
pub fn qualify_ids(body: &str, uuid: &str) -> String {
    DEVICE_COLLECTIONS.iter().fold(body.to_string(), |acc, coll| {
        acc.replace(
            &format!("/redfish/v1/{coll}/"),
            &format!("/redfish/v1/{coll}/{uuid}:"),
        )
    })
}

pub struct DeviceContact {
    db: AggregatorDatabase,
    contact: Arc<ContactProtocol>,
    translator: Arc<IdentityTranslator>,
}

impl DeviceContact {
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

    pub const fn contact(&self) -> &Arc<ContactProtocol> {
        &self.contact
    }

    pub fn translator(&self) -> &IdentityTranslator {
        &self.translator
    }

    /// Load the device, its plugin and the device password.
    pub async fn context(&self, device_uuid: &str) -> Result<DeviceContext> {
        let device = self.db.get_device(device_uuid).await.map_err(|e| {
            if e.is_not_found() {
                AggregatorError::not_found("Device", device_uuid)
            } else {
                e.into()
            }
        })?;
        let plugin = self.db.get_plugin(&device.plugin_id).await.map_err(|e| {
            if e.is_not_found() {
                AggregatorError::not_found("Plugin", &device.plugin_id)
            } else {
                e.into()
            }
        })?;
        let password = self
            .contact
            .decryptor()
            .decrypt(&device.password)
            .map_err(|e| AggregatorError::Internal(format!("device {device_uuid}: {e}")))?;
        Ok(DeviceContext {
            device,
            plugin,
            password,
        })
    }

    /// Build a request for `path` whose body is the device credentials,
    /// merged with the fields of `extra` when it is an object.
    pub fn request(
        ctx: &DeviceContext,
        method: Method,
        path: impl Into<String>,
        extra: Option<&Value>,
    ) -> PluginRequest {
        let mut body = ctx.credentials();
        if let Some(Value::Object(fields)) = extra {
            body.extend(fields.iter().map(|(k, v)| (k.clone(), v.clone())));
        }
        PluginRequest::new(method, path).with_body(Value::Object(body).to_string().into_bytes())
    }

    /// Raw exchange for callers that branch on the status.
    pub async fn send(
        &self,
        ctx: &DeviceContext,
        request: &PluginRequest,
    ) -> Result<PluginResponse> {
        Ok(self.contact.send(&ctx.plugin, request).await?)
    }

    /// GET a device resource by its northbound URL (qualified or bare) and
    /// return the body in northbound, device-qualified form.
    pub async fn fetch(&self, ctx: &DeviceContext, northbound_url: &str) -> Result<Value> {
        let bare = split_device_id(northbound_url)
            .map_or_else(|| northbound_url.to_string(), |(_, url)| url);
        let path = self.translator.url_to_southbound(&bare);
        debug!(device_uuid = %ctx.device.uuid, path = %path, "Fetching device resource");

        let request = Self::request(ctx, Method::GET, path, None);
        let resp = self.contact.dispatch(&ctx.plugin, &request).await?;
        let body = String::from_utf8_lossy(&resp.body);
        let (_, body) = self.translator.to_northbound("", &body);
        let body = qualify_ids(&body, &ctx.device.uuid);
        serde_json::from_str(&body).map_err(|e| {
            AggregatorError::Internal(format!("invalid JSON from plugin {}: {e}", ctx.plugin.id))
        })
    }

    /// Resolve the device from a qualified URL and fetch the resource.
    pub async fn get_resource_info(&self, northbound_url: &str) -> Result<Value> {
        let (uuid, _) = split_device_id(northbound_url)
            .ok_or_else(|| AggregatorError::not_found("Resource", northbound_url))?;
        let ctx = self.context(&uuid).await?;
        self.fetch(&ctx, northbound_url).await
    }
}
