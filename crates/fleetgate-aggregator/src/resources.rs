//! Managers and fabrics as seen from the northbound API.
//!
//! Three kinds of manager live under `/redfish/v1/Managers`: the aggregator
//! itself (id = root service UUID), plugin managers (id = plugin-assigned,
//! no `:`), and device managers (`{device uuid}:{id}`).

use std::sync::Arc;

use reqwest::Method;
use serde_json::{Value, json};
use tracing::{info, warn};

use crate::device::DeviceContact;
use crate::error::{AggregatorError, Result};
use crate::proxy::PluginProxy;
use crate::storage::{AggregatorDatabase, ResourceRecord};

const MANAGERS_TABLE: &str = "Managers";

pub struct ResourceService {
    db: AggregatorDatabase,
    devices: Arc<DeviceContact>,
    proxy: Arc<PluginProxy>,
    root_service_uuid: String,
}

impl ResourceService {
    pub fn new(
        db: AggregatorDatabase,
        devices: Arc<DeviceContact>,
        proxy: Arc<PluginProxy>,
        root_service_uuid: impl Into<String>,
    ) -> Self {
        Self {
            db,
            devices,
            proxy,
            root_service_uuid: root_service_uuid.into(),
        }
    }

    /// The aggregator's own manager.
    pub fn own_manager(&self) -> Value {
        let uuid = &self.root_service_uuid;
        json!({
            "@odata.context": "/redfish/v1/$metadata#Manager.Manager",
            "@odata.id": format!("/redfish/v1/Managers/{uuid}"),
            "@odata.type": "#Manager.v1_10_0.Manager",
            "Id": uuid,
            "Name": "fleetgate",
            "ManagerType": "Service",
            "UUID": uuid,
            "FirmwareVersion": env!("CARGO_PKG_VERSION"),
            "Status": {"State": "Enabled", "Health": "OK"},
        })
    }

    pub async fn managers_collection(&self) -> Result<Value> {
        let mut members = vec![json!({
            "@odata.id": format!("/redfish/v1/Managers/{}", self.root_service_uuid)
        })];
        members.extend(
            self.db
                .list_resources_by_table(MANAGERS_TABLE)
                .await?
                .into_iter()
                .map(|r| json!({"@odata.id": r.url})),
        );
        Ok(json!({
            "@odata.context": "/redfish/v1/$metadata#ManagerCollection.ManagerCollection",
            "@odata.id": "/redfish/v1/Managers",
            "@odata.type": "#ManagerCollection.ManagerCollection",
            "Name": "Managers",
            "Members@odata.count": members.len(),
            "Members": members,
        }))
    }

    pub async fn get_manager(&self, url: &str, manager_id: &str) -> Result<Value> {
        if manager_id == self.root_service_uuid {
            return Ok(self.own_manager());
        }
        if !manager_id.contains(':') {
            return self.plugin_manager(url, manager_id).await;
        }

        let record = self.stored(url, manager_id).await?;
        let mut data = record
            .json()
            .map_err(|e| AggregatorError::Internal(format!("stored manager {url}: {e}")))?;
        let manager_type = data["ManagerType"].as_str().unwrap_or_default();
        if !(manager_type.is_empty() || manager_type == "Service") {
            match self.devices.get_resource_info(url).await {
                Ok(live) => data = live,
                Err(e) => {
                    warn!(url = %url, error = %e, "Manager unreachable, marking absent");
                    data["Status"] = json!({"State": "Absent"});
                }
            }
            self.db
                .upsert_resource(
                    url,
                    MANAGERS_TABLE,
                    record.device_uuid.as_deref(),
                    &data.to_string(),
                )
                .await?;
        }
        Ok(data)
    }

    /// Sub-resource of a manager: the stored record, else a live fetch.
    pub async fn get_manager_resource(&self, url: &str, manager_id: &str) -> Result<Value> {
        if !manager_id.contains(':') && manager_id != self.root_service_uuid {
            return self.plugin_manager(url, manager_id).await;
        }
        match self.db.get_resource(url).await {
            Ok(record) => record
                .json()
                .map_err(|e| AggregatorError::Internal(format!("stored resource {url}: {e}"))),
            Err(e) if e.is_not_found() => {
                self.devices.get_resource_info(url).await.map_err(|e| {
                    info!(url = %url, error = %e, "Manager resource not found on device");
                    AggregatorError::not_found(resource_table(url, manager_id), manager_id)
                })
            }
            Err(e) => Err(e.into()),
        }
    }

    pub async fn fabrics_collection(&self) -> Result<Value> {
        let members: Vec<Value> = self
            .db
            .list_fabrics()
            .await?
            .into_iter()
            .map(|f| json!({"@odata.id": format!("/redfish/v1/Fabrics/{}", f.fabric_uuid)}))
            .collect();
        Ok(json!({
            "@odata.context": "/redfish/v1/$metadata#FabricCollection.FabricCollection",
            "@odata.id": "/redfish/v1/Fabrics",
            "@odata.type": "#FabricCollection.FabricCollection",
            "Name": "Fabric Collection",
            "Members@odata.count": members.len(),
            "Members": members,
        }))
    }

    /// Plugin managers are stored with the plugin ID as `Name`; the request
    /// goes to that plugin.
    async fn plugin_manager(&self, url: &str, manager_id: &str) -> Result<Value> {
        let manager_url = format!("/redfish/v1/Managers/{manager_id}");
        let record = self.stored(&manager_url, manager_id).await?;
        let data = record
            .json()
            .map_err(|e| AggregatorError::Internal(format!("stored manager {manager_url}: {e}")))?;
        let plugin_id = data["Name"]
            .as_str()
            .ok_or_else(|| AggregatorError::Internal(format!("manager {manager_id} has no Name")))?;
        let resp = self.proxy.forward(plugin_id, Method::GET, url, None).await?;
        Ok(resp.body.unwrap_or(Value::Null))
    }

    async fn stored(&self, url: &str, manager_id: &str) -> Result<ResourceRecord> {
        self.db.get_resource(url).await.map_err(|e| {
            if e.is_not_found() {
                AggregatorError::not_found(MANAGERS_TABLE, manager_id)
            } else {
                e.into()
            }
        })
    }
}

/// Collection name a manager sub-resource belongs to, e.g. `EthernetInterfaces`
/// for `/redfish/v1/Managers/{id}/EthernetInterfaces/1`.
fn resource_table(url: &str, manager_id: &str) -> String {
    url.split('/')
        .skip_while(|s| *s != manager_id)
        .nth(1)
        .unwrap_or(MANAGERS_TABLE)
        .to_string()
}

#[cfg(test)]
#[allow(clippy::panic, clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::storage::AuthMode;
    use crate::test_helpers::{
        ScriptedTransport, connection_refused, contact_protocol, db_with_devices, json_response,
        status_response, test_plugin, token_response,
    };
    use crate::translate::IdentityTranslator;

    const ROOT: &str = "root-uuid";

    async fn service(
        transport: Arc<ScriptedTransport>,
        devices: &[&str],
    ) -> (ResourceService, AggregatorDatabase) {
        let plugin = test_plugin("GRF", AuthMode::TokenAuth);
        let db = db_with_devices(&plugin, devices).await;
        let contact = contact_protocol(transport);
        let translator = Arc::new(IdentityTranslator::default());
        let devices = Arc::new(DeviceContact::new(
            db.clone(),
            Arc::clone(&contact),
            Arc::clone(&translator),
        ));
        let proxy = Arc::new(PluginProxy::new(db.clone(), contact, translator));
        (ResourceService::new(db.clone(), devices, proxy, ROOT), db)
    }

    #[tokio::test]
    async fn collection_lists_self_then_stored_managers() {
        let transport = ScriptedTransport::new(|_| status_response(200));
        let (svc, db) = service(transport, &["d-1"]).await;
        db.upsert_resource("/redfish/v1/Managers/d-1:1", "Managers", Some("d-1"), "{}")
            .await
            .unwrap();

        let coll = svc.managers_collection().await.unwrap();
        assert_eq!(coll["Members@odata.count"], 2);
        assert_eq!(coll["Members"][0]["@odata.id"], "/redfish/v1/Managers/root-uuid");
        assert_eq!(coll["Members"][1]["@odata.id"], "/redfish/v1/Managers/d-1:1");
    }

    #[tokio::test]
    async fn root_id_is_own_manager() {
        let transport = ScriptedTransport::new(|_| status_response(200));
        let (svc, _) = service(transport.clone(), &[]).await;
        let m = svc.get_manager("/redfish/v1/Managers/root-uuid", ROOT).await.unwrap();
        assert_eq!(m["ManagerType"], "Service");
        assert_eq!(m["UUID"], ROOT);
        assert!(transport.calls().is_empty());
    }

    #[tokio::test]
    async fn device_manager_is_refreshed_and_saved() {
        let transport = ScriptedTransport::new(|call| match call.path.as_str() {
            "/ODIM/v1/Sessions" => token_response("tok"),
            _ => json_response(
                200,
                &json!({"@odata.id": "/ODIM/v1/Managers/1", "ManagerType": "BMC", "FirmwareVersion": "2.0"}),
            ),
        });
        let (svc, db) = service(transport, &["d-1"]).await;
        let url = "/redfish/v1/Managers/d-1:1";
        db.upsert_resource(
            url,
            "Managers",
            Some("d-1"),
            r#"{"ManagerType":"BMC","FirmwareVersion":"1.0"}"#,
        )
        .await
        .unwrap();

        let m = svc.get_manager(url, "d-1:1").await.unwrap();
        assert_eq!(m["FirmwareVersion"], "2.0");
        assert_eq!(m["@odata.id"], url);
        let saved = db.get_resource(url).await.unwrap().json().unwrap();
        assert_eq!(saved["FirmwareVersion"], "2.0");
    }

    #[tokio::test]
    async fn unreachable_device_manager_is_marked_absent() {
        let transport = ScriptedTransport::new(connection_refused);
        let (svc, db) = service(transport, &["d-1"]).await;
        let url = "/redfish/v1/Managers/d-1:1";
        db.upsert_resource(url, "Managers", Some("d-1"), r#"{"ManagerType":"BMC"}"#)
            .await
            .unwrap();

        let m = svc.get_manager(url, "d-1:1").await.unwrap();
        assert_eq!(m["Status"]["State"], "Absent");
        let saved = db.get_resource(url).await.unwrap().json().unwrap();
        assert_eq!(saved["Status"]["State"], "Absent");
    }

    #[tokio::test]
    async fn service_managers_are_not_refreshed() {
        let transport = ScriptedTransport::new(|_| status_response(500));
        let (svc, db) = service(transport.clone(), &["d-1"]).await;
        let url = "/redfish/v1/Managers/d-1:1";
        db.upsert_resource(url, "Managers", Some("d-1"), r#"{"ManagerType":"Service"}"#)
            .await
            .unwrap();

        svc.get_manager(url, "d-1:1").await.unwrap();
        assert!(transport.calls().is_empty());
    }

    #[tokio::test]
    async fn plugin_manager_is_forwarded_to_its_plugin() {
        let transport = ScriptedTransport::new(|call| match call.path.as_str() {
            "/ODIM/v1/Sessions" => token_response("tok"),
            path => json_response(200, &json!({"@odata.id": path, "Name": "GRF"})),
        });
        let (svc, db) = service(transport.clone(), &[]).await;
        db.upsert_resource("/redfish/v1/Managers/grf-mgr", "Managers", None, r#"{"Name":"GRF"}"#)
            .await
            .unwrap();

        let m = svc
            .get_manager("/redfish/v1/Managers/grf-mgr", "grf-mgr")
            .await
            .unwrap();
        assert_eq!(m["@odata.id"], "/redfish/v1/Managers/grf-mgr");
        assert!(transport.calls().iter().any(|c| c.host == "grf.plugin:45001"));
    }

    #[tokio::test]
    async fn missing_manager_resource_is_not_found_with_table() {
        let transport = ScriptedTransport::new(|call| match call.path.as_str() {
            "/ODIM/v1/Sessions" => token_response("tok"),
            _ => status_response(404),
        });
        let (svc, _) = service(transport, &["d-1"]).await;

        let err = svc
            .get_manager_resource("/redfish/v1/Managers/d-1:1/EthernetInterfaces/1", "d-1:1")
            .await
            .unwrap_err();
        let AggregatorError::ResourceNotFound { resource, id } = err else {
            panic!("expected not found");
        };
        assert_eq!(resource, "EthernetInterfaces");
        assert_eq!(id, "d-1:1");
    }

    #[tokio::test]
    async fn stored_manager_resource_is_served_without_contact() {
        let transport = ScriptedTransport::new(|_| status_response(500));
        let (svc, db) = service(transport.clone(), &["d-1"]).await;
        let url = "/redfish/v1/Managers/d-1:1/NetworkProtocol";
        db.upsert_resource(url, "NetworkProtocol", Some("d-1"), r#"{"Id":"NetworkProtocol"}"#)
            .await
            .unwrap();

        let r = svc.get_manager_resource(url, "d-1:1").await.unwrap();
        assert_eq!(r["Id"], "NetworkProtocol");
        assert!(transport.calls().is_empty());
    }

    #[tokio::test]
    async fn fabrics_collection_lists_known_fabrics() {
        let transport = ScriptedTransport::new(|_| status_response(200));
        let (svc, db) = service(transport, &[]).await;
        db.create_fabric("f-1", "GRF").await.unwrap();
        let coll = svc.fabrics_collection().await.unwrap();
        assert_eq!(coll["Members"], json!([{"@odata.id": "/redfish/v1/Fabrics/f-1"}]));
    }
}
