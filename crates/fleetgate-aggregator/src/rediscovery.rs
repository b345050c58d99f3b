//! Startup rediscovery: rebuild the resource inventory of every device the
//! aggregator knows but holds no resources for.

use std::sync::Arc;

use serde_json::Value;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use fleetgate_core::config::FanOutConfig;

use crate::device::{DEVICE_COLLECTIONS, DeviceContact};
use crate::error::{AggregatorError, Result};
use crate::events::{AggregatorEvent, EventPublisher};
use crate::storage::AggregatorDatabase;

/// Summary of one rediscovery pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RediscoveryReport {
    pub reconciled: usize,
    pub skipped: usize,
    pub failed: usize,
    /// `(device uuid, error)` for every device that failed with an error.
    pub failures: Vec<(String, String)>,
}

enum DeviceOutcome {
    Reconciled { stored: usize },
    Skipped,
}

pub struct RediscoveryCoordinator {
    db: AggregatorDatabase,
    devices: Arc<DeviceContact>,
    publisher: Arc<dyn EventPublisher>,
    max_concurrency: usize,
}

impl RediscoveryCoordinator {
    pub fn new(
        db: AggregatorDatabase,
        devices: Arc<DeviceContact>,
        publisher: Arc<dyn EventPublisher>,
        fan_out: &FanOutConfig,
    ) -> Self {
        Self {
            db,
            devices,
            publisher,
            max_concurrency: fan_out.max_concurrency.max(1),
        }
    }

    /// Reconcile every stored device concurrently and wait for all of them.
    /// A device failure never cancels the others.
    pub async fn run(&self) -> Result<RediscoveryReport> {
        let devices = self.db.list_devices().await?;
        info!(devices = devices.len(), "Starting rediscovery");

        let semaphore = Arc::new(Semaphore::new(self.max_concurrency));
        let mut set = JoinSet::new();
        for device in devices {
            let semaphore = Arc::clone(&semaphore);
            let db = self.db.clone();
            let contact = Arc::clone(&self.devices);
            let publisher = Arc::clone(&self.publisher);
            set.spawn(async move {
                let outcome = match semaphore.acquire_owned().await {
                    Ok(_permit) => {
                        rediscover_device(&db, &contact, publisher.as_ref(), &device.uuid).await
                    }
                    Err(_) => Err(AggregatorError::Internal("rediscovery pool closed".into())),
                };
                (device.uuid, outcome)
            });
        }

        let mut report = RediscoveryReport::default();
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((uuid, Ok(DeviceOutcome::Reconciled { stored }))) => {
                    info!(device_uuid = %uuid, stored, "Device rediscovered");
                    report.reconciled += 1;
                }
                Ok((_, Ok(DeviceOutcome::Skipped))) => report.skipped += 1,
                Ok((uuid, Err(e))) => {
                    warn!(device_uuid = %uuid, error = %e, "Device rediscovery failed");
                    report.failed += 1;
                    report.failures.push((uuid, e.to_string()));
                }
                Err(e) => {
                    error!(error = %e, "Rediscovery task panicked");
                    report.failed += 1;
                }
            }
        }
        report.failures.sort();

        info!(
            reconciled = report.reconciled,
            skipped = report.skipped,
            failed = report.failed,
            "Rediscovery finished"
        );
        Ok(report)
    }
}

async fn rediscover_device(
    db: &AggregatorDatabase,
    devices: &DeviceContact,
    publisher: &dyn EventPublisher,
    uuid: &str,
) -> Result<DeviceOutcome> {
    let ctx = devices.context(uuid).await?;
    if db.count_resources_for_device(uuid).await? > 0 {
        return Ok(DeviceOutcome::Skipped);
    }

    // Everything is fetched before anything is stored, so a device that
    // fails midway keeps an empty inventory and is retried next startup.
    let mut fetched = Vec::new();
    for collection in DEVICE_COLLECTIONS {
        let listing = devices
            .fetch(&ctx, &format!("/redfish/v1/{collection}"))
            .await?;
        for member in member_urls(&listing) {
            let body = devices.fetch(&ctx, &member).await?;
            fetched.push((member, collection.to_string(), body.to_string()));
        }
    }

    let written = db.insert_device_resources(uuid, &fetched).await?;
    let stored = written.len();
    for url in written {
        publisher.publish(AggregatorEvent::ResourceAdded {
            url,
            device_uuid: uuid.to_string(),
        });
    }
    Ok(DeviceOutcome::Reconciled { stored })
}

/// `@odata.id` of every entry in a collection's `Members`.
fn member_urls(collection: &Value) -> Vec<String> {
    collection["Members"]
        .as_array()
        .map(|members| {
            members
                .iter()
                .filter_map(|m| m["@odata.id"].as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default()
}

#[cfg(test)]
#[allow(clippy::panic, clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::events::BroadcastPublisher;
    use crate::plugin::{PluginResponse, PluginTransport, TransportError};
    use crate::storage::{AuthMode, NewDevice, NewPlugin};
    use crate::test_helpers::{
        RecordedCall, ScriptedTransport, connection_refused, contact_protocol, db_with_devices,
        json_response, test_plugin, token_response,
    };
    use crate::translate::IdentityTranslator;
    use serde_json::json;

    /// A plugin exposing one member in each device collection.
    fn healthy_plugin(call: &RecordedCall) -> std::result::Result<PluginResponse, TransportError> {
        match call.path.as_str() {
            "/ODIM/v1/Sessions" => token_response("tok"),
            "/ODIM/v1/Systems" | "/ODIM/v1/Managers" | "/ODIM/v1/Chassis" => json_response(
                200,
                &json!({"Members": [{"@odata.id": format!("{}/1", call.path)}]}),
            ),
            path => json_response(200, &json!({"@odata.id": path, "Id": "1"})),
        }
    }

    fn coordinator(
        db: &AggregatorDatabase,
        transport: Arc<dyn PluginTransport>,
        publisher: Arc<BroadcastPublisher>,
    ) -> RediscoveryCoordinator {
        let devices = Arc::new(DeviceContact::new(
            db.clone(),
            contact_protocol(transport),
            Arc::new(IdentityTranslator::default()),
        ));
        RediscoveryCoordinator::new(
            db.clone(),
            devices,
            publisher,
            &FanOutConfig { max_concurrency: 2 },
        )
    }

    #[tokio::test]
    async fn stores_device_qualified_resources_and_publishes() {
        let transport = ScriptedTransport::new(healthy_plugin);
        let plugin = test_plugin("GRF", AuthMode::TokenAuth);
        let db = db_with_devices(&plugin, &["d-1"]).await;
        let publisher = Arc::new(BroadcastPublisher::default());
        let mut events = publisher.subscribe();

        let report = coordinator(&db, transport, Arc::clone(&publisher))
            .run()
            .await
            .unwrap();
        assert_eq!(report.reconciled, 1);

        let record = db.get_resource("/redfish/v1/Systems/d-1:1").await.unwrap();
        assert_eq!(record.table_name, "Systems");
        assert_eq!(record.device_uuid.as_deref(), Some("d-1"));
        assert_eq!(record.json().unwrap()["@odata.id"], "/redfish/v1/Systems/d-1:1");
        assert_eq!(db.count_resources_for_device("d-1").await.unwrap(), 3);

        let mut urls = Vec::new();
        while let Ok(AggregatorEvent::ResourceAdded { url, device_uuid }) = events.try_recv() {
            assert_eq!(device_uuid, "d-1");
            urls.push(url);
        }
        urls.sort();
        assert_eq!(
            urls,
            vec![
                "/redfish/v1/Chassis/d-1:1",
                "/redfish/v1/Managers/d-1:1",
                "/redfish/v1/Systems/d-1:1",
            ]
        );
    }

    #[tokio::test]
    async fn devices_with_resources_are_skipped() {
        let transport = ScriptedTransport::new(healthy_plugin);
        let plugin = test_plugin("GRF", AuthMode::TokenAuth);
        let db = db_with_devices(&plugin, &["d-1", "d-2"]).await;
        db.upsert_resource("/redfish/v1/Systems/d-2:1", "Systems", Some("d-2"), "{}")
            .await
            .unwrap();

        let report = coordinator(&db, transport.clone(), Arc::new(BroadcastPublisher::default()))
            .run()
            .await
            .unwrap();
        assert_eq!((report.reconciled, report.skipped, report.failed), (1, 1, 0));
        assert!(transport.calls().iter().all(|c| c
            .body
            .as_ref()
            .is_none_or(|b| b["ManagerAddress"] != "10.0.0.2")));
    }

    #[tokio::test]
    async fn one_unreachable_plugin_fails_only_its_device() {
        let transport = ScriptedTransport::new(|call| {
            if call.host.starts_with("dead.") {
                connection_refused(call)
            } else {
                healthy_plugin(call)
            }
        });
        let plugin = test_plugin("GRF", AuthMode::TokenAuth);
        let db = db_with_devices(&plugin, &["d-1", "d-2", "d-3", "d-4"]).await;
        let dead = test_plugin("DEAD", AuthMode::TokenAuth);
        db.create_plugin(&NewPlugin {
            id: &dead.id,
            address: &dead.address,
            auth_mode: AuthMode::TokenAuth,
            username: &dead.username,
            password: &dead.password,
        })
        .await
        .unwrap();
        db.create_device(&NewDevice {
            uuid: "d-5",
            manager_address: "10.0.0.5",
            username: "root",
            password: b"device-secret",
            plugin_id: "DEAD",
        })
        .await
        .unwrap();

        let report = coordinator(&db, transport, Arc::new(BroadcastPublisher::default()))
            .run()
            .await
            .unwrap();
        assert_eq!(report.reconciled, 4);
        assert_eq!(report.failed, 1);
        assert_eq!(report.failures[0].0, "d-5");
        assert_eq!(db.count_resources_for_device("d-5").await.unwrap(), 0);
        for uuid in ["d-1", "d-2", "d-3", "d-4"] {
            assert_eq!(db.count_resources_for_device(uuid).await.unwrap(), 3);
        }
    }

    #[tokio::test]
    async fn device_failing_midway_stores_nothing_and_is_retried() {
        use std::sync::atomic::{AtomicBool, Ordering};

        let managers_down = Arc::new(AtomicBool::new(true));
        let down = Arc::clone(&managers_down);
        let transport = ScriptedTransport::new(move |call| {
            if call.path == "/ODIM/v1/Managers" && down.load(Ordering::SeqCst) {
                return json_response(500, &json!({"error": "managers unavailable"}));
            }
            healthy_plugin(call)
        });
        let plugin = test_plugin("GRF", AuthMode::TokenAuth);
        let db = db_with_devices(&plugin, &["d-1"]).await;
        let publisher = Arc::new(BroadcastPublisher::default());
        let mut events = publisher.subscribe();
        let rediscovery = coordinator(&db, transport, Arc::clone(&publisher));

        let first = rediscovery.run().await.unwrap();
        assert_eq!((first.reconciled, first.skipped, first.failed), (0, 0, 1));
        assert_eq!(db.count_resources_for_device("d-1").await.unwrap(), 0);
        assert!(events.try_recv().is_err());

        managers_down.store(false, Ordering::SeqCst);
        let second = rediscovery.run().await.unwrap();
        assert_eq!((second.reconciled, second.skipped, second.failed), (1, 0, 0));
        assert_eq!(db.count_resources_for_device("d-1").await.unwrap(), 3);
    }

    #[test]
    fn member_urls_ignores_malformed_entries() {
        let listing = json!({"Members": [{"@odata.id": "/a"}, {"Id": "x"}, 7]});
        assert_eq!(member_urls(&listing), vec!["/a"]);
        assert!(member_urls(&json!({})).is_empty());
    }
}
