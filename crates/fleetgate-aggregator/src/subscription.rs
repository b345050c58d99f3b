//! Bulk event-subscription bring-up.
//!
//! Every device is reconciled concurrently: the plugin is asked for the
//! device's current subscription, which is created, replaced or kept. Results
//! flow through a bounded channel to a single collector that builds the
//! `host -> subscription location` map and keeps the first error.

use std::collections::BTreeMap;
use std::sync::Arc;

use reqwest::Method;
use serde::Deserialize;
use serde_json::{Value, json};
use tokio::sync::{Semaphore, mpsc};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use fleetgate_core::config::{EventConfig, FanOutConfig};

use crate::device::{DeviceContact, DeviceContext};
use crate::error::{AggregatorError, Result};

pub const SUBSCRIPTIONS_PATH: &str = "/ODIM/v1/Subscriptions";

const RESULT_CHANNEL_CAPACITY: usize = 32;

/// Desired subscription state of one device.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SubscriptionTarget {
    #[serde(rename = "DeviceUUID")]
    pub device_uuid: String,
    #[serde(rename = "EventTypes", default)]
    pub event_types: Vec<String>,
}

pub struct SubscriptionReconciler {
    devices: Arc<DeviceContact>,
    destination: String,
    default_event_types: Vec<String>,
    max_concurrency: usize,
}

impl SubscriptionReconciler {
    pub fn new(devices: Arc<DeviceContact>, events: &EventConfig, fan_out: &FanOutConfig) -> Self {
        Self {
            devices,
            destination: events.destination.clone(),
            default_event_types: events.default_event_types.clone(),
            max_concurrency: fan_out.max_concurrency.max(1),
        }
    }

    /// Reconcile every target and return the subscription location per
    /// device host. The first device error fails the whole batch, after all
    /// devices have finished.
    pub async fn reconcile(
        self: &Arc<Self>,
        targets: Vec<SubscriptionTarget>,
    ) -> Result<BTreeMap<String, String>> {
        info!(devices = targets.len(), "Reconciling event subscriptions");
        let (tx, mut rx) = mpsc::channel::<(String, Result<String>)>(RESULT_CHANNEL_CAPACITY);

        let collector = tokio::spawn(async move {
            let mut locations = BTreeMap::new();
            let mut first_error = None;
            while let Some((host, outcome)) = rx.recv().await {
                match outcome {
                    Ok(location) => {
                        locations.insert(host, location);
                    }
                    Err(e) if first_error.is_none() => first_error = Some(e),
                    Err(e) => warn!(host = %host, error = %e, "Additional subscription failure"),
                }
            }
            (locations, first_error)
        });

        let semaphore = Arc::new(Semaphore::new(self.max_concurrency));
        let mut producers = JoinSet::new();
        for target in targets {
            let tx = tx.clone();
            let semaphore = Arc::clone(&semaphore);
            let this = Arc::clone(self);
            producers.spawn(async move {
                let outcome = match semaphore.acquire_owned().await {
                    Ok(_permit) => this.reconcile_device(&target).await,
                    Err(_) => (
                        target.device_uuid.clone(),
                        Err(AggregatorError::Internal("subscription pool closed".into())),
                    ),
                };
                if tx.send(outcome).await.is_err() {
                    warn!(device_uuid = %target.device_uuid, "Subscription collector gone");
                }
            });
        }
        drop(tx);

        let mut panicked = None;
        while let Some(joined) = producers.join_next().await {
            if let Err(e) = joined {
                error!(error = %e, "Subscription task panicked");
                panicked.get_or_insert_with(|| AggregatorError::Internal(e.to_string()));
            }
        }
        let (locations, first_error) = collector
            .await
            .map_err(|e| AggregatorError::Internal(format!("subscription collector failed: {e}")))?;

        match first_error.or(panicked) {
            Some(e) => Err(e),
            None => Ok(locations),
        }
    }

    /// Outcome for one device, keyed by its host (or its UUID when the
    /// device cannot be resolved).
    async fn reconcile_device(&self, target: &SubscriptionTarget) -> (String, Result<String>) {
        let ctx = match self.devices.context(&target.device_uuid).await {
            Ok(ctx) => ctx,
            Err(e) => return (target.device_uuid.clone(), Err(e)),
        };
        let outcome = self.reconcile_with(&ctx, &target.event_types).await;
        (ctx.host().to_string(), outcome)
    }

    async fn reconcile_with(&self, ctx: &DeviceContext, desired: &[String]) -> Result<String> {
        let request = DeviceContact::request(ctx, Method::GET, SUBSCRIPTIONS_PATH, None);
        let current = self.devices.send(ctx, &request).await?;

        match current.status {
            404 => {
                debug!(device_uuid = %ctx.device.uuid, "No subscription, creating default");
                self.create(ctx, &self.default_event_types).await
            }
            200 => {
                let body = current.json().map_err(|e| {
                    AggregatorError::Internal(format!(
                        "unreadable subscription of device {}: {e}",
                        ctx.device.uuid
                    ))
                })?;
                let existing = event_types(&body);
                if existing == desired {
                    debug!(device_uuid = %ctx.device.uuid, "Subscription up to date");
                    let location = body["@odata.id"].as_str().or(current.location.as_deref());
                    return Ok(self.northbound(location));
                }
                info!(
                    device_uuid = %ctx.device.uuid,
                    existing = ?existing,
                    desired = ?desired,
                    "Replacing subscription"
                );
                self.delete(ctx).await?;
                self.create(ctx, desired).await
            }
            status => Err(AggregatorError::PluginProtocol {
                status,
                body: current.body,
            }),
        }
    }

    async fn create(&self, ctx: &DeviceContext, event_types: &[String]) -> Result<String> {
        let extra = json!({
            "Destination": self.destination,
            "EventTypes": event_types,
            "Context": "Event Subscription",
            "Protocol": "Redfish",
        });
        let request = DeviceContact::request(ctx, Method::POST, SUBSCRIPTIONS_PATH, Some(&extra));
        let resp = self.devices.send(ctx, &request).await?;
        if !resp.is_success() {
            return Err(AggregatorError::PluginProtocol {
                status: resp.status,
                body: resp.body,
            });
        }
        let body = resp.json().unwrap_or(Value::Null);
        let location = resp.location.as_deref().or(body["@odata.id"].as_str());
        Ok(self.northbound(location))
    }

    async fn delete(&self, ctx: &DeviceContext) -> Result<()> {
        let request = DeviceContact::request(ctx, Method::DELETE, SUBSCRIPTIONS_PATH, None);
        let resp = self.devices.send(ctx, &request).await?;
        if matches!(resp.status, 200 | 201 | 204) {
            Ok(())
        } else {
            Err(AggregatorError::PluginProtocol {
                status: resp.status,
                body: resp.body,
            })
        }
    }

    fn northbound(&self, location: Option<&str>) -> String {
        location.map_or_else(String::new, |l| {
            self.devices.translator().url_to_northbound(l)
        })
    }
}

fn event_types(body: &Value) -> Vec<String> {
    body["EventTypes"]
        .as_array()
        .map(|types| {
            types
                .iter()
                .filter_map(|t| t.as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default()
}
