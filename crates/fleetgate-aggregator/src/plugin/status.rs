//! Plugin liveness probing.

use std::sync::Arc;

use tracing::{debug, info, warn};

use fleetgate_core::config::PluginStatusPolling;

use super::client::PluginTransport;
use super::types::{Credential, PluginRequest};
use crate::storage::Plugin;

/// Southbound status endpoint every plugin serves.
pub const STATUS_PATH: &str = "/ODIM/v1/Status";

/// Polls a plugin's status endpoint after a failed call.
pub struct StatusProbe {
    transport: Arc<dyn PluginTransport>,
    scheme: String,
    polling: PluginStatusPolling,
}

impl StatusProbe {
    pub fn new(
        transport: Arc<dyn PluginTransport>,
        scheme: impl Into<String>,
        polling: PluginStatusPolling,
    ) -> Self {
        Self {
            transport,
            scheme: scheme.into(),
            polling,
        }
    }

    /// `true` as soon as one probe answers 200; `false` after
    /// `max_retry_attempt` failed probes.
    pub async fn check_status(&self, plugin: &Plugin) -> bool {
        let url = format!("{}://{}{STATUS_PATH}", self.scheme, plugin.address);
        let request = PluginRequest::get(STATUS_PATH).with_timeout(self.polling.response_timeout());
        let attempts = self.polling.max_retry_attempt.max(1);

        for attempt in 1..=attempts {
            match self.transport.call(&url, &request, &Credential::None).await {
                Ok(resp) if resp.status == 200 => {
                    info!(plugin_id = %plugin.id, attempt, "Plugin is up");
                    return true;
                }
                Ok(resp) => {
                    debug!(
                        plugin_id = %plugin.id,
                        attempt,
                        status = resp.status,
                        "Plugin status not OK"
                    );
                }
                Err(e) => {
                    debug!(
                        plugin_id = %plugin.id,
                        attempt,
                        error = %e,
                        "Plugin status check failed"
                    );
                }
            }
            if attempt < attempts {
                tokio::time::sleep(self.polling.retry_interval()).await;
            }
        }

        warn!(plugin_id = %plugin.id, attempts, "Plugin did not recover");
        false
    }
}
