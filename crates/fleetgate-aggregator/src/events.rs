//! Aggregator events published to interested subscribers.

use tokio::sync::broadcast;
use tracing::debug;

/// Capacity of the in-process event channel.
pub const EVENT_BROADCAST_CAPACITY: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AggregatorEvent {
    /// A resource was added to the inventory.
    ResourceAdded { url: String, device_uuid: String },
}

/// Publishing capability. Delivery is best effort.
pub trait EventPublisher: Send + Sync {
    fn publish(&self, event: AggregatorEvent);
}

/// In-process publisher backed by a `broadcast` channel.
#[derive(Debug, Clone)]
pub struct BroadcastPublisher {
    tx: broadcast::Sender<AggregatorEvent>,
}

impl BroadcastPublisher {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<AggregatorEvent> {
        self.tx.subscribe()
    }
}

impl Default for BroadcastPublisher {
    fn default() -> Self {
        Self::new(EVENT_BROADCAST_CAPACITY)
    }
}

impl EventPublisher for BroadcastPublisher {
    fn publish(&self, event: AggregatorEvent) {
        // No receivers is not an error.
        if self.tx.send(event).is_err() {
            debug!("Event dropped, no subscribers");
        }
    }
}
