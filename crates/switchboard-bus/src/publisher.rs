//! Outbound publishing bound to one topic and one instance id.

use std::sync::Arc;

use tracing::{debug, warn};

use switchboard_core::InstanceId;

use crate::EventBus;
use crate::errors::BusError;
use crate::outbound::OutboundEvent;

/// Stamps [`OutboundEvent`]s with the instance id and a timestamp and puts
/// them on the outbound topic.
#[derive(Clone)]
pub struct Publisher {
    bus: Arc<dyn EventBus>,
    topic: String,
    instance_id: InstanceId,
}

impl Publisher {
    /// Create a publisher for `topic`.
    pub fn new(bus: Arc<dyn EventBus>, topic: impl Into<String>, instance_id: InstanceId) -> Self {
        Self {
            bus,
            topic: topic.into(),
            instance_id,
        }
    }

    /// This process's instance id.
    pub fn instance_id(&self) -> &InstanceId {
        &self.instance_id
    }

    /// Publish and wait for the bus to accept the message.
    pub async fn publish(&self, event: &OutboundEvent) -> Result<(), BusError> {
        let timestamp = chrono::Utc::now().timestamp_millis();
        let message = event.to_envelope(&self.instance_id, timestamp).to_string();
        self.bus.publish(&self.topic, message).await?;
        debug!(event = event.name(), topic = %self.topic, "bus message published");
        Ok(())
    }

    /// Publish on a background task; failures are logged.
    pub fn publish_detached(&self, event: OutboundEvent) {
        let publisher = self.clone();
        let _ = tokio::spawn(async move {
            if let Err(e) = publisher.publish(&event).await {
                warn!(event = event.name(), error = %e, "bus publish failed");
            }
        });
    }
}

impl std::fmt::Debug for Publisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Publisher")
            .field("topic", &self.topic)
            .field("instance_id", &self.instance_id)
            .finish_non_exhaustive()
    }
}
