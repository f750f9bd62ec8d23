//! In-process bus backed by one `broadcast` channel per topic.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc};
use tracing::warn;

use crate::errors::BusError;
use crate::{BusSubscription, EventBus};

const DEFAULT_TOPIC_CAPACITY: usize = 1024;

/// Process-local bus. Publishing to a topic nobody listens on succeeds and
/// the payload is dropped, like Redis `PUBLISH` with zero subscribers.
#[derive(Debug)]
pub struct MemoryBus {
    topics: Mutex<HashMap<String, broadcast::Sender<String>>>,
    capacity: usize,
}

impl MemoryBus {
    /// Create a bus whose topics buffer [`DEFAULT_TOPIC_CAPACITY`] payloads.
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_TOPIC_CAPACITY)
    }

    /// Create a bus with a custom per-topic buffer.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            topics: Mutex::new(HashMap::new()),
            capacity: capacity.max(1),
        }
    }

    fn topic(&self, name: &str) -> broadcast::Sender<String> {
        self.topics
            .lock()
            .entry(name.to_owned())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .clone()
    }
}

impl Default for MemoryBus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EventBus for MemoryBus {
    async fn subscribe(&self, topic: &str) -> Result<BusSubscription, BusError> {
        let mut source = self.topic(topic).subscribe();
        let (tx, rx) = mpsc::channel(self.capacity);
        let topic = topic.to_owned();

        let _ = tokio::spawn(async move {
            loop {
                let item = match source.recv().await {
                    Ok(payload) => Ok(payload),
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!(%topic, skipped = n, "memory bus subscriber lagged");
                        Err(BusError::Receive(format!("lagged by {n} messages")))
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                };
                if tx.send(item).await.is_err() {
                    break;
                }
            }
        });

        Ok(BusSubscription::new(rx))
    }

    async fn publish(&self, topic: &str, payload: String) -> Result<(), BusError> {
        // Err only means there are no receivers right now.
        let _ = self.topic(topic).send(payload);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use std::time::Duration;

    #[tokio::test]
    async fn publish_reaches_subscriber() {
        let bus = MemoryBus::new();
        let mut sub = bus.subscribe("a").await.unwrap();
        bus.publish("a", "hello".into()).await.unwrap();
        assert_eq!(sub.recv().await.unwrap().unwrap(), "hello");
    }

    #[tokio::test]
    async fn topics_are_isolated() {
        let bus = MemoryBus::new();
        let mut sub = bus.subscribe("a").await.unwrap();
        bus.publish("b", "other".into()).await.unwrap();
        bus.publish("a", "mine".into()).await.unwrap();
        assert_eq!(sub.recv().await.unwrap().unwrap(), "mine");
    }

    #[tokio::test]
    async fn fan_out_to_every_subscriber() {
        let bus = MemoryBus::new();
        let mut s1 = bus.subscribe("t").await.unwrap();
        let mut s2 = bus.subscribe("t").await.unwrap();
        bus.publish("t", "x".into()).await.unwrap();
        assert_eq!(s1.recv().await.unwrap().unwrap(), "x");
        assert_eq!(s2.recv().await.unwrap().unwrap(), "x");
    }

    #[tokio::test]
    async fn publish_without_subscribers_is_ok() {
        let bus = MemoryBus::new();
        assert!(bus.publish("nobody", "x".into()).await.is_ok());
    }

    #[tokio::test]
    async fn lag_surfaces_as_receive_error_then_continues() {
        let bus = MemoryBus::with_capacity(2);
        let mut sub = bus.subscribe("t").await.unwrap();
        // Give the forwarder a chance to park on the broadcast receiver
        // before flooding, then overflow the 2-slot ring.
        tokio::time::sleep(Duration::from_millis(10)).await;
        for i in 0..8 {
            bus.publish("t", i.to_string()).await.unwrap();
        }
        let mut saw_error = false;
        let mut last = None;
        while let Ok(Some(item)) = tokio::time::timeout(Duration::from_millis(50), sub.recv()).await {
            match item {
                Err(e) => {
                    assert_matches!(e, BusError::Receive(_));
                    saw_error = true;
                }
                Ok(p) => last = Some(p),
            }
        }
        assert!(saw_error);
        assert_eq!(last.as_deref(), Some("7"));
    }
}
