//! Redis pub/sub bus.
//!
//! Subscriptions run on a dedicated pub/sub connection per topic. When that
//! connection drops, a `Receive` error is pushed to the subscriber and the
//! listener re-dials until it is subscribed again or the subscriber goes
//! away. Publishing shares one multiplexed connection, re-established lazily
//! after a failure.

use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use redis::AsyncCommands;
use redis::aio::MultiplexedConnection;
use tokio::sync::{Mutex, mpsc};
use tracing::{debug, info, warn};

use crate::errors::BusError;
use crate::{BusSubscription, EventBus};

const SUBSCRIPTION_BUFFER: usize = 1024;

/// Redis-backed [`EventBus`].
pub struct RedisBus {
    client: redis::Client,
    publisher: Mutex<Option<MultiplexedConnection>>,
    resubscribe_delay: Duration,
}

impl RedisBus {
    /// Validate `url` and build a bus. No connection is opened yet.
    pub fn new(url: &str) -> Result<Self, BusError> {
        let client = redis::Client::open(url).map_err(|e| BusError::Connect(e.to_string()))?;
        Ok(Self {
            client,
            publisher: Mutex::new(None),
            resubscribe_delay: Duration::from_secs(1),
        })
    }

    /// Pause between resubscribe attempts.
    #[must_use]
    pub fn with_resubscribe_delay(mut self, delay: Duration) -> Self {
        self.resubscribe_delay = delay;
        self
    }

    async fn publisher(&self) -> Result<MultiplexedConnection, BusError> {
        let mut slot = self.publisher.lock().await;
        if let Some(conn) = slot.as_ref() {
            return Ok(conn.clone());
        }
        let conn = self
            .client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| BusError::Connect(e.to_string()))?;
        *slot = Some(conn.clone());
        Ok(conn)
    }
}

async fn open_pubsub(client: &redis::Client, topic: &str) -> Result<redis::aio::PubSub, BusError> {
    let subscribe_err = |e: redis::RedisError| BusError::Subscribe {
        topic: topic.to_owned(),
        reason: e.to_string(),
    };
    let mut pubsub = client.get_async_pubsub().await.map_err(subscribe_err)?;
    pubsub.subscribe(topic).await.map_err(subscribe_err)?;
    Ok(pubsub)
}

#[async_trait]
impl EventBus for RedisBus {
    async fn subscribe(&self, topic: &str) -> Result<BusSubscription, BusError> {
        let mut pubsub = open_pubsub(&self.client, topic).await?;
        info!(%topic, "subscribed to redis channel");

        let (tx, rx) = mpsc::channel(SUBSCRIPTION_BUFFER);
        let client = self.client.clone();
        let topic = topic.to_owned();
        let delay = self.resubscribe_delay;

        let _ = tokio::spawn(async move {
            loop {
                {
                    let mut messages = pubsub.on_message();
                    while let Some(msg) = messages.next().await {
                        let item = msg
                            .get_payload::<String>()
                            .map_err(|e| BusError::Receive(e.to_string()));
                        if tx.send(item).await.is_err() {
                            return;
                        }
                    }
                }

                let lost = BusError::Receive(format!("redis subscription to `{topic}` lost"));
                if tx.send(Err(lost)).await.is_err() {
                    return;
                }

                pubsub = loop {
                    tokio::time::sleep(delay).await;
                    if tx.is_closed() {
                        return;
                    }
                    match open_pubsub(&client, &topic).await {
                        Ok(p) => {
                            info!(%topic, "resubscribed to redis channel");
                            break p;
                        }
                        Err(e) => warn!(%topic, error = %e, "redis resubscribe failed"),
                    }
                };
            }
        });

        Ok(BusSubscription::new(rx))
    }

    async fn publish(&self, topic: &str, payload: String) -> Result<(), BusError> {
        let mut conn = self.publisher().await?;
        let result: redis::RedisResult<i64> = conn.publish(topic, payload).await;
        match result {
            Ok(receivers) => {
                debug!(%topic, receivers, "redis publish");
                Ok(())
            }
            Err(e) => {
                // Drop the cached connection so the next publish re-dials.
                *self.publisher.lock().await = None;
                Err(BusError::Publish {
                    topic: topic.to_owned(),
                    reason: e.to_string(),
                })
            }
        }
    }
}

impl std::fmt::Debug for RedisBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisBus")
            .field("resubscribe_delay", &self.resubscribe_delay)
            .finish_non_exhaustive()
    }
}
