//! # switchboard-bus
//!
//! The control-plane channel between the relay and the rest of the
//! conferencing backend.
//!
//! - [`EventBus`]: publish/subscribe over named topics
//! - [`MemoryBus`]: in-process implementation for tests and single-node runs
//! - `RedisBus` (feature `redis`): Redis pub/sub with automatic resubscribe
//! - [`message`]: decoding of the inbound events the relay acts on
//! - [`outbound`] and [`Publisher`]: events the relay emits

#![deny(unsafe_code)]

pub mod errors;
pub mod memory;
pub mod message;
pub mod outbound;
pub mod publisher;
#[cfg(feature = "redis")]
pub mod redis_bus;

pub use errors::BusError;
pub use memory::MemoryBus;
pub use message::{CursorPosition, InboundEvent, parse_inbound};
pub use outbound::OutboundEvent;
pub use publisher::Publisher;
#[cfg(feature = "redis")]
pub use redis_bus::RedisBus;

use async_trait::async_trait;
use tokio::sync::mpsc;

/// A publish/subscribe transport.
#[async_trait]
pub trait EventBus: Send + Sync {
    /// Start listening on `topic`.
    ///
    /// Failing to establish the subscription is an error. Later receive
    /// failures surface as `Err` items on the returned subscription.
    async fn subscribe(&self, topic: &str) -> Result<BusSubscription, BusError>;

    /// Publish a raw payload on `topic`.
    async fn publish(&self, topic: &str, payload: String) -> Result<(), BusError>;
}

/// Stream of raw payloads from one topic.
///
/// Dropping it stops the background listener.
#[derive(Debug)]
pub struct BusSubscription {
    rx: mpsc::Receiver<Result<String, BusError>>,
}

impl BusSubscription {
    /// Wrap the receiving end fed by a bus implementation.
    pub fn new(rx: mpsc::Receiver<Result<String, BusError>>) -> Self {
        Self { rx }
    }

    /// Next payload or receive error. `None` once the bus is gone for good.
    pub async fn recv(&mut self) -> Option<Result<String, BusError>> {
        self.rx.recv().await
    }
}
