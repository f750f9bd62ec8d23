//! # switchboard-core
//!
//! Foundation types shared by every Switchboard crate:
//!
//! - **Branded IDs**: `BrowserConnectionId`, `UpstreamConnectionId`, `InstanceId`
//! - **Safe channels**: bounded, closeable, freezable queues with an explicit
//!   [`channel::FreezeGate`]
//! - **Protocol**: graphql-ws frame parsing/building, operation detection,
//!   streaming cursor patching and per-recipient frame templates
//! - **Logging**: `tracing` subscriber initialization

#![deny(unsafe_code)]

pub mod channel;
pub mod errors;
pub mod ids;
pub mod logging;
pub mod protocol;

pub use channel::{FreezeGate, SafeChannel};
pub use errors::ProtocolError;
pub use ids::{BrowserConnectionId, InstanceId, UpstreamConnectionId};
