//! # switchboard-server
//!
//! The relay itself.
//!
//! - [`connection`]: browser/upstream connection entities, the per-connection
//!   subscription registry and the process-wide connection manager
//! - [`retransmit`]: replay of live subscriptions onto a fresh upstream
//! - [`streaming`] and [`presence`]: relay-served cursor streams
//! - [`dispatcher`]: control-plane events from the bus
//! - [`websocket`]: browser sessions and the per-browser upstream supervisor
//! - [`transport`]: frame reader/writer seams over axum and tungstenite
//! - [`server`]: axum router, health, metrics, graceful shutdown

#![deny(unsafe_code)]

pub mod config;
pub mod connection;
pub mod context;
pub mod dispatcher;
pub mod errors;
pub mod health;
pub mod metrics;
pub mod presence;
pub mod retransmit;
pub mod server;
pub mod shutdown;
pub mod streaming;
pub mod transport;
pub mod websocket;

pub use config::RelayConfig;
pub use context::RelayContext;
pub use dispatcher::Dispatcher;
pub use errors::{SessionError, TransportError};
pub use server::RelayServer;
