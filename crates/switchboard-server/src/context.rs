//! Process-scoped components shared by every session and the dispatcher.

use std::sync::Arc;
use std::time::Instant;

use metrics_exporter_prometheus::PrometheusHandle;

use switchboard_bus::Publisher;

use crate::config::RelayConfig;
use crate::connection::ConnectionManager;
use crate::presence::PresenceCache;
use crate::shutdown::ShutdownCoordinator;
use crate::transport::UpstreamConnector;
use crate::websocket::auth::{ClaimHeaderResolver, SessionResolver};

/// Handles to everything a session or handler needs. Built once at startup.
pub struct RelayContext {
    /// Resolved configuration.
    pub config: RelayConfig,
    /// Live browser connections.
    pub connections: Arc<ConnectionManager>,
    /// Last-known cursors.
    pub presence: Arc<PresenceCache>,
    /// Outbound bus messages.
    pub publisher: Publisher,
    /// Dials the engine.
    pub connector: Arc<dyn UpstreamConnector>,
    /// Maps upgrade requests to sessions.
    pub resolver: Arc<dyn SessionResolver>,
    /// Relay-wide shutdown.
    pub shutdown: Arc<ShutdownCoordinator>,
    /// Process start.
    pub start_time: Instant,
    /// Prometheus handle, when a recorder is installed.
    pub metrics: Option<PrometheusHandle>,
}

impl RelayContext {
    /// Create a context with fresh registries and the claim-header resolver.
    pub fn new(
        config: RelayConfig,
        publisher: Publisher,
        connector: Arc<dyn UpstreamConnector>,
    ) -> Self {
        Self {
            config,
            connections: Arc::new(ConnectionManager::new()),
            presence: Arc::new(PresenceCache::new()),
            publisher,
            connector,
            resolver: Arc::new(ClaimHeaderResolver),
            shutdown: Arc::new(ShutdownCoordinator::new()),
            start_time: Instant::now(),
            metrics: None,
        }
    }

    /// Replace the session resolver.
    #[must_use]
    pub fn with_resolver(mut self, resolver: Arc<dyn SessionResolver>) -> Self {
        self.resolver = resolver;
        self
    }

    /// Serve `/metrics` from `handle`.
    #[must_use]
    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics = Some(handle);
        self
    }
}

impl std::fmt::Debug for RelayContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelayContext")
            .field("config", &self.config)
            .field("connections", &self.connections.connection_count())
            .field("publisher", &self.publisher)
            .finish_non_exhaustive()
    }
}
