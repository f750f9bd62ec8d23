//! Control-plane dispatcher.
//!
//! One long-lived subscription on the inbound bus topic. Each recognized
//! message is decoded into an [`InboundEvent`] and handled on its own task;
//! a semaphore bounds how many run at once and a `JoinSet` reaps them.

use std::sync::Arc;

use metrics::counter;
use tokio::sync::Semaphore;
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, error, info, instrument, trace, warn};

use switchboard_bus::{BusError, BusSubscription, EventBus, InboundEvent, OutboundEvent, Publisher, parse_inbound};

use crate::connection::ConnectionManager;
use crate::context::RelayContext;
use crate::metrics::{BUS_DECODE_ERRORS_TOTAL, BUS_EVENTS_TOTAL};
use crate::presence::{PresenceCache, broadcast_cursor};

/// What each event does to relay state.
#[derive(Debug)]
pub struct EventHandlers {
    connections: Arc<ConnectionManager>,
    presence: Arc<PresenceCache>,
    publisher: Publisher,
}

impl EventHandlers {
    /// Bind handlers to the relay's registries.
    pub fn new(
        connections: Arc<ConnectionManager>,
        presence: Arc<PresenceCache>,
        publisher: Publisher,
    ) -> Self {
        Self {
            connections,
            presence,
            publisher,
        }
    }

    /// Handlers over `ctx`'s registries and publisher.
    pub fn from_context(ctx: &RelayContext) -> Self {
        Self::new(
            ctx.connections.clone(),
            ctx.presence.clone(),
            ctx.publisher.clone(),
        )
    }

    /// Apply one event.
    #[instrument(skip_all, fields(event = event.kind()))]
    pub async fn handle(&self, event: InboundEvent) {
        match event {
            InboundEvent::ForceReconnect {
                session_token,
                reason,
            } => {
                let count = self.connections.force_reconnect(&session_token);
                info!(count, %reason, "forced upstream reconnect");
                if count > 0 {
                    self.publish(&OutboundEvent::ReconnectionForced { session_token })
                        .await;
                }
            }
            InboundEvent::ForceDisconnect {
                session_token,
                reason,
                reason_message_id,
            } => {
                let count = self
                    .connections
                    .force_disconnect(&session_token, &reason_message_id);
                info!(count, %reason, %reason_message_id, "forced browser disconnect");
                if count > 0 {
                    self.publish(&OutboundEvent::DisconnectionForced { session_token })
                        .await;
                }
            }
            InboundEvent::AlivePing { middleware_uid } => {
                if middleware_uid == self.publisher.instance_id().as_str() {
                    self.publish(&OutboundEvent::AlivePong).await;
                } else {
                    trace!(%middleware_uid, "ping for another instance");
                }
            }
            InboundEvent::CursorPosition(position) => {
                let _ = broadcast_cursor(&self.connections, &self.presence, &position);
            }
            InboundEvent::PageChanged { meeting_id }
            | InboundEvent::WhiteboardAccessChanged { meeting_id }
            | InboundEvent::MeetingEnded { meeting_id } => {
                if self.presence.clear_meeting(&meeting_id) {
                    debug!(%meeting_id, "meeting presence cleared");
                }
            }
            InboundEvent::UserLeft {
                meeting_id,
                user_id,
            } => {
                let _ = self.presence.clear_user(&meeting_id, &user_id);
                let count = self.connections.mark_left_meeting(&meeting_id, &user_id);
                debug!(%meeting_id, %user_id, count, "user left meeting");
            }
        }
    }

    async fn publish(&self, event: &OutboundEvent) {
        if let Err(e) = self.publisher.publish(event).await {
            warn!(event = event.name(), error = %e, "bus publish failed");
        }
    }
}

/// Consumes the inbound topic.
pub struct Dispatcher {
    bus: Arc<dyn EventBus>,
    topic: String,
    handlers: Arc<EventHandlers>,
    max_concurrent: usize,
}

impl Dispatcher {
    /// Create a dispatcher running at most `max_concurrent` handlers at once.
    pub fn new(
        bus: Arc<dyn EventBus>,
        topic: impl Into<String>,
        handlers: EventHandlers,
        max_concurrent: usize,
    ) -> Self {
        Self {
            bus,
            topic: topic.into(),
            handlers: Arc::new(handlers),
            max_concurrent: max_concurrent.max(1),
        }
    }

    /// Subscribe and spawn the dispatch loop.
    ///
    /// A failed subscription is returned; it is fatal at startup.
    pub async fn start(self, shutdown: CancellationToken) -> Result<JoinHandle<()>, BusError> {
        let subscription = self.bus.subscribe(&self.topic).await?;
        info!(topic = %self.topic, "control plane subscribed");
        let span = tracing::info_span!("dispatcher", topic = %self.topic);
        Ok(tokio::spawn(self.run(subscription, shutdown).instrument(span)))
    }

    async fn run(self, mut subscription: BusSubscription, shutdown: CancellationToken) {
        let permits = Arc::new(Semaphore::new(self.max_concurrent));
        let mut tasks = JoinSet::new();
        loop {
            tokio::select! {
                biased;
                () = shutdown.cancelled() => break,
                Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                    if let Err(e) = joined {
                        if e.is_panic() {
                            error!(error = %e, "bus handler panicked");
                        }
                    }
                }
                received = subscription.recv() => match received {
                    Some(Ok(payload)) => {
                        let Some(event) = decode(&payload) else { continue };
                        let permit = tokio::select! {
                            biased;
                            () = shutdown.cancelled() => break,
                            permit = permits.clone().acquire_owned() => permit,
                        };
                        let Ok(permit) = permit else { break };
                        let handlers = self.handlers.clone();
                        let _ = tasks.spawn(
                            async move {
                                handlers.handle(event).await;
                                drop(permit);
                            }
                            .in_current_span(),
                        );
                    }
                    Some(Err(e)) => warn!(error = %e, "bus receive failed"),
                    None => {
                        warn!("bus subscription ended");
                        break;
                    }
                },
            }
        }
        tasks.shutdown().await;
        info!("dispatcher stopped");
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("topic", &self.topic)
            .field("max_concurrent", &self.max_concurrent)
            .finish_non_exhaustive()
    }
}

fn decode(payload: &str) -> Option<InboundEvent> {
    match parse_inbound(payload) {
        Ok(Some(event)) => {
            counter!(BUS_EVENTS_TOTAL, "event" => event.kind()).increment(1);
            Some(event)
        }
        Ok(None) => None,
        Err(e) => {
            counter!(BUS_DECODE_ERRORS_TOTAL).increment(1);
            debug!(error = %e, "bus message discarded");
            None
        }
    }
}
