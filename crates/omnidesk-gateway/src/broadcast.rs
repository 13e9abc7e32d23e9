//! Scoped WebSocket broadcast.
//!
//! Implements the core [`EventPublisher`] seam over a tokio broadcast
//! channel. Publishing never blocks and never fails the caller: with no
//! subscribers the envelope is dropped, and lagging subscribers lose old
//! events rather than slowing the send path.

use tokio::sync::broadcast;

use omnidesk_core::broadcast::{EventEnvelope, EventPublisher, InboxEvent, Scope};
use omnidesk_core::types::CompanyId;

const CHANNEL_CAPACITY: usize = 1024;

/// Broadcast hub for connected inbox clients and webchat widgets.
#[derive(Debug, Clone)]
pub struct WsBroadcaster {
    tx: broadcast::Sender<EventEnvelope>,
}

impl WsBroadcaster {
    /// Create a hub.
    #[must_use]
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { tx }
    }

    /// Subscribe to the raw envelope stream; callers filter by scope.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<EventEnvelope> {
        self.tx.subscribe()
    }

    /// Number of live subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for WsBroadcaster {
    fn default() -> Self {
        Self::new()
    }
}

impl EventPublisher for WsBroadcaster {
    fn publish(&self, scope: Scope, event: InboxEvent) {
        // A send error only means nobody is listening.
        let _ = self.tx.send(EventEnvelope::new(scope, event));
    }
}

/// What one connected client is interested in.
#[derive(Debug, Clone, Default)]
pub struct ClientInterest {
    /// Receive events scoped to this company.
    pub company_id: Option<CompanyId>,
    /// Receive events scoped to this webchat session.
    pub session_id: Option<String>,
    /// Receive global (smart-broadcast) events.
    pub global: bool,
}

impl ClientInterest {
    /// Whether an envelope scope matches this client.
    #[must_use]
    pub fn wants(&self, scope: &Scope) -> bool {
        match scope {
            Scope::Company { company_id } => self.company_id.as_ref() == Some(company_id),
            Scope::Session { session_id } => self.session_id.as_deref() == Some(session_id),
            Scope::Global => self.global,
        }
    }
}
