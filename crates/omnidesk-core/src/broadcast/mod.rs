//! Broadcast events for connected inbox clients.
//!
//! The WebSocket transport is an external collaborator; this module only
//! defines the event shapes and the fire-and-forget [`EventPublisher`]
//! seam. Publishing must never block or fail the persistence path.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{
    CompanyId, ConnectionId, ConnectionStatus, Conversation, ConversationId, Message, MessageId,
};

/// Who an event is addressed to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "scope", rename_all = "snake_case")]
pub enum Scope {
    /// Every client of one tenant.
    Company {
        /// The tenant.
        company_id: CompanyId,
    },
    /// One webchat visitor session.
    Session {
        /// The visitor session id.
        session_id: String,
    },
    /// Every connected client (smart-broadcast subscribers).
    Global,
}

impl Scope {
    /// Company scope shorthand.
    #[must_use]
    pub const fn company(company_id: CompanyId) -> Self {
        Self::Company { company_id }
    }

    /// Session scope shorthand.
    #[must_use]
    pub const fn session(session_id: String) -> Self {
        Self::Session { session_id }
    }
}

/// Events pushed to connected clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InboxEvent {
    /// A message was persisted (either direction).
    NewMessage {
        /// Conversation the message belongs to.
        conversation_id: ConversationId,
        /// The full message row.
        message: Box<Message>,
    },

    /// A message was deleted.
    MessageDeleted {
        /// Conversation the message belonged to.
        conversation_id: ConversationId,
        /// The deleted message id.
        message_id: MessageId,
    },

    /// Conversation metadata changed.
    ConversationUpdated {
        /// The updated conversation row.
        conversation: Box<Conversation>,
    },

    /// A channel connection changed status.
    ChannelStatus {
        /// The connection.
        connection_id: ConnectionId,
        /// New status.
        status: ConnectionStatus,
        /// Error detail, when the status is an error.
        error: Option<String>,
    },

    /// A webchat visitor is typing.
    VisitorTyping {
        /// The visitor session id.
        session_id: String,
    },
}

/// A scoped event with its publish time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventEnvelope {
    /// Addressing.
    pub scope: Scope,
    /// Publish time.
    pub at: DateTime<Utc>,
    /// The event.
    pub event: InboxEvent,
}

impl EventEnvelope {
    /// Wrap an event for a scope, stamped now.
    #[must_use]
    pub fn new(scope: Scope, event: InboxEvent) -> Self {
        Self {
            scope,
            at: Utc::now(),
            event,
        }
    }
}

/// Fire-and-forget publisher to connected clients.
pub trait EventPublisher: Send + Sync {
    /// Publish an event to a scope. Must not block; delivery is
    /// best-effort.
    fn publish(&self, scope: Scope, event: InboxEvent);
}

/// Publisher that drops everything; useful for tests and headless runs.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullPublisher;

impl EventPublisher for NullPublisher {
    fn publish(&self, _scope: Scope, _event: InboxEvent) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_serializes_with_tag() {
        let event = InboxEvent::VisitorTyping {
            session_id: "sess-1".to_string(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "visitor_typing");
        assert_eq!(json["session_id"], "sess-1");
    }

    #[test]
    fn test_scope_serializes_with_tag() {
        let scope = Scope::company(CompanyId::new("co1"));
        let json = serde_json::to_value(&scope).unwrap();
        assert_eq!(json["scope"], "company");
    }
}
