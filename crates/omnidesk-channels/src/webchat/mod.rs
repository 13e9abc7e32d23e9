//! Webchat channel adapter.
//!
//! The embeddable widget posts events to the gateway with a widget token
//! as its only credential. There is no external provider: outbound
//! delivery is the session-scoped broadcast, and contact/conversation
//! rows are materialized lazily on a visitor's first event.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use omnidesk_core::broadcast::{EventPublisher, InboxEvent, Scope};
use omnidesk_core::hooks::AutomationHook;
use omnidesk_core::storage::{ConversationPatch, StorageError, StoreFacade};
use omnidesk_core::types::{
    ChannelConnection, ChannelKind, ConnectionData, ConnectionStatus, Contact, Conversation,
    ConversationPeer, Direction, IdentifierKind, Message, MessageKind, MessageMeta, MessageStatus,
    NewContact, NewConversation, NewMessage, SenderKind, UserId,
};
use omnidesk_core::validation::sanitize_content;

use crate::session::SessionRegistry;
use crate::traits::{
    AdapterError, ChannelAdapter, ConnectOutcome, ConnectionProbe, DeliveryReceipt, MediaPayload,
    Recipient, ReplyContext,
};

/// Longest message content the widget may store.
pub const MAX_MESSAGE_CHARS: usize = 5000;

/// Inbound widget payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebchatWebhook {
    /// Widget token authenticating the event.
    pub token: String,
    /// Event discriminator.
    #[serde(rename = "eventType")]
    pub event_type: String,
    /// Event body.
    pub data: WebchatEventData,
}

/// Widget event body.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebchatEventData {
    /// Anonymous visitor session id.
    pub session_id: String,
    /// Message text, for `message` events.
    pub message: Option<String>,
    /// Message classification (`text`, `image`, ...).
    pub message_type: Option<String>,
    /// Visitor name, when the widget collected one.
    pub visitor_name: Option<String>,
    /// Visitor email, when collected.
    pub visitor_email: Option<String>,
    /// Visitor phone, when collected.
    pub visitor_phone: Option<String>,
    /// Media URL, for media messages.
    pub media_url: Option<String>,
}

/// Webchat adapter.
pub struct WebchatAdapter {
    store: Arc<dyn StoreFacade>,
    publisher: Arc<dyn EventPublisher>,
    hook: Arc<dyn AutomationHook>,
    sessions: Arc<SessionRegistry>,
}

impl WebchatAdapter {
    /// Create the adapter.
    #[must_use]
    pub fn new(
        store: Arc<dyn StoreFacade>,
        publisher: Arc<dyn EventPublisher>,
        hook: Arc<dyn AutomationHook>,
        sessions: Arc<SessionRegistry>,
    ) -> Self {
        Self {
            store,
            publisher,
            hook,
            sessions,
        }
    }

    /// The session registry backing this adapter.
    #[must_use]
    pub fn sessions(&self) -> &Arc<SessionRegistry> {
        &self.sessions
    }

    /// Find the active webchat connection owning a widget token.
    ///
    /// Linear scan over webchat connections; deployments have few enough
    /// connections that an index is not worth maintaining.
    ///
    /// # Errors
    ///
    /// Returns error if the storage lookup fails.
    pub async fn verify_widget_token(
        &self,
        token: &str,
    ) -> Result<Option<ChannelConnection>, StorageError> {
        let connections = self
            .store
            .connections_by_kind(ChannelKind::Webchat)
            .await?;
        Ok(connections.into_iter().find(|connection| {
            connection.status == ConnectionStatus::Active
                && matches!(
                    &connection.data,
                    ConnectionData::Webchat {
                        widget_token: Some(t),
                        ..
                    } if t == token
                )
        }))
    }

    /// Process one widget event.
    ///
    /// `message` persists an inbound message; `typing` and `session_start`
    /// only materialize the contact and conversation; `session_end` and
    /// `file_upload` are accepted and ignored.
    ///
    /// # Errors
    ///
    /// Returns error if materialization or persistence fails.
    pub async fn process_webhook(
        &self,
        connection: &ChannelConnection,
        payload: WebchatWebhook,
    ) -> Result<Option<Message>, AdapterError> {
        match payload.event_type.as_str() {
            "message" => self.handle_message(connection, payload.data).await,
            "typing" => {
                let (_, _) = self.ensure_session(connection, &payload.data).await?;
                self.publisher.publish(
                    Scope::company(connection.company_id.clone()),
                    InboxEvent::VisitorTyping {
                        session_id: payload.data.session_id,
                    },
                );
                Ok(None)
            }
            "session_start" => {
                let (_, _) = self.ensure_session(connection, &payload.data).await?;
                Ok(None)
            }
            "session_end" | "file_upload" => Ok(None),
            other => {
                tracing::warn!(event_type = other, "ignoring unknown webchat event");
                Ok(None)
            }
        }
    }

    /// Send an agent message to a visitor session.
    ///
    /// Mirrors the inbound path: persists the outbound message, refreshes
    /// the conversation, and broadcasts to the company and directly to the
    /// visitor session.
    ///
    /// # Errors
    ///
    /// Returns error if the session's conversation cannot be resolved or
    /// persistence fails.
    pub async fn send_to_session(
        &self,
        connection: &ChannelConnection,
        session_id: &str,
        content: &str,
        sender_id: Option<UserId>,
    ) -> Result<Message, AdapterError> {
        let data = WebchatEventData {
            session_id: session_id.to_string(),
            ..WebchatEventData::default()
        };
        let (_, conversation) = self.ensure_session(connection, &data).await?;

        let message = self
            .persist_and_broadcast(
                connection,
                &conversation,
                session_id,
                NewMessage {
                    conversation_id: conversation.id.clone(),
                    direction: Direction::Outbound,
                    kind: MessageKind::Text,
                    content: sanitize_content(content, MAX_MESSAGE_CHARS),
                    media_url: None,
                    status: MessageStatus::Sent,
                    external_id: None,
                    metadata: MessageMeta::None,
                    sender_kind: SenderKind::User,
                    sender_id,
                    sent_at: None,
                },
            )
            .await?;
        Ok(message)
    }

    async fn handle_message(
        &self,
        connection: &ChannelConnection,
        data: WebchatEventData,
    ) -> Result<Option<Message>, AdapterError> {
        let (_, conversation) = self.ensure_session(connection, &data).await?;

        let content = sanitize_content(data.message.as_deref().unwrap_or(""), MAX_MESSAGE_CHARS);
        let kind = data
            .message_type
            .as_deref()
            .and_then(parse_message_kind)
            .unwrap_or(MessageKind::Text);

        let message = self
            .persist_and_broadcast(
                connection,
                &conversation,
                &data.session_id,
                NewMessage {
                    conversation_id: conversation.id.clone(),
                    direction: Direction::Inbound,
                    kind,
                    content,
                    media_url: data.media_url,
                    status: MessageStatus::Delivered,
                    external_id: None,
                    metadata: MessageMeta::None,
                    sender_kind: SenderKind::Contact,
                    sender_id: None,
                    sent_at: None,
                },
            )
            .await?;

        if let Err(e) = self.hook.message_received(&conversation, &message).await {
            tracing::warn!(error = %e, "webchat automation handoff failed");
        }

        Ok(Some(message))
    }

    /// Materialize the contact and conversation for a session, reusing
    /// both on every event after the first.
    async fn ensure_session(
        &self,
        connection: &ChannelConnection,
        data: &WebchatEventData,
    ) -> Result<(Contact, Conversation), AdapterError> {
        if data.session_id.is_empty() {
            return Err(AdapterError::Config(
                "webchat event is missing a session id".to_string(),
            ));
        }

        self.sessions
            .touch(
                &data.session_id,
                connection.id.clone(),
                connection.company_id.clone(),
                data.visitor_name.clone(),
                data.visitor_email.clone(),
                data.visitor_phone.clone(),
            )
            .await;

        let contact = self
            .store
            .get_or_create_contact(NewContact {
                company_id: connection.company_id.clone(),
                identifier: data.session_id.clone(),
                identifier_kind: IdentifierKind::Webchat,
                name: data.visitor_name.clone(),
                email: data.visitor_email.clone(),
                phone: data.visitor_phone.clone(),
            })
            .await?;

        let conversation = match self
            .store
            .conversation_for_contact(&contact.id, &connection.id)
            .await?
        {
            Some(existing) => existing,
            None => {
                self.store
                    .create_conversation(NewConversation {
                        company_id: connection.company_id.clone(),
                        channel_id: connection.id.clone(),
                        kind: ChannelKind::Webchat,
                        peer: ConversationPeer::Contact {
                            contact_id: contact.id.clone(),
                        },
                    })
                    .await?
            }
        };

        Ok((contact, conversation))
    }

    async fn persist_and_broadcast(
        &self,
        connection: &ChannelConnection,
        conversation: &Conversation,
        session_id: &str,
        new: NewMessage,
    ) -> Result<Message, AdapterError> {
        let outbound = new.direction == Direction::Outbound;
        let message = self.store.create_message(new).await?;

        self.store
            .update_conversation(
                &conversation.id,
                ConversationPatch {
                    last_message_at: Some(message.created_at),
                    ..ConversationPatch::default()
                },
            )
            .await?;

        let event = InboxEvent::NewMessage {
            conversation_id: conversation.id.clone(),
            message: Box::new(message.clone()),
        };
        self.publisher.publish(
            Scope::company(connection.company_id.clone()),
            event.clone(),
        );
        if outbound {
            // The visitor only sees session-scoped events.
            self.publisher
                .publish(Scope::session(session_id.to_string()), event);
        } else {
            // Smart-broadcast subscribers watch every inbound message.
            self.publisher.publish(Scope::Global, event);
        }

        Ok(message)
    }

    fn widget_data(
        connection: &ChannelConnection,
    ) -> Result<(Option<String>, Option<String>), AdapterError> {
        match &connection.data {
            ConnectionData::Webchat {
                widget_token,
                site_name,
            } => Ok((widget_token.clone(), site_name.clone())),
            _ => Err(AdapterError::Config(
                "connection data is not webchat configuration".to_string(),
            )),
        }
    }
}

fn parse_message_kind(raw: &str) -> Option<MessageKind> {
    match raw {
        "text" => Some(MessageKind::Text),
        "image" => Some(MessageKind::Image),
        "video" => Some(MessageKind::Video),
        "audio" => Some(MessageKind::Audio),
        "document" | "file" => Some(MessageKind::Document),
        _ => None,
    }
}

#[async_trait]
impl ChannelAdapter for WebchatAdapter {
    fn kind(&self) -> ChannelKind {
        ChannelKind::Webchat
    }

    async fn connect(
        &self,
        connection: &ChannelConnection,
    ) -> Result<ConnectOutcome, AdapterError> {
        let (widget_token, site_name) = Self::widget_data(connection)?;
        // Reuse the token across reconnects so embedded widgets keep
        // working; generate one only on first activation.
        let token = widget_token.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        Ok(ConnectOutcome::active(ConnectionData::Webchat {
            widget_token: Some(token),
            site_name,
        }))
    }

    async fn disconnect(
        &self,
        connection: &ChannelConnection,
    ) -> Result<ConnectOutcome, AdapterError> {
        let (_, site_name) = Self::widget_data(connection)?;
        let evicted = self.sessions.evict_for_connection(&connection.id).await;
        tracing::info!(connection = %connection.id, evicted, "webchat disconnected");
        Ok(ConnectOutcome::disconnected(ConnectionData::Webchat {
            widget_token: None,
            site_name,
        }))
    }

    async fn probe(
        &self,
        connection: &ChannelConnection,
    ) -> Result<ConnectionProbe, AdapterError> {
        let (widget_token, site_name) = Self::widget_data(connection)?;
        let connected =
            connection.status == ConnectionStatus::Active && widget_token.is_some();
        Ok(ConnectionProbe {
            connected,
            account_id: Some(connection.id.as_ref().to_string()),
            display_name: site_name,
            error: (!connected).then(|| "widget token not issued".to_string()),
        })
    }

    async fn send_message(
        &self,
        connection: &ChannelConnection,
        recipient: &Recipient,
        content: &str,
    ) -> Result<DeliveryReceipt, AdapterError> {
        match recipient {
            Recipient::Individual { address } => {
                let message = self.send_to_session(connection, address, content, None).await?;
                Ok(DeliveryReceipt {
                    external_id: message.external_id,
                    metadata: MessageMeta::None,
                    sent_at: message.created_at,
                })
            }
            Recipient::Group { .. } => Err(AdapterError::Unsupported(
                "Web chat does not support group chat replies".to_string(),
            )),
        }
    }

    async fn send_media(
        &self,
        connection: &ChannelConnection,
        recipient: &Recipient,
        media: &MediaPayload,
    ) -> Result<DeliveryReceipt, AdapterError> {
        let Recipient::Individual { address } = recipient else {
            return Err(AdapterError::Unsupported(
                "Web chat does not support group chat replies".to_string(),
            ));
        };
        let data = WebchatEventData {
            session_id: address.clone(),
            ..WebchatEventData::default()
        };
        let (_, conversation) = self.ensure_session(connection, &data).await?;
        let message = self
            .persist_and_broadcast(
                connection,
                &conversation,
                address,
                NewMessage {
                    conversation_id: conversation.id.clone(),
                    direction: Direction::Outbound,
                    kind: media.kind,
                    content: sanitize_content(
                        media.caption.as_deref().unwrap_or(""),
                        MAX_MESSAGE_CHARS,
                    ),
                    media_url: Some(media.url.clone()),
                    status: MessageStatus::Sent,
                    external_id: None,
                    metadata: MessageMeta::None,
                    sender_kind: SenderKind::User,
                    sender_id: None,
                    sent_at: None,
                },
            )
            .await?;
        Ok(DeliveryReceipt {
            external_id: None,
            metadata: MessageMeta::None,
            sent_at: message.created_at,
        })
    }

    async fn send_reply(&self, ctx: ReplyContext<'_>) -> Result<DeliveryReceipt, AdapterError> {
        // Replies are flat: no quote or mention marker. The manager
        // persists and broadcasts, so delivery here is just the receipt.
        match &ctx.recipient {
            Recipient::Individual { .. } => Ok(DeliveryReceipt::empty()),
            Recipient::Group { .. } => Err(AdapterError::Unsupported(
                "Web chat does not support group chat replies".to_string(),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use omnidesk_core::broadcast::NullPublisher;
    use omnidesk_core::hooks::NullHook;
    use omnidesk_core::storage::MemoryStore;
    use omnidesk_core::types::{CompanyId, ConnectionId};

    fn adapter_with_store() -> (WebchatAdapter, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let adapter = WebchatAdapter::new(
            store.clone(),
            Arc::new(NullPublisher),
            Arc::new(NullHook),
            Arc::new(SessionRegistry::new()),
        );
        (adapter, store)
    }

    fn connection(token: Option<&str>) -> ChannelConnection {
        ChannelConnection {
            id: ConnectionId::new("conn-web"),
            company_id: CompanyId::new("co1"),
            kind: ChannelKind::Webchat,
            status: ConnectionStatus::Active,
            data: ConnectionData::Webchat {
                widget_token: token.map(ToString::to_string),
                site_name: Some("Acme".to_string()),
            },
        }
    }

    fn event(event_type: &str, session_id: &str, message: Option<&str>) -> WebchatWebhook {
        WebchatWebhook {
            token: "tok".to_string(),
            event_type: event_type.to_string(),
            data: WebchatEventData {
                session_id: session_id.to_string(),
                message: message.map(ToString::to_string),
                ..WebchatEventData::default()
            },
        }
    }

    #[tokio::test]
    async fn test_typing_is_idempotent_for_materialization() {
        let (adapter, store) = adapter_with_store();
        let conn = connection(Some("tok"));

        adapter
            .process_webhook(&conn, event("typing", "sess-1", None))
            .await
            .unwrap();
        adapter
            .process_webhook(&conn, event("typing", "sess-1", None))
            .await
            .unwrap();

        assert_eq!(store.contact_count(), 1);
        assert_eq!(store.conversation_count(), 1);
        assert_eq!(store.message_count(), 0);
    }

    #[tokio::test]
    async fn test_message_truncated_to_limit() {
        let (adapter, store) = adapter_with_store();
        let conn = connection(Some("tok"));
        let long = "x".repeat(6000);

        let message = adapter
            .process_webhook(&conn, event("message", "sess-1", Some(&long)))
            .await
            .unwrap()
            .unwrap();

        assert_eq!(message.content.chars().count(), 5000);
        assert_eq!(store.message_count(), 1);
    }

    #[tokio::test]
    async fn test_round_trip_shares_one_conversation() {
        let (adapter, store) = adapter_with_store();
        let conn = connection(Some("tok"));

        let outbound = adapter
            .send_to_session(&conn, "sess-1", "hi", None)
            .await
            .unwrap();
        let inbound = adapter
            .process_webhook(&conn, event("message", "sess-1", Some("hi")))
            .await
            .unwrap()
            .unwrap();

        assert_eq!(outbound.conversation_id, inbound.conversation_id);
        assert_eq!(outbound.direction, Direction::Outbound);
        assert_eq!(inbound.direction, Direction::Inbound);
        assert_eq!(store.message_count(), 2);
        assert_eq!(store.conversation_count(), 1);
    }

    #[tokio::test]
    async fn test_session_end_and_file_upload_are_noops() {
        let (adapter, store) = adapter_with_store();
        let conn = connection(Some("tok"));

        for kind in ["session_end", "file_upload"] {
            let out = adapter
                .process_webhook(&conn, event(kind, "sess-2", None))
                .await
                .unwrap();
            assert!(out.is_none());
        }
        // Neither event materializes anything.
        assert_eq!(store.contact_count(), 0);
    }

    #[tokio::test]
    async fn test_verify_widget_token() {
        let (adapter, store) = adapter_with_store();
        store
            .create_channel_connection(connection(Some("good-token")))
            .await
            .unwrap();

        assert!(
            adapter
                .verify_widget_token("good-token")
                .await
                .unwrap()
                .is_some()
        );
        assert!(
            adapter
                .verify_widget_token("bad-token")
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn test_connect_generates_then_reuses_token() {
        let (adapter, _) = adapter_with_store();

        let first = ChannelAdapter::connect(&adapter, &connection(None))
            .await
            .unwrap();
        assert_eq!(first.status, ConnectionStatus::Active);
        let ConnectionData::Webchat {
            widget_token: Some(token),
            ..
        } = first.data
        else {
            panic!("expected webchat data with token");
        };

        let again = ChannelAdapter::connect(&adapter, &connection(Some(&token)))
            .await
            .unwrap();
        assert!(matches!(
            again.data,
            ConnectionData::Webchat { widget_token: Some(t), .. } if t == token
        ));
    }

    #[tokio::test]
    async fn test_disconnect_clears_token_and_sessions() {
        let (adapter, _) = adapter_with_store();
        let conn = connection(Some("tok"));

        adapter
            .process_webhook(&conn, event("session_start", "sess-1", None))
            .await
            .unwrap();
        assert_eq!(adapter.sessions().len().await, 1);

        let outcome = ChannelAdapter::disconnect(&adapter, &conn).await.unwrap();
        assert_eq!(outcome.status, ConnectionStatus::Disconnected);
        assert!(matches!(
            outcome.data,
            ConnectionData::Webchat {
                widget_token: None,
                ..
            }
        ));
        assert_eq!(adapter.sessions().len().await, 0);
    }

    #[tokio::test]
    async fn test_mismatched_connection_data_is_config_error() {
        let (adapter, _) = adapter_with_store();
        let mut conn = connection(Some("tok"));
        conn.data = ConnectionData::Sms {
            account_sid: "AC".to_string(),
            auth_token: "t".to_string(),
            from_number: "+1555".to_string(),
        };

        let err = ChannelAdapter::connect(&adapter, &conn).await.unwrap_err();
        assert!(matches!(err, AdapterError::Config(_)));
    }
}
