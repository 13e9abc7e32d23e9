//! Channel manager.
//!
//! The orchestrator between callers (inbox UI, campaign sender, flow
//! executor) and the provider adapters: it resolves a conversation to its
//! connection, enforces tenant isolation and capability gates, applies
//! cross-channel rules like agent signatures, and dispatches to the
//! adapter for the conversation's kind. Public methods never panic and
//! never leak provider stack traces; every failure is a typed
//! [`DispatchError`].

use std::sync::Arc;

use chrono::{Duration, Utc};
use thiserror::Error;

use omnidesk_core::broadcast::{EventPublisher, InboxEvent, Scope};
use omnidesk_core::capabilities::{ChannelCapabilities, capabilities, capabilities_for};
use omnidesk_core::hooks::AutomationHook;
use omnidesk_core::secrets::{COMMON_SECRET_PATTERNS, scrub_secrets};
use omnidesk_core::storage::{ConnectionPatch, ConversationPatch, StorageError, StoreFacade};
use omnidesk_core::types::{
    ChannelConnection, ChannelKind, CompanyId, ConnectionId, Contact, Conversation,
    ConversationId, ConversationPeer, Direction, Message, MessageId, MessageKind, MessageStatus,
    NewMessage, SenderKind, UserId, normalize_phone,
};

use crate::registry::AdapterRegistry;
use crate::session::SessionRegistry;
use crate::traits::{
    AdapterError, ChannelAdapter, ConnectOutcome, Recipient, ReplyContext, ReplyOptions,
};
use crate::webchat::WebchatAdapter;
use crate::whatsapp::WhatsappAdapter;
use crate::whatsapp_cloud::WhatsappCloudAdapter;
use crate::whatsapp_twilio::WhatsappTwilioAdapter;
use crate::dialog360::Dialog360Adapter;
use crate::email::EmailAdapter;
use crate::instagram::InstagramAdapter;
use crate::messenger::MessengerAdapter;
use crate::sms::SmsAdapter;
use crate::tiktok::TiktokAdapter;

/// Company setting key controlling agent signatures.
pub const SIGNATURE_SETTING: &str = "inbox_agent_signature_enabled";

/// Dispatch errors surfaced to callers.
#[derive(Error, Debug)]
pub enum DispatchError {
    /// Conversation does not exist.
    #[error("Conversation not found")]
    ConversationNotFound,

    /// Message does not exist.
    #[error("Message not found")]
    MessageNotFound,

    /// The conversation's channel connection does not exist.
    #[error("Channel connection not found")]
    ConnectionNotFound,

    /// 1:1 conversation whose contact row is missing.
    #[error("Contact not found for conversation")]
    ContactNotFound,

    /// Caller company does not own the conversation.
    #[error("Access denied: conversation belongs to another company")]
    AccessDenied,

    /// Capability table forbids replies on this channel.
    #[error("Channel does not support replies")]
    RepliesUnsupported,

    /// Capability table forbids deletion on this channel.
    #[error("Message deletion is not supported for this channel")]
    DeletionUnsupported,

    /// Message is older than the channel's deletion window.
    #[error("Message is too old to be deleted")]
    MessageTooOld,

    /// Group conversation without a group id.
    #[error("Group conversation is missing its group id")]
    MissingGroupJid,

    /// Contact has no address usable on this channel.
    #[error("Contact has no usable address for this channel")]
    MissingRecipient,

    /// Adapter-level failure; the message is the adapter's caller-visible
    /// text (group rejections, missing quote, provider transport).
    #[error(transparent)]
    Adapter(#[from] AdapterError),

    /// Storage facade failure.
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

/// Non-fatal degradation recorded alongside a successful result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Warning {
    /// Which best-effort step degraded.
    pub context: &'static str,
    /// What went wrong.
    pub detail: String,
}

/// Result of a successful reply.
#[derive(Debug)]
pub struct ReplyReceipt {
    /// The persisted outbound message.
    pub message: Message,
    /// Best-effort steps that degraded (signature lookup etc.).
    pub warnings: Vec<Warning>,
}

/// The channel orchestrator.
pub struct ChannelManager {
    store: Arc<dyn StoreFacade>,
    publisher: Arc<dyn EventPublisher>,
    registry: AdapterRegistry,
    webchat: Arc<WebchatAdapter>,
    whatsapp_twilio: Arc<WhatsappTwilioAdapter>,
    email: Arc<EmailAdapter>,
    sessions: Arc<SessionRegistry>,
}

impl ChannelManager {
    /// Build a manager with the standard adapter set.
    #[must_use]
    pub fn new(
        store: Arc<dyn StoreFacade>,
        publisher: Arc<dyn EventPublisher>,
        hook: Arc<dyn AutomationHook>,
    ) -> Self {
        let sessions = Arc::new(SessionRegistry::new());
        let webchat = Arc::new(WebchatAdapter::new(
            store.clone(),
            publisher.clone(),
            hook.clone(),
            sessions.clone(),
        ));
        let whatsapp_twilio = Arc::new(WhatsappTwilioAdapter::new(
            store.clone(),
            publisher.clone(),
            hook.clone(),
        ));
        let email = Arc::new(EmailAdapter::new(
            store.clone(),
            publisher.clone(),
            hook.clone(),
        ));
        let registry = AdapterRegistry::new(
            Arc::new(WhatsappAdapter::new(store.clone())),
            Arc::new(WhatsappCloudAdapter::new()),
            whatsapp_twilio.clone(),
            Arc::new(Dialog360Adapter::new()),
            Arc::new(MessengerAdapter::new()),
            Arc::new(InstagramAdapter::new()),
            Arc::new(TiktokAdapter::new()),
            email.clone(),
            Arc::new(SmsAdapter::new()),
            webchat.clone(),
        );

        Self {
            store,
            publisher,
            registry,
            webchat,
            whatsapp_twilio,
            email,
            sessions,
        }
    }

    /// Replace the adapter for one kind (tests, alternative providers).
    pub fn set_adapter(&mut self, kind: ChannelKind, adapter: Arc<dyn ChannelAdapter>) {
        self.registry.set(kind, adapter);
    }

    /// The webchat adapter, for webhook routing.
    #[must_use]
    pub fn webchat(&self) -> &Arc<WebchatAdapter> {
        &self.webchat
    }

    /// The Twilio WhatsApp adapter, for webhook routing.
    #[must_use]
    pub fn whatsapp_twilio(&self) -> &Arc<WhatsappTwilioAdapter> {
        &self.whatsapp_twilio
    }

    /// The email adapter, for inbound-mail routing.
    #[must_use]
    pub fn email(&self) -> &Arc<EmailAdapter> {
        &self.email
    }

    /// The webchat session registry, for eviction sweeps.
    #[must_use]
    pub fn sessions(&self) -> &Arc<SessionRegistry> {
        &self.sessions
    }

    /// The storage facade this manager writes through.
    #[must_use]
    pub fn store(&self) -> &Arc<dyn StoreFacade> {
        &self.store
    }

    /// Capability lookup by wire name; unknown names get the disabled set.
    #[must_use]
    pub fn capabilities_of(&self, kind: &str) -> ChannelCapabilities {
        capabilities_for(kind)
    }

    /// Send an agent reply into a conversation.
    ///
    /// # Errors
    ///
    /// Returns a typed [`DispatchError`]; on any error no provider call
    /// has persisted a message and no store mutation has happened.
    pub async fn send_reply(
        &self,
        conversation_id: &ConversationId,
        content: &str,
        reply: ReplyOptions,
        user_id: &UserId,
        company_id: Option<&CompanyId>,
    ) -> Result<ReplyReceipt, DispatchError> {
        let conversation = self
            .store
            .conversation(conversation_id)
            .await?
            .ok_or(DispatchError::ConversationNotFound)?;

        // Tenant isolation at the conversation, repeated below at the
        // connection; both must hold before anything else runs.
        if let Some(caller) = company_id {
            if caller != &conversation.company_id {
                return Err(DispatchError::AccessDenied);
            }
        }

        let connection = self
            .store
            .channel_connection(&conversation.channel_id)
            .await?
            .ok_or(DispatchError::ConnectionNotFound)?;
        if let Some(caller) = company_id {
            if caller != &connection.company_id {
                return Err(DispatchError::AccessDenied);
            }
        }

        let (recipient, contact) = self.resolve_recipient(&conversation).await?;

        let caps = capabilities(conversation.kind);
        if !caps.supports_reply {
            return Err(DispatchError::RepliesUnsupported);
        }

        let mut warnings = Vec::new();
        let content = self
            .apply_signature(&conversation.company_id, user_id, content, &mut warnings)
            .await;

        let adapter = self.registry.get(conversation.kind);
        let receipt = adapter
            .send_reply(ReplyContext {
                connection: &connection,
                conversation: &conversation,
                recipient,
                content: content.clone(),
                reply: &reply,
            })
            .await
            .map_err(|e| {
                tracing::error!(
                    conversation = %conversation.id,
                    kind = %conversation.kind,
                    error = %scrub_secrets(&e.to_string(), COMMON_SECRET_PATTERNS),
                    "reply dispatch failed"
                );
                e
            })?;

        let message = self
            .store
            .create_message(NewMessage {
                conversation_id: conversation.id.clone(),
                direction: Direction::Outbound,
                kind: MessageKind::Text,
                content,
                media_url: None,
                status: MessageStatus::Sent,
                external_id: receipt.external_id,
                metadata: receipt.metadata,
                sender_kind: SenderKind::User,
                sender_id: Some(user_id.clone()),
                sent_at: Some(receipt.sent_at),
            })
            .await?;

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
        self.publisher
            .publish(Scope::company(conversation.company_id.clone()), event.clone());
        if conversation.kind == ChannelKind::Webchat {
            // The webchat contact identifier is the visitor session id.
            if let Some(contact) = &contact {
                self.publisher
                    .publish(Scope::session(contact.identifier.clone()), event);
            }
        }

        Ok(ReplyReceipt { message, warnings })
    }

    /// Delete a message, provider-side where the channel supports it.
    ///
    /// The local row is removed only after the provider confirms; kinds
    /// that support deletion without a remote delete path fall back to a
    /// local-only delete.
    ///
    /// # Errors
    ///
    /// Returns a typed [`DispatchError`]. Capability and age failures are
    /// terminal and happen before any provider call.
    pub async fn delete_message(
        &self,
        message_id: &MessageId,
        user_id: &UserId,
        company_id: Option<&CompanyId>,
    ) -> Result<(), DispatchError> {
        let message = self
            .store
            .message(message_id)
            .await?
            .ok_or(DispatchError::MessageNotFound)?;

        let conversation = self
            .store
            .conversation(&message.conversation_id)
            .await?
            .ok_or(DispatchError::ConversationNotFound)?;
        if let Some(caller) = company_id {
            if caller != &conversation.company_id {
                return Err(DispatchError::AccessDenied);
            }
        }

        let connection = self
            .store
            .channel_connection(&conversation.channel_id)
            .await?
            .ok_or(DispatchError::ConnectionNotFound)?;
        if let Some(caller) = company_id {
            if caller != &connection.company_id {
                return Err(DispatchError::AccessDenied);
            }
        }

        let caps = capabilities(conversation.kind);
        if !caps.supports_delete {
            return Err(DispatchError::DeletionUnsupported);
        }
        if let Some(limit) = caps.delete_time_limit_minutes {
            let age = Utc::now() - message.effective_time();
            if age > Duration::minutes(limit) {
                return Err(DispatchError::MessageTooOld);
            }
        }

        match conversation.kind {
            // Remote delete first; the local row survives a provider
            // failure so the inbox never lies about what the counterpart
            // can still see.
            ChannelKind::Whatsapp => {
                let adapter = self.registry.get(conversation.kind);
                adapter
                    .delete_message(&connection, &conversation, &message)
                    .await?;
                self.store.delete_message(&message.id).await?;
            }
            // No remote delete path exists for these kinds; if the
            // capability table ever grants them deletion it is local-only.
            ChannelKind::WhatsappCloud
            | ChannelKind::WhatsappTwilio
            | ChannelKind::Dialog360
            | ChannelKind::Messenger
            | ChannelKind::Instagram
            | ChannelKind::Tiktok
            | ChannelKind::Email
            | ChannelKind::Sms
            | ChannelKind::Webchat => {
                self.store.delete_message(&message.id).await?;
            }
        }

        tracing::info!(
            message = %message.id,
            conversation = %conversation.id,
            user = %user_id,
            "message deleted"
        );
        self.publisher.publish(
            Scope::company(conversation.company_id.clone()),
            InboxEvent::MessageDeleted {
                conversation_id: conversation.id.clone(),
                message_id: message.id.clone(),
            },
        );
        Ok(())
    }

    /// Activate a connection through its adapter and persist the outcome.
    ///
    /// # Errors
    ///
    /// Returns error if the connection is missing or its record is
    /// unusable; provider rejection is reported in the outcome instead.
    pub async fn connect_channel(
        &self,
        connection_id: &ConnectionId,
    ) -> Result<ConnectOutcome, DispatchError> {
        let connection = self
            .store
            .channel_connection(connection_id)
            .await?
            .ok_or(DispatchError::ConnectionNotFound)?;
        let outcome = self
            .registry
            .get(connection.kind)
            .connect(&connection)
            .await?;
        self.persist_outcome(&connection, &outcome).await?;
        Ok(outcome)
    }

    /// Deactivate a connection through its adapter and persist the
    /// outcome.
    ///
    /// # Errors
    ///
    /// Returns error if the connection is missing or its record is
    /// unusable.
    pub async fn disconnect_channel(
        &self,
        connection_id: &ConnectionId,
    ) -> Result<ConnectOutcome, DispatchError> {
        let connection = self
            .store
            .channel_connection(connection_id)
            .await?
            .ok_or(DispatchError::ConnectionNotFound)?;
        let outcome = self
            .registry
            .get(connection.kind)
            .disconnect(&connection)
            .await?;
        self.persist_outcome(&connection, &outcome).await?;
        Ok(outcome)
    }

    async fn persist_outcome(
        &self,
        connection: &ChannelConnection,
        outcome: &ConnectOutcome,
    ) -> Result<(), DispatchError> {
        self.store
            .update_channel_connection(
                &connection.id,
                ConnectionPatch {
                    status: Some(outcome.status),
                    data: Some(outcome.data.clone()),
                },
            )
            .await?;
        self.publisher.publish(
            Scope::company(connection.company_id.clone()),
            InboxEvent::ChannelStatus {
                connection_id: connection.id.clone(),
                status: outcome.status,
                error: outcome.error.clone(),
            },
        );
        Ok(())
    }

    /// Resolve who a reply goes to: the group JID for group conversations,
    /// the contact's channel-family address otherwise.
    async fn resolve_recipient(
        &self,
        conversation: &Conversation,
    ) -> Result<(Recipient, Option<Contact>), DispatchError> {
        match &conversation.peer {
            ConversationPeer::Group { jid } => {
                if jid.trim().is_empty() {
                    return Err(DispatchError::MissingGroupJid);
                }
                Ok((Recipient::Group { jid: jid.clone() }, None))
            }
            ConversationPeer::Contact { contact_id } => {
                let contact = self
                    .store
                    .contact(contact_id)
                    .await?
                    .ok_or(DispatchError::ContactNotFound)?;
                let address = address_for(conversation.kind, &contact)
                    .ok_or(DispatchError::MissingRecipient)?;
                Ok((Recipient::Individual { address }, Some(contact)))
            }
        }
    }

    /// Prefix the agent signature when the company setting allows it.
    ///
    /// Every failure along the way (setting lookup, user lookup, empty
    /// name) degrades to sending without a signature and records a
    /// warning; signatures are best-effort by design.
    async fn apply_signature(
        &self,
        company_id: &CompanyId,
        user_id: &UserId,
        content: &str,
        warnings: &mut Vec<Warning>,
    ) -> String {
        let enabled = match self.store.company_setting(company_id, SIGNATURE_SETTING).await {
            Ok(Some(raw)) => match raw.trim().to_lowercase().as_str() {
                "true" | "1" | "on" | "yes" => true,
                "false" | "0" | "off" | "no" => false,
                other => {
                    warnings.push(Warning {
                        context: "signature",
                        detail: format!("unrecognized setting value {other:?}; defaulting on"),
                    });
                    true
                }
            },
            // Signatures default on when the setting is absent.
            Ok(None) => true,
            Err(e) => {
                tracing::warn!(error = %e, "signature setting lookup failed");
                warnings.push(Warning {
                    context: "signature",
                    detail: e.to_string(),
                });
                true
            }
        };
        if !enabled {
            return content.to_string();
        }

        match self.store.user(user_id).await {
            Ok(Some(user)) => user.signature_name().map_or_else(
                || {
                    warnings.push(Warning {
                        context: "signature",
                        detail: format!("user {user_id} has no resolvable name"),
                    });
                    content.to_string()
                },
                |name| format!("> *{name}*\n\n{content}"),
            ),
            Ok(None) => {
                warnings.push(Warning {
                    context: "signature",
                    detail: format!("user {user_id} not found"),
                });
                content.to_string()
            }
            Err(e) => {
                tracing::warn!(error = %e, "signature user lookup failed");
                warnings.push(Warning {
                    context: "signature",
                    detail: e.to_string(),
                });
                content.to_string()
            }
        }
    }
}

/// The address a channel family keys its recipients on.
fn address_for(kind: ChannelKind, contact: &Contact) -> Option<String> {
    let address = match kind {
        ChannelKind::Whatsapp
        | ChannelKind::WhatsappCloud
        | ChannelKind::WhatsappTwilio
        | ChannelKind::Dialog360
        | ChannelKind::Sms => {
            let digits = contact
                .phone
                .as_deref()
                .map(normalize_phone)
                .filter(|d| !d.is_empty())
                .or_else(|| Some(normalize_phone(&contact.identifier)))?;
            digits
        }
        ChannelKind::Email => contact
            .email
            .clone()
            .filter(|e| !e.trim().is_empty())
            .unwrap_or_else(|| contact.identifier.clone()),
        ChannelKind::Messenger
        | ChannelKind::Instagram
        | ChannelKind::Tiktok
        | ChannelKind::Webchat => contact.identifier.clone(),
    };
    let address = address.trim().to_string();
    if address.is_empty() { None } else { Some(address) }
}

#[cfg(test)]
pub(crate) mod test_support {
    use chrono::Utc;
    use omnidesk_core::types::{
        ChannelConnection, ContactId, Conversation, ConversationId, ConversationPeer,
        ConversationStatus,
    };

    /// A 1:1 conversation shell on the given connection, for adapter
    /// tests that only need the record shape.
    pub(crate) fn conversation_for(connection: &ChannelConnection) -> Conversation {
        Conversation {
            id: ConversationId::new("cv-test"),
            company_id: connection.company_id.clone(),
            channel_id: connection.id.clone(),
            kind: connection.kind,
            peer: ConversationPeer::Contact {
                contact_id: ContactId::new("contact-test"),
            },
            status: ConversationStatus::Open,
            last_message_at: None,
            bot_disabled: false,
            created_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use pretty_assertions::assert_eq;

    use omnidesk_core::broadcast::EventEnvelope;
    use omnidesk_core::hooks::NullHook;
    use omnidesk_core::storage::MemoryStore;
    use omnidesk_core::types::{
        ConnectionData, ConnectionId, ConnectionStatus, IdentifierKind, MessageMeta, NewContact,
        NewConversation, User,
    };
    use crate::traits::{ConnectionProbe, DeliveryReceipt, MediaPayload};

    /// Adapter double that records calls and succeeds.
    struct SpyAdapter {
        kind: ChannelKind,
        calls: AtomicUsize,
        last_content: Mutex<Option<String>>,
    }

    impl SpyAdapter {
        fn new(kind: ChannelKind) -> Arc<Self> {
            Arc::new(Self {
                kind,
                calls: AtomicUsize::new(0),
                last_content: Mutex::new(None),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }

        fn last_content(&self) -> Option<String> {
            self.last_content.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ChannelAdapter for SpyAdapter {
        fn kind(&self) -> ChannelKind {
            self.kind
        }

        async fn connect(
            &self,
            connection: &ChannelConnection,
        ) -> Result<ConnectOutcome, AdapterError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(ConnectOutcome::active(connection.data.clone()))
        }

        async fn disconnect(
            &self,
            connection: &ChannelConnection,
        ) -> Result<ConnectOutcome, AdapterError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(ConnectOutcome::disconnected(connection.data.clone()))
        }

        async fn probe(
            &self,
            _connection: &ChannelConnection,
        ) -> Result<ConnectionProbe, AdapterError> {
            Ok(ConnectionProbe {
                connected: true,
                account_id: None,
                display_name: None,
                error: None,
            })
        }

        async fn send_message(
            &self,
            _connection: &ChannelConnection,
            _recipient: &Recipient,
            _content: &str,
        ) -> Result<DeliveryReceipt, AdapterError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(DeliveryReceipt::with_external_id("spy-msg"))
        }

        async fn send_media(
            &self,
            _connection: &ChannelConnection,
            _recipient: &Recipient,
            _media: &MediaPayload,
        ) -> Result<DeliveryReceipt, AdapterError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(DeliveryReceipt::with_external_id("spy-media"))
        }

        async fn send_reply(
            &self,
            ctx: ReplyContext<'_>,
        ) -> Result<DeliveryReceipt, AdapterError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            *self.last_content.lock().unwrap() = Some(ctx.content);
            Ok(DeliveryReceipt::with_external_id("spy-reply"))
        }

        async fn delete_message(
            &self,
            _connection: &ChannelConnection,
            _conversation: &Conversation,
            _message: &Message,
        ) -> Result<(), AdapterError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    /// Publisher double that records envelopes.
    #[derive(Default)]
    struct RecordingPublisher {
        events: Mutex<Vec<EventEnvelope>>,
    }

    impl RecordingPublisher {
        fn scopes(&self) -> Vec<Scope> {
            self.events
                .lock()
                .unwrap()
                .iter()
                .map(|e| e.scope.clone())
                .collect()
        }
    }

    impl EventPublisher for RecordingPublisher {
        fn publish(&self, scope: Scope, event: InboxEvent) {
            self.events
                .lock()
                .unwrap()
                .push(EventEnvelope::new(scope, event));
        }
    }

    struct Fixture {
        manager: ChannelManager,
        store: Arc<MemoryStore>,
        publisher: Arc<RecordingPublisher>,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let publisher = Arc::new(RecordingPublisher::default());
        let manager = ChannelManager::new(store.clone(), publisher.clone(), Arc::new(NullHook));
        Fixture {
            manager,
            store,
            publisher,
        }
    }

    async fn seed_conversation(
        store: &MemoryStore,
        kind: ChannelKind,
        data: ConnectionData,
        identifier: &str,
        identifier_kind: IdentifierKind,
    ) -> Conversation {
        let connection = ChannelConnection {
            id: ConnectionId::new(format!("conn-{kind}")),
            company_id: CompanyId::new("co1"),
            kind,
            status: ConnectionStatus::Active,
            data,
        };
        store
            .create_channel_connection(connection.clone())
            .await
            .unwrap();
        let contact = store
            .get_or_create_contact(NewContact {
                company_id: CompanyId::new("co1"),
                identifier: identifier.to_string(),
                identifier_kind,
                name: Some("Visitor".to_string()),
                email: None,
                phone: matches!(identifier_kind, IdentifierKind::Phone)
                    .then(|| identifier.to_string()),
            })
            .await
            .unwrap();
        store
            .create_conversation(NewConversation {
                company_id: CompanyId::new("co1"),
                channel_id: connection.id,
                kind,
                peer: ConversationPeer::Contact {
                    contact_id: contact.id,
                },
            })
            .await
            .unwrap()
    }

    async fn seed_webchat(fixture: &Fixture) -> Conversation {
        seed_conversation(
            &fixture.store,
            ChannelKind::Webchat,
            ConnectionData::Webchat {
                widget_token: Some("tok".to_string()),
                site_name: None,
            },
            "sess-1",
            IdentifierKind::Webchat,
        )
        .await
    }

    fn reply_options() -> ReplyOptions {
        ReplyOptions {
            original_message_id: MessageId::new("m0"),
            original_content: "original".to_string(),
            original_sender: "Visitor".to_string(),
            quoted_message: None,
        }
    }

    #[tokio::test]
    async fn test_unknown_kind_gets_disabled_capabilities() {
        let fixture = fixture();
        let caps = fixture.manager.capabilities_of("carrier-pigeon");
        assert!(!caps.supports_reply);
        assert!(!caps.supports_delete);
        assert!(!caps.supports_quoted_messages);
    }

    #[tokio::test]
    async fn test_reply_to_missing_conversation() {
        let fixture = fixture();
        let err = fixture
            .manager
            .send_reply(
                &ConversationId::new("nope"),
                "hi",
                reply_options(),
                &UserId::new("u1"),
                None,
            )
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Conversation not found");
    }

    #[tokio::test]
    async fn test_cross_tenant_reply_is_denied_before_any_side_effect() {
        let mut fixture = fixture();
        let conversation = seed_webchat(&fixture).await;
        let spy = SpyAdapter::new(ChannelKind::Webchat);
        fixture.manager.set_adapter(ChannelKind::Webchat, spy.clone());

        let err = fixture
            .manager
            .send_reply(
                &conversation.id,
                "hi",
                reply_options(),
                &UserId::new("u1"),
                Some(&CompanyId::new("co2")),
            )
            .await
            .unwrap_err();

        assert!(err.to_string().starts_with("Access denied"));
        assert_eq!(spy.calls(), 0);
        assert_eq!(fixture.store.message_count(), 0);
        assert!(fixture.publisher.scopes().is_empty());
    }

    #[tokio::test]
    async fn test_cross_tenant_delete_is_denied() {
        let fixture = fixture();
        let conversation = seed_webchat(&fixture).await;
        let message = fixture
            .store
            .create_message(NewMessage::inbound_text(conversation.id.clone(), "hi"))
            .await
            .unwrap();

        let err = fixture
            .manager
            .delete_message(
                &message.id,
                &UserId::new("u1"),
                Some(&CompanyId::new("co2")),
            )
            .await
            .unwrap_err();

        assert!(err.to_string().starts_with("Access denied"));
        assert_eq!(fixture.store.message_count(), 1);
    }

    #[tokio::test]
    async fn test_delete_unsupported_channel_never_calls_provider() {
        let mut fixture = fixture();
        let conversation = seed_webchat(&fixture).await;
        let spy = SpyAdapter::new(ChannelKind::Webchat);
        fixture.manager.set_adapter(ChannelKind::Webchat, spy.clone());
        let message = fixture
            .store
            .create_message(NewMessage::inbound_text(conversation.id.clone(), "hi"))
            .await
            .unwrap();

        let err = fixture
            .manager
            .delete_message(&message.id, &UserId::new("u1"), None)
            .await
            .unwrap_err();

        assert_eq!(
            err.to_string(),
            "Message deletion is not supported for this channel"
        );
        assert_eq!(spy.calls(), 0);
        assert_eq!(fixture.store.message_count(), 1);
    }

    async fn seed_whatsapp_message(fixture: &Fixture, age_minutes: i64) -> MessageId {
        let conversation = seed_conversation(
            &fixture.store,
            ChannelKind::Whatsapp,
            ConnectionData::Whatsapp {
                bridge_url: "http://unused.invalid".to_string(),
                instance_id: "inst".to_string(),
                api_token: "t".to_string(),
                phone_number: None,
            },
            "15559998888",
            IdentifierKind::Phone,
        )
        .await;
        let mut new = NewMessage::outbound_text(conversation.id, "hi");
        new.external_id = Some("3EB0".to_string());
        new.metadata = MessageMeta::WhatsappKey {
            remote_jid: "15559998888@s.whatsapp.net".to_string(),
            from_me: true,
            id: "3EB0".to_string(),
        };
        new.sent_at = Some(Utc::now() - Duration::minutes(age_minutes));
        fixture.store.create_message(new).await.unwrap().id
    }

    #[tokio::test]
    async fn test_delete_age_beyond_capability_limit_fails_coarse_gate() {
        let fixture = fixture();
        let message_id = seed_whatsapp_message(&fixture, 4321).await;

        let err = fixture
            .manager
            .delete_message(&message_id, &UserId::new("u1"), None)
            .await
            .unwrap_err();

        assert!(matches!(err, DispatchError::MessageTooOld));
        assert_eq!(fixture.store.message_count(), 1);
    }

    #[tokio::test]
    async fn test_delete_inside_coarse_gate_still_hits_protocol_gate() {
        // 4319 minutes passes the 4320-minute capability gate but is far
        // beyond the 72-minute protocol gate inside the adapter.
        let fixture = fixture();
        let message_id = seed_whatsapp_message(&fixture, 4319).await;

        let err = fixture
            .manager
            .delete_message(&message_id, &UserId::new("u1"), None)
            .await
            .unwrap_err();

        assert_eq!(err.to_string(), "Message is too old to be deleted");
        assert!(matches!(
            err,
            DispatchError::Adapter(AdapterError::TooOld)
        ));
        // The local row survives a provider-side refusal.
        assert_eq!(fixture.store.message_count(), 1);
    }

    #[tokio::test]
    async fn test_whatsapp_reply_without_quote_fails() {
        let fixture = fixture();
        let conversation = seed_conversation(
            &fixture.store,
            ChannelKind::Whatsapp,
            ConnectionData::Whatsapp {
                bridge_url: "http://unused.invalid".to_string(),
                instance_id: "inst".to_string(),
                api_token: "t".to_string(),
                phone_number: None,
            },
            "15559998888",
            IdentifierKind::Phone,
        )
        .await;

        let err = fixture
            .manager
            .send_reply(
                &conversation.id,
                "hi",
                reply_options(),
                &UserId::new("u1"),
                None,
            )
            .await
            .unwrap_err();

        assert_eq!(
            err.to_string(),
            "No quoted message object provided for WhatsApp reply"
        );
        assert_eq!(fixture.store.message_count(), 0);
    }

    #[tokio::test]
    async fn test_messenger_group_reply_rejected_without_network() {
        let fixture = fixture();
        let connection = ChannelConnection {
            id: ConnectionId::new("conn-fb"),
            company_id: CompanyId::new("co1"),
            kind: ChannelKind::Messenger,
            status: ConnectionStatus::Active,
            data: ConnectionData::Messenger {
                page_id: "p1".to_string(),
                page_access_token: "t".to_string(),
            },
        };
        fixture
            .store
            .create_channel_connection(connection.clone())
            .await
            .unwrap();
        let conversation = fixture
            .store
            .create_conversation(NewConversation {
                company_id: CompanyId::new("co1"),
                channel_id: connection.id,
                kind: ChannelKind::Messenger,
                peer: ConversationPeer::Group {
                    jid: "group-1".to_string(),
                },
            })
            .await
            .unwrap();

        let err = fixture
            .manager
            .send_reply(
                &conversation.id,
                "hi",
                reply_options(),
                &UserId::new("u1"),
                None,
            )
            .await
            .unwrap_err();

        assert_eq!(
            err.to_string(),
            "Messenger does not support group chat replies"
        );
        assert_eq!(fixture.store.message_count(), 0);
    }

    #[tokio::test]
    async fn test_group_without_jid_is_rejected() {
        let fixture = fixture();
        let connection = ChannelConnection {
            id: ConnectionId::new("conn-wa"),
            company_id: CompanyId::new("co1"),
            kind: ChannelKind::Whatsapp,
            status: ConnectionStatus::Active,
            data: ConnectionData::Whatsapp {
                bridge_url: "http://unused.invalid".to_string(),
                instance_id: "inst".to_string(),
                api_token: "t".to_string(),
                phone_number: None,
            },
        };
        fixture
            .store
            .create_channel_connection(connection.clone())
            .await
            .unwrap();
        let conversation = fixture
            .store
            .create_conversation(NewConversation {
                company_id: CompanyId::new("co1"),
                channel_id: connection.id,
                kind: ChannelKind::Whatsapp,
                peer: ConversationPeer::Group {
                    jid: "  ".to_string(),
                },
            })
            .await
            .unwrap();

        let err = fixture
            .manager
            .send_reply(
                &conversation.id,
                "hi",
                reply_options(),
                &UserId::new("u1"),
                None,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::MissingGroupJid));
    }

    #[tokio::test]
    async fn test_signature_prefixes_agent_name() {
        let mut fixture = fixture();
        let conversation = seed_webchat(&fixture).await;
        let spy = SpyAdapter::new(ChannelKind::Webchat);
        fixture.manager.set_adapter(ChannelKind::Webchat, spy.clone());
        fixture
            .store
            .create_user(User {
                id: UserId::new("u1"),
                full_name: Some("Jane Doe".to_string()),
                ..User::default()
            })
            .await
            .unwrap();

        let receipt = fixture
            .manager
            .send_reply(
                &conversation.id,
                "on my way",
                reply_options(),
                &UserId::new("u1"),
                Some(&CompanyId::new("co1")),
            )
            .await
            .unwrap();

        assert_eq!(receipt.message.content, "> *Jane Doe*\n\non my way");
        assert_eq!(spy.last_content().unwrap(), "> *Jane Doe*\n\non my way");
        assert!(receipt.warnings.is_empty());
    }

    #[tokio::test]
    async fn test_signature_disabled_by_setting() {
        let mut fixture = fixture();
        let conversation = seed_webchat(&fixture).await;
        let spy = SpyAdapter::new(ChannelKind::Webchat);
        fixture.manager.set_adapter(ChannelKind::Webchat, spy.clone());
        fixture
            .store
            .set_company_setting(&CompanyId::new("co1"), SIGNATURE_SETTING, "false")
            .await
            .unwrap();

        let receipt = fixture
            .manager
            .send_reply(
                &conversation.id,
                "plain",
                reply_options(),
                &UserId::new("u1"),
                None,
            )
            .await
            .unwrap();

        assert_eq!(receipt.message.content, "plain");
    }

    #[tokio::test]
    async fn test_signature_failure_degrades_to_warning() {
        let mut fixture = fixture();
        let conversation = seed_webchat(&fixture).await;
        let spy = SpyAdapter::new(ChannelKind::Webchat);
        fixture.manager.set_adapter(ChannelKind::Webchat, spy.clone());
        // No user row exists for u-missing.

        let receipt = fixture
            .manager
            .send_reply(
                &conversation.id,
                "hello",
                reply_options(),
                &UserId::new("u-missing"),
                None,
            )
            .await
            .unwrap();

        assert_eq!(receipt.message.content, "hello");
        assert_eq!(receipt.warnings.len(), 1);
        assert_eq!(receipt.warnings[0].context, "signature");
    }

    #[tokio::test]
    async fn test_successful_reply_persists_and_broadcasts() {
        let mut fixture = fixture();
        let conversation = seed_webchat(&fixture).await;
        let spy = SpyAdapter::new(ChannelKind::Webchat);
        fixture.manager.set_adapter(ChannelKind::Webchat, spy.clone());
        fixture
            .store
            .set_company_setting(&CompanyId::new("co1"), SIGNATURE_SETTING, "false")
            .await
            .unwrap();

        let receipt = fixture
            .manager
            .send_reply(
                &conversation.id,
                "answer",
                reply_options(),
                &UserId::new("u1"),
                Some(&CompanyId::new("co1")),
            )
            .await
            .unwrap();

        assert_eq!(spy.calls(), 1);
        assert_eq!(receipt.message.external_id.as_deref(), Some("spy-reply"));
        assert_eq!(receipt.message.direction, Direction::Outbound);
        assert_eq!(fixture.store.message_count(), 1);

        let updated = fixture
            .store
            .conversation(&conversation.id)
            .await
            .unwrap()
            .unwrap();
        assert!(updated.last_message_at.is_some());

        // Company broadcast plus the webchat visitor session broadcast.
        let scopes = fixture.publisher.scopes();
        assert!(scopes.contains(&Scope::company(CompanyId::new("co1"))));
        assert!(scopes.contains(&Scope::session("sess-1".to_string())));
    }

    #[tokio::test]
    async fn test_delete_in_window_removes_row_and_broadcasts() {
        let mut fixture = fixture();
        let spy = SpyAdapter::new(ChannelKind::Whatsapp);
        fixture.manager.set_adapter(ChannelKind::Whatsapp, spy.clone());
        let message_id = seed_whatsapp_message(&fixture, 10).await;

        fixture
            .manager
            .delete_message(&message_id, &UserId::new("u1"), None)
            .await
            .unwrap();

        assert_eq!(spy.calls(), 1);
        assert_eq!(fixture.store.message_count(), 0);
        assert!(
            fixture
                .publisher
                .scopes()
                .contains(&Scope::company(CompanyId::new("co1")))
        );
    }

    #[tokio::test]
    async fn test_connect_channel_persists_outcome() {
        let mut fixture = fixture();
        let spy = SpyAdapter::new(ChannelKind::Webchat);
        fixture.manager.set_adapter(ChannelKind::Webchat, spy.clone());
        let connection = ChannelConnection {
            id: ConnectionId::new("conn-web"),
            company_id: CompanyId::new("co1"),
            kind: ChannelKind::Webchat,
            status: ConnectionStatus::Inactive,
            data: ConnectionData::Webchat {
                widget_token: None,
                site_name: None,
            },
        };
        fixture
            .store
            .create_channel_connection(connection)
            .await
            .unwrap();

        let outcome = fixture
            .manager
            .connect_channel(&ConnectionId::new("conn-web"))
            .await
            .unwrap();
        assert_eq!(outcome.status, ConnectionStatus::Active);

        let stored = fixture
            .store
            .channel_connection(&ConnectionId::new("conn-web"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.status, ConnectionStatus::Active);
    }
}
