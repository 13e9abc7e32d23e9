//! Email channel adapter.
//!
//! Outbound mail goes through SMTP; replies thread natively with
//! `In-Reply-To` and `References` headers taken from the original
//! message's stored metadata. Inbound mail arrives as raw MIME (from an
//! inbound-mail HTTP hook) and is normalized with `mail-parser`.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Tokio1Executor};
use mail_parser::MessageParser;

use omnidesk_core::broadcast::{EventPublisher, InboxEvent, Scope};
use omnidesk_core::hooks::AutomationHook;
use omnidesk_core::storage::{ConversationPatch, StoreFacade};
use omnidesk_core::types::{
    ChannelConnection, ChannelKind, ConnectionData, ConversationPeer, Direction, IdentifierKind,
    Message, MessageKind, MessageMeta, MessageStatus, NewContact, NewConversation, NewMessage,
    SenderKind,
};

use crate::traits::{
    AdapterError, ChannelAdapter, ConnectOutcome, ConnectionProbe, DeliveryReceipt, MediaPayload,
    Recipient, ReplyContext,
};

#[derive(Debug, Clone)]
struct SmtpCreds {
    host: String,
    port: u16,
    username: String,
    password: String,
    from_address: String,
}

/// Email adapter.
pub struct EmailAdapter {
    store: Arc<dyn StoreFacade>,
    publisher: Arc<dyn EventPublisher>,
    hook: Arc<dyn AutomationHook>,
}

impl EmailAdapter {
    /// Create the adapter.
    #[must_use]
    pub fn new(
        store: Arc<dyn StoreFacade>,
        publisher: Arc<dyn EventPublisher>,
        hook: Arc<dyn AutomationHook>,
    ) -> Self {
        Self {
            store,
            publisher,
            hook,
        }
    }

    fn creds(connection: &ChannelConnection) -> Result<SmtpCreds, AdapterError> {
        match &connection.data {
            ConnectionData::Email {
                smtp_host,
                smtp_port,
                username,
                password,
                from_address,
            } => Ok(SmtpCreds {
                host: smtp_host.clone(),
                port: *smtp_port,
                username: username.clone(),
                password: password.clone(),
                from_address: from_address.clone(),
            }),
            _ => Err(AdapterError::Config(
                "connection data is not email configuration".to_string(),
            )),
        }
    }

    fn transport(creds: &SmtpCreds) -> Result<AsyncSmtpTransport<Tokio1Executor>, AdapterError> {
        Ok(AsyncSmtpTransport::<Tokio1Executor>::relay(&creds.host)
            .map_err(|e| AdapterError::Config(e.to_string()))?
            .port(creds.port)
            .credentials(Credentials::new(
                creds.username.clone(),
                creds.password.clone(),
            ))
            .build())
    }

    fn recipients(recipient: &Recipient) -> Vec<&str> {
        match recipient {
            Recipient::Individual { address } => vec![address.as_str()],
            // A group email conversation is a thread with several
            // counterparts; the jid carries the address list.
            Recipient::Group { jid } => jid.split(',').map(str::trim).collect(),
        }
    }

    fn fresh_message_id(creds: &SmtpCreds) -> String {
        let domain = creds
            .from_address
            .split('@')
            .nth(1)
            .unwrap_or("omnidesk.local");
        format!("<{}@{domain}>", uuid::Uuid::new_v4())
    }

    async fn deliver(
        &self,
        creds: &SmtpCreds,
        recipient: &Recipient,
        subject: &str,
        body: String,
        threading: Option<(&str, &[String])>,
    ) -> Result<DeliveryReceipt, AdapterError> {
        let from: Mailbox = creds
            .from_address
            .parse()
            .map_err(|_| AdapterError::Config("invalid from address".to_string()))?;

        let message_id = Self::fresh_message_id(creds);
        let mut builder = lettre::Message::builder()
            .from(from)
            .subject(subject)
            .message_id(Some(message_id.clone()));

        for address in Self::recipients(recipient) {
            let to: Mailbox = address.parse().map_err(|_| {
                AdapterError::DeliveryFailed(format!("invalid recipient address: {address}"))
            })?;
            builder = builder.to(to);
        }

        let mut references: Vec<String> = Vec::new();
        if let Some((in_reply_to, refs)) = threading {
            references = refs.to_vec();
            references.push(in_reply_to.to_string());
            builder = builder
                .in_reply_to(in_reply_to.to_string())
                .references(references.join(" "));
        }

        let email = builder
            .body(body)
            .map_err(|e| AdapterError::DeliveryFailed(e.to_string()))?;

        Self::transport(creds)?
            .send(email)
            .await
            .map_err(|e| AdapterError::DeliveryFailed(e.to_string()))?;

        Ok(DeliveryReceipt {
            external_id: Some(message_id.clone()),
            metadata: MessageMeta::Email {
                message_id,
                references,
                subject: Some(subject.to_string()),
            },
            sent_at: Utc::now(),
        })
    }

    /// Normalize a raw inbound MIME message, materializing the contact and
    /// conversation keyed by the sender address.
    ///
    /// # Errors
    ///
    /// Returns error if the MIME payload cannot be parsed or persistence
    /// fails.
    pub async fn process_inbound(
        &self,
        connection: &ChannelConnection,
        raw: &[u8],
    ) -> Result<Option<Message>, AdapterError> {
        let parsed = MessageParser::default().parse(raw).ok_or_else(|| {
            AdapterError::DeliveryFailed("unparseable inbound email".to_string())
        })?;

        let Some(from_address) = parsed
            .from()
            .and_then(|from| from.first())
            .and_then(|addr| addr.address())
        else {
            tracing::warn!("inbound email without a From address");
            return Ok(None);
        };
        let from_name = parsed
            .from()
            .and_then(|from| from.first())
            .and_then(|addr| addr.name())
            .map(ToString::to_string);

        let message_id = parsed
            .message_id()
            .map_or_else(|| format!("<{}@inbound>", uuid::Uuid::new_v4()), |id| format!("<{id}>"));

        // Idempotent on redelivery of the same Message-ID.
        if self
            .store
            .message_by_external_id(&message_id)
            .await?
            .is_some()
        {
            return Ok(None);
        }

        let references: Vec<String> = parsed
            .headers()
            .iter()
            .find(|header| header.name().eq_ignore_ascii_case("References"))
            .map(|header| match header.value() {
                mail_parser::HeaderValue::Text(text) => text
                    .split_whitespace()
                    .map(ensure_angle_brackets)
                    .collect(),
                mail_parser::HeaderValue::TextList(list) => {
                    list.iter().map(|text| ensure_angle_brackets(text)).collect()
                }
                _ => Vec::new(),
            })
            .unwrap_or_default();

        let contact = self
            .store
            .get_or_create_contact(NewContact {
                company_id: connection.company_id.clone(),
                identifier: from_address.to_lowercase(),
                identifier_kind: IdentifierKind::Email,
                name: from_name,
                email: Some(from_address.to_lowercase()),
                phone: None,
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
                        kind: ChannelKind::Email,
                        peer: ConversationPeer::Contact {
                            contact_id: contact.id.clone(),
                        },
                    })
                    .await?
            }
        };

        let body = parsed
            .body_text(0)
            .map(|text| text.into_owned())
            .unwrap_or_default();

        let message = self
            .store
            .create_message(NewMessage {
                conversation_id: conversation.id.clone(),
                direction: Direction::Inbound,
                kind: MessageKind::Text,
                content: body,
                media_url: None,
                status: MessageStatus::Delivered,
                external_id: Some(message_id.clone()),
                metadata: MessageMeta::Email {
                    message_id,
                    references,
                    subject: parsed.subject().map(ToString::to_string),
                },
                sender_kind: SenderKind::Contact,
                sender_id: None,
                sent_at: parsed
                    .date()
                    .and_then(|d| chrono::DateTime::from_timestamp(d.to_timestamp(), 0)),
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
            .publish(Scope::company(connection.company_id.clone()), event.clone());
        self.publisher.publish(Scope::Global, event);

        if let Err(e) = self.hook.message_received(&conversation, &message).await {
            tracing::warn!(error = %e, "email automation handoff failed");
        }

        Ok(Some(message))
    }
}

fn ensure_angle_brackets(id: &str) -> String {
    let trimmed = id.trim();
    if trimmed.starts_with('<') {
        trimmed.to_string()
    } else {
        format!("<{trimmed}>")
    }
}

#[async_trait]
impl ChannelAdapter for EmailAdapter {
    fn kind(&self) -> ChannelKind {
        ChannelKind::Email
    }

    async fn connect(
        &self,
        connection: &ChannelConnection,
    ) -> Result<ConnectOutcome, AdapterError> {
        let creds = Self::creds(connection)?;
        match Self::transport(&creds)?.test_connection().await {
            Ok(true) => Ok(ConnectOutcome::active(connection.data.clone())),
            Ok(false) => Ok(ConnectOutcome::errored(
                connection.data.clone(),
                "SMTP server rejected the connection".to_string(),
            )),
            Err(e) => Ok(ConnectOutcome::errored(
                connection.data.clone(),
                e.to_string(),
            )),
        }
    }

    async fn disconnect(
        &self,
        connection: &ChannelConnection,
    ) -> Result<ConnectOutcome, AdapterError> {
        Self::creds(connection)?;
        Ok(ConnectOutcome::disconnected(connection.data.clone()))
    }

    async fn probe(
        &self,
        connection: &ChannelConnection,
    ) -> Result<ConnectionProbe, AdapterError> {
        let creds = Self::creds(connection)?;
        match Self::transport(&creds)?.test_connection().await {
            Ok(connected) => Ok(ConnectionProbe {
                connected,
                account_id: Some(creds.username),
                display_name: Some(creds.from_address),
                error: None,
            }),
            Err(e) => Ok(ConnectionProbe {
                connected: false,
                account_id: None,
                display_name: None,
                error: Some(e.to_string()),
            }),
        }
    }

    async fn send_message(
        &self,
        connection: &ChannelConnection,
        recipient: &Recipient,
        content: &str,
    ) -> Result<DeliveryReceipt, AdapterError> {
        let creds = Self::creds(connection)?;
        self.deliver(&creds, recipient, "Message from support", content.to_string(), None)
            .await
    }

    async fn send_media(
        &self,
        connection: &ChannelConnection,
        recipient: &Recipient,
        media: &MediaPayload,
    ) -> Result<DeliveryReceipt, AdapterError> {
        let creds = Self::creds(connection)?;
        // Media goes out as a link; attachment bodies are a later concern
        // for the campaign sender.
        let body = match media.caption.as_deref() {
            Some(caption) => format!("{caption}\n\n{}", media.url),
            None => media.url.clone(),
        };
        self.deliver(&creds, recipient, "Message from support", body, None)
            .await
    }

    async fn send_reply(&self, ctx: ReplyContext<'_>) -> Result<DeliveryReceipt, AdapterError> {
        let creds = Self::creds(ctx.connection)?;

        // Threading headers come from the stored original; without it the
        // reply cannot join the thread.
        let original = self
            .store
            .message(&ctx.reply.original_message_id)
            .await?
            .ok_or_else(|| {
                AdapterError::DeliveryFailed(
                    "Original message not found for email reply".to_string(),
                )
            })?;
        let MessageMeta::Email {
            message_id,
            references,
            subject,
        } = &original.metadata
        else {
            return Err(AdapterError::DeliveryFailed(
                "Original message not found for email reply".to_string(),
            ));
        };

        let subject = subject
            .as_deref()
            .map_or_else(|| "Re: your message".to_string(), |s| {
                if s.to_lowercase().starts_with("re:") {
                    s.to_string()
                } else {
                    format!("Re: {s}")
                }
            });

        self.deliver(
            &creds,
            &ctx.recipient,
            &subject,
            ctx.content.clone(),
            Some((message_id.as_str(), references.as_slice())),
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use omnidesk_core::broadcast::NullPublisher;
    use omnidesk_core::hooks::NullHook;
    use omnidesk_core::storage::MemoryStore;
    use omnidesk_core::types::{CompanyId, ConnectionId, ConnectionStatus, MessageId};

    fn connection() -> ChannelConnection {
        ChannelConnection {
            id: ConnectionId::new("conn-mail"),
            company_id: CompanyId::new("co1"),
            kind: ChannelKind::Email,
            status: ConnectionStatus::Active,
            data: ConnectionData::Email {
                smtp_host: "smtp.example.com".to_string(),
                smtp_port: 587,
                username: "support@acme.test".to_string(),
                password: "pw".to_string(),
                from_address: "support@acme.test".to_string(),
            },
        }
    }

    fn adapter_with_store() -> (EmailAdapter, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let adapter = EmailAdapter::new(store.clone(), Arc::new(NullPublisher), Arc::new(NullHook));
        (adapter, store)
    }

    const RAW_EMAIL: &str = "From: Jane Doe <jane@customer.test>\r\n\
To: support@acme.test\r\n\
Subject: Broken widget\r\n\
Message-ID: <abc123@customer.test>\r\n\
Date: Mon, 6 Jul 2026 10:00:00 +0000\r\n\
Content-Type: text/plain; charset=utf-8\r\n\
\r\n\
The widget stopped working.\r\n";

    #[tokio::test]
    async fn test_inbound_email_is_normalized() {
        let (adapter, store) = adapter_with_store();

        let message = adapter
            .process_inbound(&connection(), RAW_EMAIL.as_bytes())
            .await
            .unwrap()
            .unwrap();

        assert_eq!(message.direction, Direction::Inbound);
        assert!(message.content.contains("stopped working"));
        assert_eq!(
            message.external_id.as_deref(),
            Some("<abc123@customer.test>")
        );
        assert!(matches!(
            &message.metadata,
            MessageMeta::Email { subject: Some(s), .. } if s == "Broken widget"
        ));
        assert_eq!(store.contact_count(), 1);
    }

    #[tokio::test]
    async fn test_inbound_redelivery_is_idempotent() {
        let (adapter, store) = adapter_with_store();

        adapter
            .process_inbound(&connection(), RAW_EMAIL.as_bytes())
            .await
            .unwrap();
        let second = adapter
            .process_inbound(&connection(), RAW_EMAIL.as_bytes())
            .await
            .unwrap();

        assert!(second.is_none());
        assert_eq!(store.message_count(), 1);
    }

    #[tokio::test]
    async fn test_reply_fails_without_original() {
        let (adapter, _) = adapter_with_store();
        let conn = connection();
        let conversation = crate::manager::test_support::conversation_for(&conn);
        let reply = crate::traits::ReplyOptions {
            original_message_id: MessageId::new("missing"),
            original_content: "orig".to_string(),
            original_sender: "Jane".to_string(),
            quoted_message: None,
        };

        let err = adapter
            .send_reply(ReplyContext {
                connection: &conn,
                conversation: &conversation,
                recipient: Recipient::Individual {
                    address: "jane@customer.test".to_string(),
                },
                content: "On it".to_string(),
                reply: &reply,
            })
            .await
            .unwrap_err();

        assert_eq!(
            err.to_string(),
            "Delivery failed: Original message not found for email reply"
        );
    }

    #[tokio::test]
    async fn test_wrong_connection_data_is_config_error() {
        let (adapter, _) = adapter_with_store();
        let mut conn = connection();
        conn.data = ConnectionData::Webchat {
            widget_token: None,
            site_name: None,
        };
        let err = ChannelAdapter::connect(&adapter, &conn).await.unwrap_err();
        assert!(matches!(err, AdapterError::Config(_)));
    }
}
