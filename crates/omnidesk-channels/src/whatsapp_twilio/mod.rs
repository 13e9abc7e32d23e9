//! WhatsApp channel adapter using the Twilio Conversations API.
//!
//! Twilio's Conversations API requires an explicit conversation and
//! participant before message delivery, unlike Meta's stateless send API,
//! so every outbound send is a three-step sequence: create a Conversation
//! resource, bind the recipient as a Participant against the configured
//! WhatsApp number, then post the Message.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use omnidesk_core::broadcast::{EventPublisher, InboxEvent, Scope};
use omnidesk_core::hooks::AutomationHook;
use omnidesk_core::storage::{ConversationPatch, StoreFacade};
use omnidesk_core::types::{
    ChannelConnection, ChannelKind, ConnectionData, ConnectionId, ConversationPeer, Direction,
    IdentifierKind, Message, MessageKind, MessageMeta, MessageStatus, NewContact, NewConversation,
    NewMessage, SenderKind, normalize_phone,
};

use crate::traits::{
    AdapterError, ChannelAdapter, ConnectOutcome, ConnectionProbe, DeliveryReceipt, MediaPayload,
    Recipient, ReplyContext, excerpt_quote,
};

const TWILIO_CONVERSATIONS_BASE: &str = "https://conversations.twilio.com/v1";

#[derive(Debug, Clone)]
struct TwilioCreds {
    account_sid: String,
    auth_token: String,
    service_sid: String,
    whatsapp_number: String,
}

/// Twilio Conversations webhook payload (form-encoded by Twilio).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TwilioWebhook {
    /// Event discriminator (`onMessageAdded`, `onMessageUpdated`, ...).
    #[serde(rename = "EventType")]
    pub event_type: String,
    /// Conversation resource SID.
    #[serde(rename = "ConversationSid")]
    pub conversation_sid: Option<String>,
    /// Message resource SID.
    #[serde(rename = "MessageSid")]
    pub message_sid: Option<String>,
    /// Message author (`whatsapp:+15551234567` for WhatsApp traffic).
    #[serde(rename = "Author")]
    pub author: Option<String>,
    /// Message body.
    #[serde(rename = "Body")]
    pub body: Option<String>,
    /// JSON-encoded media attachment array.
    #[serde(rename = "Media")]
    pub media: Option<String>,
    /// Creation timestamp (RFC 3339).
    #[serde(rename = "DateCreated")]
    pub date_created: Option<String>,
    /// Event source (`SDK`, `API`).
    #[serde(rename = "Source")]
    pub source: Option<String>,
    /// Message index within the conversation.
    #[serde(rename = "Index")]
    pub index: Option<String>,
}

/// One entry of the webhook `Media` array.
#[derive(Debug, Clone, Deserialize)]
pub struct TwilioMedia {
    /// Media SID.
    #[serde(rename = "Sid")]
    pub sid: Option<String>,
    /// MIME type.
    #[serde(rename = "ContentType")]
    pub content_type: Option<String>,
    /// Original filename.
    #[serde(rename = "Filename")]
    pub filename: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ServiceResource {
    sid: String,
    friendly_name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ConversationResource {
    sid: String,
}

#[derive(Debug, Deserialize)]
struct MessageResource {
    sid: String,
}

/// WhatsApp-over-Twilio adapter.
pub struct WhatsappTwilioAdapter {
    client: Client,
    store: Arc<dyn StoreFacade>,
    publisher: Arc<dyn EventPublisher>,
    hook: Arc<dyn AutomationHook>,
    // Connections that passed their last service fetch.
    active: RwLock<HashSet<ConnectionId>>,
    base_url: String,
}

impl WhatsappTwilioAdapter {
    /// Create the adapter.
    #[must_use]
    pub fn new(
        store: Arc<dyn StoreFacade>,
        publisher: Arc<dyn EventPublisher>,
        hook: Arc<dyn AutomationHook>,
    ) -> Self {
        Self::with_base_url(store, publisher, hook, TWILIO_CONVERSATIONS_BASE)
    }

    /// Create the adapter against a non-default API base (tests).
    #[must_use]
    pub fn with_base_url(
        store: Arc<dyn StoreFacade>,
        publisher: Arc<dyn EventPublisher>,
        hook: Arc<dyn AutomationHook>,
        base_url: impl Into<String>,
    ) -> Self {
        Self {
            client: Client::new(),
            store,
            publisher,
            hook,
            active: RwLock::new(HashSet::new()),
            base_url: base_url.into(),
        }
    }

    /// Whether a connection passed its most recent service validation.
    pub async fn is_active(&self, connection_id: &ConnectionId) -> bool {
        self.active.read().await.contains(connection_id)
    }

    fn creds(connection: &ChannelConnection) -> Result<TwilioCreds, AdapterError> {
        match &connection.data {
            ConnectionData::WhatsappTwilio {
                account_sid,
                auth_token,
                conversations_service_sid,
                whatsapp_number,
                ..
            } => Ok(TwilioCreds {
                account_sid: account_sid.clone(),
                auth_token: auth_token.clone(),
                service_sid: conversations_service_sid.clone(),
                whatsapp_number: whatsapp_number.clone(),
            }),
            _ => Err(AdapterError::Config(
                "connection data is not Twilio WhatsApp configuration".to_string(),
            )),
        }
    }

    async fn get<T: for<'de> Deserialize<'de>>(
        &self,
        creds: &TwilioCreds,
        path: &str,
    ) -> Result<T, AdapterError> {
        let url = format!("{}{}", self.base_url, path);
        let response = self
            .client
            .get(&url)
            .basic_auth(&creds.account_sid, Some(&creds.auth_token))
            .send()
            .await
            .map_err(|e| AdapterError::Network(e.to_string()))?;
        Self::decode(response).await
    }

    async fn post_form<T: for<'de> Deserialize<'de>>(
        &self,
        creds: &TwilioCreds,
        path: &str,
        form: &[(&str, &str)],
    ) -> Result<T, AdapterError> {
        let url = format!("{}{}", self.base_url, path);
        let response = self
            .client
            .post(&url)
            .basic_auth(&creds.account_sid, Some(&creds.auth_token))
            .form(form)
            .send()
            .await
            .map_err(|e| AdapterError::Network(e.to_string()))?;
        Self::decode(response).await
    }

    async fn decode<T: for<'de> Deserialize<'de>>(
        response: reqwest::Response,
    ) -> Result<T, AdapterError> {
        let status = response.status();
        if !status.is_success() {
            if status.as_u16() == 429 {
                return Err(AdapterError::RateLimited);
            }
            let text = response.text().await.unwrap_or_default();
            if status.as_u16() == 401 || status.as_u16() == 403 {
                return Err(AdapterError::AuthFailed(format!("{status}: {text}")));
            }
            return Err(AdapterError::Network(format!("{status}: {text}")));
        }
        response
            .json()
            .await
            .map_err(|e| AdapterError::Network(e.to_string()))
    }

    /// The three-step Twilio Conversations send.
    async fn deliver(
        &self,
        creds: &TwilioCreds,
        to_digits: &str,
        body: &str,
        media_url: Option<&str>,
    ) -> Result<(String, String), AdapterError> {
        let service = &creds.service_sid;

        let conversation: ConversationResource = self
            .post_form(
                creds,
                &format!("/Services/{service}/Conversations"),
                &[("FriendlyName", &format!("wa-{to_digits}"))],
            )
            .await?;

        let address = format!("whatsapp:+{to_digits}");
        let proxy = format!(
            "whatsapp:+{}",
            normalize_phone(&creds.whatsapp_number)
        );
        // Participant binding must exist before the message post.
        let _: serde_json::Value = self
            .post_form(
                creds,
                &format!(
                    "/Services/{service}/Conversations/{}/Participants",
                    conversation.sid
                ),
                &[
                    ("MessagingBinding.Address", address.as_str()),
                    ("MessagingBinding.ProxyAddress", proxy.as_str()),
                ],
            )
            .await?;

        let mut form: Vec<(&str, &str)> = vec![("Body", body)];
        if let Some(url) = media_url {
            form.push(("MediaUrl", url));
        }
        let message: MessageResource = self
            .post_form(
                creds,
                &format!(
                    "/Services/{service}/Conversations/{}/Messages",
                    conversation.sid
                ),
                &form,
            )
            .await?;

        Ok((conversation.sid, message.sid))
    }

    /// Send a WhatsApp message to a phone number, materializing the
    /// contact and conversation rows keyed by the normalized number.
    ///
    /// # Errors
    ///
    /// Returns error if the Twilio sequence or persistence fails.
    pub async fn send_to_phone(
        &self,
        connection: &ChannelConnection,
        phone: &str,
        content: &str,
    ) -> Result<Message, AdapterError> {
        let creds = Self::creds(connection)?;
        let digits = normalize_phone(phone);
        if digits.is_empty() {
            return Err(AdapterError::DeliveryFailed(
                "recipient phone number is empty".to_string(),
            ));
        }

        let contact = self
            .store
            .get_or_create_contact(NewContact {
                company_id: connection.company_id.clone(),
                identifier: digits.clone(),
                identifier_kind: IdentifierKind::Phone,
                name: None,
                email: None,
                phone: Some(digits.clone()),
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
                        kind: ChannelKind::WhatsappTwilio,
                        peer: ConversationPeer::Contact {
                            contact_id: contact.id.clone(),
                        },
                    })
                    .await?
            }
        };

        let (conversation_sid, message_sid) = self.deliver(&creds, &digits, content, None).await?;

        let message = self
            .store
            .create_message(NewMessage {
                conversation_id: conversation.id.clone(),
                direction: Direction::Outbound,
                kind: MessageKind::Text,
                content: content.to_string(),
                media_url: None,
                status: MessageStatus::Sent,
                external_id: Some(message_sid.clone()),
                metadata: MessageMeta::Twilio {
                    conversation_sid,
                    message_sid,
                },
                sender_kind: SenderKind::User,
                sender_id: None,
                sent_at: Some(Utc::now()),
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

        self.publisher.publish(
            Scope::company(connection.company_id.clone()),
            InboxEvent::NewMessage {
                conversation_id: conversation.id.clone(),
                message: Box::new(message.clone()),
            },
        );

        Ok(message)
    }

    /// Process one Twilio Conversations webhook.
    ///
    /// `onMessageAdded` persists inbound traffic (suppressing the echo of
    /// our own sends); `onMessageUpdated` is parsed but maps no status.
    ///
    /// # Errors
    ///
    /// Returns error if persistence fails; provider-side oddities are
    /// logged and skipped instead.
    pub async fn process_webhook(
        &self,
        connection: &ChannelConnection,
        payload: TwilioWebhook,
    ) -> Result<Option<Message>, AdapterError> {
        let creds = Self::creds(connection)?;

        match payload.event_type.as_str() {
            "onMessageAdded" => self.handle_message_added(connection, &creds, payload).await,
            "onMessageUpdated" => {
                // Delivery/read receipts arrive here but are not mapped to
                // message status; the payload is validated and dropped.
                tracing::debug!(
                    message_sid = payload.message_sid.as_deref().unwrap_or(""),
                    "twilio message update received"
                );
                Ok(None)
            }
            other => {
                tracing::debug!(event_type = other, "ignoring twilio event");
                Ok(None)
            }
        }
    }

    async fn handle_message_added(
        &self,
        connection: &ChannelConnection,
        creds: &TwilioCreds,
        payload: TwilioWebhook,
    ) -> Result<Option<Message>, AdapterError> {
        let author = payload.author.clone().unwrap_or_default();

        // Messages authored by the business line are echoes of our own
        // outbound sends.
        if author.starts_with("whatsapp:+")
            && normalize_phone(&author) == normalize_phone(&creds.whatsapp_number)
        {
            tracing::debug!("suppressing self-echo from {author}");
            return Ok(None);
        }

        let Some(message_sid) = payload.message_sid.clone() else {
            tracing::warn!("twilio onMessageAdded without MessageSid");
            return Ok(None);
        };
        if self
            .store
            .message_by_external_id(&message_sid)
            .await?
            .is_some()
        {
            tracing::debug!(%message_sid, "duplicate twilio webhook delivery");
            return Ok(None);
        }

        let digits = normalize_phone(&author);
        if digits.is_empty() {
            tracing::warn!(%author, "twilio message author has no phone digits");
            return Ok(None);
        }

        let contact = self
            .store
            .get_or_create_contact(NewContact {
                company_id: connection.company_id.clone(),
                identifier: digits.clone(),
                identifier_kind: IdentifierKind::Phone,
                name: None,
                email: None,
                phone: Some(digits),
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
                        kind: ChannelKind::WhatsappTwilio,
                        peer: ConversationPeer::Contact {
                            contact_id: contact.id.clone(),
                        },
                    })
                    .await?
            }
        };

        let kind = first_media_mime(payload.media.as_deref())
            .map_or(MessageKind::Text, |mime| MessageKind::from_mime(&mime));

        let sent_at = payload
            .date_created
            .as_deref()
            .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
            .map(|dt| dt.with_timezone(&Utc));

        let message = self
            .store
            .create_message(NewMessage {
                conversation_id: conversation.id.clone(),
                direction: Direction::Inbound,
                kind,
                content: payload.body.clone().unwrap_or_default(),
                media_url: None,
                status: MessageStatus::Delivered,
                external_id: Some(message_sid.clone()),
                metadata: MessageMeta::Twilio {
                    conversation_sid: payload.conversation_sid.clone().unwrap_or_default(),
                    message_sid,
                },
                sender_kind: SenderKind::Contact,
                sender_id: None,
                sent_at,
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

        // Automation must never fail ingestion.
        if let Err(e) = self.hook.message_received(&conversation, &message).await {
            tracing::warn!(error = %e, "twilio automation handoff failed");
        }

        Ok(Some(message))
    }
}

fn first_media_mime(raw: Option<&str>) -> Option<String> {
    let parsed: Vec<TwilioMedia> = serde_json::from_str(raw?).ok()?;
    parsed.into_iter().next()?.content_type
}

#[async_trait]
impl ChannelAdapter for WhatsappTwilioAdapter {
    fn kind(&self) -> ChannelKind {
        ChannelKind::WhatsappTwilio
    }

    async fn connect(
        &self,
        connection: &ChannelConnection,
    ) -> Result<ConnectOutcome, AdapterError> {
        let creds = Self::creds(connection)?;

        match self
            .get::<ServiceResource>(&creds, &format!("/Services/{}", creds.service_sid))
            .await
        {
            Ok(service) => {
                self.active.write().await.insert(connection.id.clone());
                tracing::info!(
                    service = %service.sid,
                    name = service.friendly_name.as_deref().unwrap_or("unknown"),
                    "twilio conversations service validated"
                );
                Ok(ConnectOutcome::active(ConnectionData::WhatsappTwilio {
                    account_sid: creds.account_sid,
                    auth_token: creds.auth_token,
                    conversations_service_sid: creds.service_sid,
                    whatsapp_number: creds.whatsapp_number,
                    last_error: None,
                }))
            }
            Err(e) => {
                self.active.write().await.remove(&connection.id);
                let error = e.to_string();
                Ok(ConnectOutcome::errored(
                    ConnectionData::WhatsappTwilio {
                        account_sid: creds.account_sid,
                        auth_token: creds.auth_token,
                        conversations_service_sid: creds.service_sid,
                        whatsapp_number: creds.whatsapp_number,
                        last_error: Some(error.clone()),
                    },
                    error,
                ))
            }
        }
    }

    async fn disconnect(
        &self,
        connection: &ChannelConnection,
    ) -> Result<ConnectOutcome, AdapterError> {
        let creds = Self::creds(connection)?;
        self.active.write().await.remove(&connection.id);
        Ok(ConnectOutcome::disconnected(
            ConnectionData::WhatsappTwilio {
                account_sid: creds.account_sid,
                auth_token: creds.auth_token,
                conversations_service_sid: creds.service_sid,
                whatsapp_number: creds.whatsapp_number,
                last_error: None,
            },
        ))
    }

    async fn probe(
        &self,
        connection: &ChannelConnection,
    ) -> Result<ConnectionProbe, AdapterError> {
        let creds = Self::creds(connection)?;
        match self
            .get::<ServiceResource>(&creds, &format!("/Services/{}", creds.service_sid))
            .await
        {
            Ok(service) => Ok(ConnectionProbe {
                connected: true,
                account_id: Some(service.sid),
                display_name: service.friendly_name,
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
        let Recipient::Individual { address } = recipient else {
            return Err(AdapterError::Unsupported(
                "Twilio WhatsApp does not support group chat replies".to_string(),
            ));
        };
        let (conversation_sid, message_sid) = self
            .deliver(&creds, &normalize_phone(address), content, None)
            .await?;
        Ok(DeliveryReceipt {
            external_id: Some(message_sid.clone()),
            metadata: MessageMeta::Twilio {
                conversation_sid,
                message_sid,
            },
            sent_at: Utc::now(),
        })
    }

    async fn send_media(
        &self,
        connection: &ChannelConnection,
        recipient: &Recipient,
        media: &MediaPayload,
    ) -> Result<DeliveryReceipt, AdapterError> {
        let creds = Self::creds(connection)?;
        let Recipient::Individual { address } = recipient else {
            return Err(AdapterError::Unsupported(
                "Twilio WhatsApp does not support group chat replies".to_string(),
            ));
        };
        let (conversation_sid, message_sid) = self
            .deliver(
                &creds,
                &normalize_phone(address),
                media.caption.as_deref().unwrap_or(""),
                Some(&media.url),
            )
            .await?;
        Ok(DeliveryReceipt {
            external_id: Some(message_sid.clone()),
            metadata: MessageMeta::Twilio {
                conversation_sid,
                message_sid,
            },
            sent_at: Utc::now(),
        })
    }

    async fn send_reply(&self, ctx: ReplyContext<'_>) -> Result<DeliveryReceipt, AdapterError> {
        let Recipient::Individual { address } = &ctx.recipient else {
            return Err(AdapterError::Unsupported(
                "Twilio WhatsApp does not support group chat replies".to_string(),
            ));
        };
        // No native quoting on business-initiated Twilio messages; quote
        // by excerpt instead.
        let body = excerpt_quote(&ctx.reply.original_content, &ctx.content);
        let creds = Self::creds(ctx.connection)?;
        let (conversation_sid, message_sid) = self
            .deliver(&creds, &normalize_phone(address), &body, None)
            .await?;
        Ok(DeliveryReceipt {
            external_id: Some(message_sid.clone()),
            metadata: MessageMeta::Twilio {
                conversation_sid,
                message_sid,
            },
            sent_at: Utc::now(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use omnidesk_core::broadcast::NullPublisher;
    use omnidesk_core::hooks::NullHook;
    use omnidesk_core::storage::MemoryStore;
    use omnidesk_core::types::{CompanyId, ConnectionStatus};
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn connection() -> ChannelConnection {
        ChannelConnection {
            id: ConnectionId::new("conn-tw"),
            company_id: CompanyId::new("co1"),
            kind: ChannelKind::WhatsappTwilio,
            status: ConnectionStatus::Active,
            data: ConnectionData::WhatsappTwilio {
                account_sid: "AC123".to_string(),
                auth_token: "token".to_string(),
                conversations_service_sid: "IS123".to_string(),
                whatsapp_number: "+15550001111".to_string(),
                last_error: None,
            },
        }
    }

    fn adapter(base_url: &str) -> (WhatsappTwilioAdapter, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let adapter = WhatsappTwilioAdapter::with_base_url(
            store.clone(),
            Arc::new(NullPublisher),
            Arc::new(NullHook),
            base_url,
        );
        (adapter, store)
    }

    fn inbound(author: &str, sid: &str, body: &str) -> TwilioWebhook {
        TwilioWebhook {
            event_type: "onMessageAdded".to_string(),
            conversation_sid: Some("CH1".to_string()),
            message_sid: Some(sid.to_string()),
            author: Some(author.to_string()),
            body: Some(body.to_string()),
            ..TwilioWebhook::default()
        }
    }

    #[tokio::test]
    async fn test_self_echo_is_suppressed() {
        let (adapter, store) = adapter("http://unused.invalid");

        let out = adapter
            .process_webhook(&connection(), inbound("whatsapp:+15550001111", "IM1", "hi"))
            .await
            .unwrap();

        assert!(out.is_none());
        assert_eq!(store.message_count(), 0);
        assert_eq!(store.contact_count(), 0);
    }

    #[tokio::test]
    async fn test_inbound_message_is_persisted() {
        let (adapter, store) = adapter("http://unused.invalid");

        let message = adapter
            .process_webhook(
                &connection(),
                inbound("whatsapp:+15559998888", "IM2", "hello"),
            )
            .await
            .unwrap()
            .unwrap();

        assert_eq!(message.direction, Direction::Inbound);
        assert_eq!(message.external_id.as_deref(), Some("IM2"));
        assert!(matches!(message.metadata, MessageMeta::Twilio { .. }));
        assert_eq!(store.contact_count(), 1);
        assert_eq!(store.conversation_count(), 1);
    }

    #[tokio::test]
    async fn test_duplicate_webhook_is_ignored() {
        let (adapter, store) = adapter("http://unused.invalid");

        let payload = inbound("whatsapp:+15559998888", "IM3", "hello");
        adapter
            .process_webhook(&connection(), payload.clone())
            .await
            .unwrap();
        let second = adapter
            .process_webhook(&connection(), payload)
            .await
            .unwrap();

        assert!(second.is_none());
        assert_eq!(store.message_count(), 1);
    }

    #[tokio::test]
    async fn test_media_mime_classification() {
        let (adapter, _) = adapter("http://unused.invalid");

        let mut payload = inbound("whatsapp:+15559998888", "IM4", "");
        payload.media =
            Some(r#"[{"Sid":"ME1","ContentType":"image/jpeg","Filename":"photo.jpg"}]"#.to_string());

        let message = adapter
            .process_webhook(&connection(), payload)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(message.kind, MessageKind::Image);
    }

    #[tokio::test]
    async fn test_message_updated_is_inert() {
        let (adapter, store) = adapter("http://unused.invalid");

        let payload = TwilioWebhook {
            event_type: "onMessageUpdated".to_string(),
            message_sid: Some("IM5".to_string()),
            ..TwilioWebhook::default()
        };
        let out = adapter
            .process_webhook(&connection(), payload)
            .await
            .unwrap();

        assert!(out.is_none());
        assert_eq!(store.message_count(), 0);
    }

    #[tokio::test]
    async fn test_connect_records_error_on_failure() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/Services/IS123"))
            .respond_with(ResponseTemplate::new(401).set_body_string("authenticate"))
            .mount(&server)
            .await;

        let (adapter, _) = adapter(&server.uri());
        let outcome = ChannelAdapter::connect(&adapter, &connection())
            .await
            .unwrap();

        assert_eq!(outcome.status, ConnectionStatus::Error);
        assert!(outcome.error.is_some());
        assert!(matches!(
            outcome.data,
            ConnectionData::WhatsappTwilio {
                last_error: Some(_),
                ..
            }
        ));
        assert!(!adapter.is_active(&ConnectionId::new("conn-tw")).await);
    }

    #[tokio::test]
    async fn test_connect_marks_active_on_success() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/Services/IS123"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "sid": "IS123",
                "friendly_name": "support"
            })))
            .mount(&server)
            .await;

        let (adapter, _) = adapter(&server.uri());
        let outcome = ChannelAdapter::connect(&adapter, &connection())
            .await
            .unwrap();

        assert_eq!(outcome.status, ConnectionStatus::Active);
        assert!(adapter.is_active(&ConnectionId::new("conn-tw")).await);
    }

    #[tokio::test]
    async fn test_send_runs_three_step_sequence() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/Services/IS123/Conversations"))
            .respond_with(
                ResponseTemplate::new(201).set_body_json(serde_json::json!({"sid": "CH9"})),
            )
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/Services/IS123/Conversations/CH9/Participants"))
            .respond_with(
                ResponseTemplate::new(201).set_body_json(serde_json::json!({"sid": "MB9"})),
            )
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/Services/IS123/Conversations/CH9/Messages"))
            .respond_with(
                ResponseTemplate::new(201).set_body_json(serde_json::json!({"sid": "IM9"})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let (adapter, store) = adapter(&server.uri());
        let message = adapter
            .send_to_phone(&connection(), "+1 555 777 0000", "hello there")
            .await
            .unwrap();

        assert_eq!(message.external_id.as_deref(), Some("IM9"));
        assert_eq!(message.direction, Direction::Outbound);
        assert_eq!(store.contact_count(), 1);
        assert_eq!(store.conversation_count(), 1);
    }
}
