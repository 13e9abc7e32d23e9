//! Unofficial WhatsApp adapter.
//!
//! Talks to a self-hosted bridge service that maintains the device
//! session. This is the only channel with native quoted replies, group
//! conversations, and remote message deletion.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use reqwest::Client;
use serde::{Deserialize, Serialize};

use omnidesk_core::secrets::ApiKey;
use omnidesk_core::storage::StoreFacade;
use omnidesk_core::types::{
    ChannelConnection, ChannelKind, ConnectionData, Conversation, ConversationPeer, Direction,
    Message, MessageMeta,
};

use crate::traits::{
    AdapterError, ChannelAdapter, ConnectOutcome, ConnectionProbe, DeliveryReceipt, MediaPayload,
    Recipient, ReplyContext,
};

/// The protocol stops honoring revokes well before the advertised
/// 72-hour window; enforce the observed limit here.
pub const PROTOCOL_DELETE_LIMIT_MINUTES: i64 = 72;

#[derive(Debug, Clone)]
struct BridgeCreds {
    base_url: String,
    instance_id: String,
    api_token: ApiKey,
    phone_number: Option<String>,
}

#[derive(Debug, Serialize)]
struct SendTextRequest<'a> {
    jid: &'a str,
    body: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    quoted: Option<&'a serde_json::Value>,
}

#[derive(Debug, Serialize)]
struct SendMediaRequest<'a> {
    jid: &'a str,
    url: &'a str,
    media_type: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    caption: Option<&'a str>,
}

#[derive(Debug, Serialize)]
struct DeleteRequest<'a> {
    key: MessageKey<'a>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct MessageKey<'a> {
    remote_jid: &'a str,
    from_me: bool,
    id: &'a str,
}

#[derive(Debug, Deserialize)]
struct SendResponse {
    key: SentKey,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SentKey {
    remote_jid: String,
    from_me: bool,
    id: String,
}

#[derive(Debug, Deserialize)]
struct StatusResponse {
    connected: bool,
    phone_number: Option<String>,
}

/// Unofficial WhatsApp bridge adapter.
pub struct WhatsappAdapter {
    client: Client,
    store: Arc<dyn StoreFacade>,
}

impl WhatsappAdapter {
    /// Create the adapter.
    #[must_use]
    pub fn new(store: Arc<dyn StoreFacade>) -> Self {
        Self {
            client: Client::new(),
            store,
        }
    }

    fn creds(connection: &ChannelConnection) -> Result<BridgeCreds, AdapterError> {
        match &connection.data {
            ConnectionData::Whatsapp {
                bridge_url,
                instance_id,
                api_token,
                phone_number,
            } => Ok(BridgeCreds {
                base_url: bridge_url.trim_end_matches('/').to_string(),
                instance_id: instance_id.clone(),
                api_token: ApiKey::new(api_token.clone()),
                phone_number: phone_number.clone(),
            }),
            _ => Err(AdapterError::Config(
                "connection data is not WhatsApp bridge configuration".to_string(),
            )),
        }
    }

    async fn post<T: for<'de> Deserialize<'de>>(
        &self,
        creds: &BridgeCreds,
        path: &str,
        body: &impl Serialize,
    ) -> Result<T, AdapterError> {
        let url = format!(
            "{}/instances/{}{}",
            creds.base_url, creds.instance_id, path
        );
        let response = self
            .client
            .post(&url)
            .bearer_auth(creds.api_token.expose())
            .json(body)
            .send()
            .await
            .map_err(|e| AdapterError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            if status.as_u16() == 429 {
                return Err(AdapterError::RateLimited);
            }
            let text = response.text().await.unwrap_or_default();
            return Err(AdapterError::Network(format!("{status}: {text}")));
        }
        response
            .json()
            .await
            .map_err(|e| AdapterError::Network(e.to_string()))
    }

    async fn status(&self, creds: &BridgeCreds) -> Result<StatusResponse, AdapterError> {
        let url = format!(
            "{}/instances/{}/status",
            creds.base_url, creds.instance_id
        );
        let response = self
            .client
            .get(&url)
            .bearer_auth(creds.api_token.expose())
            .send()
            .await
            .map_err(|e| AdapterError::Network(e.to_string()))?;
        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(AdapterError::Network(format!("{status}: {text}")));
        }
        response
            .json()
            .await
            .map_err(|e| AdapterError::Network(e.to_string()))
    }

    fn jid_for(recipient: &Recipient) -> String {
        match recipient {
            Recipient::Individual { address } => format!("{address}@s.whatsapp.net"),
            Recipient::Group { jid } => jid.clone(),
        }
    }

    /// Resolve the provider message key for deletion: prefer the stored
    /// key, otherwise synthesize one from the conversation and external
    /// id.
    async fn delete_key(
        &self,
        conversation: &Conversation,
        message: &Message,
    ) -> Result<(String, bool, String), AdapterError> {
        if let MessageMeta::WhatsappKey {
            remote_jid,
            from_me,
            id,
        } = &message.metadata
        {
            return Ok((remote_jid.clone(), *from_me, id.clone()));
        }

        let remote_jid = match &conversation.peer {
            ConversationPeer::Group { jid } => jid.clone(),
            ConversationPeer::Contact { contact_id } => {
                let contact = self
                    .store
                    .contact(contact_id)
                    .await?
                    .ok_or_else(|| {
                        AdapterError::DeliveryFailed(
                            "contact for message key not found".to_string(),
                        )
                    })?;
                format!("{}@s.whatsapp.net", contact.identifier)
            }
        };
        let id = message.external_id.clone().ok_or_else(|| {
            AdapterError::DeliveryFailed("message has no provider id to delete".to_string())
        })?;
        Ok((remote_jid, message.direction == Direction::Outbound, id))
    }
}

#[async_trait]
impl ChannelAdapter for WhatsappAdapter {
    fn kind(&self) -> ChannelKind {
        ChannelKind::Whatsapp
    }

    async fn connect(
        &self,
        connection: &ChannelConnection,
    ) -> Result<ConnectOutcome, AdapterError> {
        let creds = Self::creds(connection)?;
        match self.status(&creds).await {
            Ok(status) if status.connected => {
                Ok(ConnectOutcome::active(ConnectionData::Whatsapp {
                    bridge_url: creds.base_url,
                    instance_id: creds.instance_id,
                    api_token: creds.api_token.expose().to_string(),
                    phone_number: status.phone_number.or(creds.phone_number),
                }))
            }
            Ok(_) => Ok(ConnectOutcome::errored(
                connection.data.clone(),
                "bridge instance is not paired".to_string(),
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
        let creds = Self::creds(connection)?;
        // Best-effort logout; the bridge may already be gone.
        if let Err(e) = self
            .post::<serde_json::Value>(&creds, "/logout", &serde_json::json!({}))
            .await
        {
            tracing::warn!(error = %e, "whatsapp bridge logout failed");
        }
        Ok(ConnectOutcome::disconnected(connection.data.clone()))
    }

    async fn probe(
        &self,
        connection: &ChannelConnection,
    ) -> Result<ConnectionProbe, AdapterError> {
        let creds = Self::creds(connection)?;
        match self.status(&creds).await {
            Ok(status) => Ok(ConnectionProbe {
                connected: status.connected,
                account_id: status.phone_number.clone(),
                display_name: status.phone_number,
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
        let jid = Self::jid_for(recipient);
        let sent: SendResponse = self
            .post(
                &creds,
                "/messages/text",
                &SendTextRequest {
                    jid: &jid,
                    body: content,
                    quoted: None,
                },
            )
            .await?;
        Ok(DeliveryReceipt {
            external_id: Some(sent.key.id.clone()),
            metadata: MessageMeta::WhatsappKey {
                remote_jid: sent.key.remote_jid,
                from_me: sent.key.from_me,
                id: sent.key.id,
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
        let jid = Self::jid_for(recipient);
        let media_type = match media.kind {
            omnidesk_core::types::MessageKind::Image => "image",
            omnidesk_core::types::MessageKind::Video => "video",
            omnidesk_core::types::MessageKind::Audio => "audio",
            _ => "document",
        };
        let sent: SendResponse = self
            .post(
                &creds,
                "/messages/media",
                &SendMediaRequest {
                    jid: &jid,
                    url: &media.url,
                    media_type,
                    caption: media.caption.as_deref(),
                },
            )
            .await?;
        Ok(DeliveryReceipt {
            external_id: Some(sent.key.id.clone()),
            metadata: MessageMeta::WhatsappKey {
                remote_jid: sent.key.remote_jid,
                from_me: sent.key.from_me,
                id: sent.key.id,
            },
            sent_at: Utc::now(),
        })
    }

    async fn send_reply(&self, ctx: ReplyContext<'_>) -> Result<DeliveryReceipt, AdapterError> {
        // Native quoting needs the original provider message object; the
        // caller must supply it.
        let quoted = ctx
            .reply
            .quoted_message
            .as_ref()
            .ok_or(AdapterError::MissingQuote)?;

        let creds = Self::creds(ctx.connection)?;
        let jid = Self::jid_for(&ctx.recipient);
        let sent: SendResponse = self
            .post(
                &creds,
                "/messages/text",
                &SendTextRequest {
                    jid: &jid,
                    body: &ctx.content,
                    quoted: Some(quoted),
                },
            )
            .await?;
        Ok(DeliveryReceipt {
            external_id: Some(sent.key.id.clone()),
            metadata: MessageMeta::WhatsappKey {
                remote_jid: sent.key.remote_jid,
                from_me: sent.key.from_me,
                id: sent.key.id,
            },
            sent_at: Utc::now(),
        })
    }

    async fn delete_message(
        &self,
        connection: &ChannelConnection,
        conversation: &Conversation,
        message: &Message,
    ) -> Result<(), AdapterError> {
        // The capability table allows 72 hours; the protocol itself stops
        // honoring revokes after 72 minutes. Both gates are intentional.
        let age = Utc::now() - message.effective_time();
        if age > Duration::minutes(PROTOCOL_DELETE_LIMIT_MINUTES) {
            return Err(AdapterError::TooOld);
        }

        let (remote_jid, from_me, id) = self.delete_key(conversation, message).await?;
        let creds = Self::creds(connection)?;
        let _: serde_json::Value = self
            .post(
                &creds,
                "/messages/delete",
                &DeleteRequest {
                    key: MessageKey {
                        remote_jid: &remote_jid,
                        from_me,
                        id: &id,
                    },
                },
            )
            .await?;
        Ok(())
    }
}
