//! Instagram Direct adapter using the Graph messaging API.

use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use omnidesk_core::secrets::ApiKey;
use omnidesk_core::types::{ChannelConnection, ChannelKind, ConnectionData, MessageMeta};

use crate::traits::{
    AdapterError, ChannelAdapter, ConnectOutcome, ConnectionProbe, DeliveryReceipt, MediaPayload,
    Recipient, ReplyContext, mention_reply,
};

const GRAPH_API_BASE: &str = "https://graph.facebook.com/v18.0";

#[derive(Debug, Serialize)]
struct SendRequest {
    recipient: RecipientRef,
    message: MessageBody,
}

#[derive(Debug, Serialize)]
struct RecipientRef {
    id: String,
}

#[derive(Debug, Serialize)]
struct MessageBody {
    #[serde(skip_serializing_if = "Option::is_none")]
    text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    attachment: Option<AttachmentBody>,
}

#[derive(Debug, Serialize)]
struct AttachmentBody {
    #[serde(rename = "type")]
    attachment_type: &'static str,
    payload: AttachmentPayload,
}

#[derive(Debug, Serialize)]
struct AttachmentPayload {
    url: String,
}

#[derive(Debug, Deserialize)]
struct SendResponse {
    message_id: Option<String>,
}

/// Instagram Direct adapter.
pub struct InstagramAdapter {
    client: Client,
    base_url: String,
}

impl InstagramAdapter {
    /// Create the adapter.
    #[must_use]
    pub fn new() -> Self {
        Self::with_base_url(GRAPH_API_BASE)
    }

    /// Create the adapter against a non-default API base (tests).
    #[must_use]
    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into(),
        }
    }

    fn creds(connection: &ChannelConnection) -> Result<(String, ApiKey), AdapterError> {
        match &connection.data {
            ConnectionData::Instagram {
                account_id,
                access_token,
            } => Ok((account_id.clone(), ApiKey::new(access_token.clone()))),
            _ => Err(AdapterError::Config(
                "connection data is not Instagram configuration".to_string(),
            )),
        }
    }

    async fn send(
        &self,
        account_id: &str,
        token: &ApiKey,
        request: &SendRequest,
    ) -> Result<DeliveryReceipt, AdapterError> {
        let url = format!("{}/{account_id}/messages", self.base_url);
        let response = self
            .client
            .post(&url)
            .bearer_auth(token.expose())
            .json(request)
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
        let result: SendResponse = response
            .json()
            .await
            .map_err(|e| AdapterError::Network(e.to_string()))?;
        Ok(DeliveryReceipt {
            external_id: result.message_id,
            metadata: MessageMeta::None,
            sent_at: Utc::now(),
        })
    }
}

impl Default for InstagramAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ChannelAdapter for InstagramAdapter {
    fn kind(&self) -> ChannelKind {
        ChannelKind::Instagram
    }

    async fn connect(
        &self,
        connection: &ChannelConnection,
    ) -> Result<ConnectOutcome, AdapterError> {
        let (account_id, token) = Self::creds(connection)?;
        let url = format!("{}/{account_id}", self.base_url);
        match self.client.get(&url).bearer_auth(token.expose()).send().await {
            Ok(r) if r.status().is_success() => {
                Ok(ConnectOutcome::active(connection.data.clone()))
            }
            Ok(r) => Ok(ConnectOutcome::errored(
                connection.data.clone(),
                r.status().to_string(),
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
        let (account_id, _) = Self::creds(connection)?;
        Ok(ConnectionProbe {
            connected: connection.status == omnidesk_core::types::ConnectionStatus::Active,
            account_id: Some(account_id),
            display_name: None,
            error: None,
        })
    }

    async fn send_message(
        &self,
        connection: &ChannelConnection,
        recipient: &Recipient,
        content: &str,
    ) -> Result<DeliveryReceipt, AdapterError> {
        let Recipient::Individual { address } = recipient else {
            return Err(AdapterError::Unsupported(
                "Instagram does not support group chat replies".to_string(),
            ));
        };
        let (account_id, token) = Self::creds(connection)?;
        self.send(
            &account_id,
            &token,
            &SendRequest {
                recipient: RecipientRef {
                    id: address.clone(),
                },
                message: MessageBody {
                    text: Some(content.to_string()),
                    attachment: None,
                },
            },
        )
        .await
    }

    async fn send_media(
        &self,
        connection: &ChannelConnection,
        recipient: &Recipient,
        media: &MediaPayload,
    ) -> Result<DeliveryReceipt, AdapterError> {
        let Recipient::Individual { address } = recipient else {
            return Err(AdapterError::Unsupported(
                "Instagram does not support group chat replies".to_string(),
            ));
        };
        let (account_id, token) = Self::creds(connection)?;
        let attachment_type = match media.kind {
            omnidesk_core::types::MessageKind::Video => "video",
            // Instagram Direct only accepts image and video attachments;
            // everything else goes out as an image link.
            _ => "image",
        };
        self.send(
            &account_id,
            &token,
            &SendRequest {
                recipient: RecipientRef {
                    id: address.clone(),
                },
                message: MessageBody {
                    text: None,
                    attachment: Some(AttachmentBody {
                        attachment_type,
                        payload: AttachmentPayload {
                            url: media.url.clone(),
                        },
                    }),
                },
            },
        )
        .await
    }

    async fn send_reply(&self, ctx: ReplyContext<'_>) -> Result<DeliveryReceipt, AdapterError> {
        let Recipient::Individual { address } = &ctx.recipient else {
            return Err(AdapterError::Unsupported(
                "Instagram does not support group chat replies".to_string(),
            ));
        };
        let (account_id, token) = Self::creds(ctx.connection)?;
        let text = mention_reply(&ctx.reply.original_sender, &ctx.content);
        self.send(
            &account_id,
            &token,
            &SendRequest {
                recipient: RecipientRef {
                    id: address.clone(),
                },
                message: MessageBody {
                    text: Some(text),
                    attachment: None,
                },
            },
        )
        .await
    }
}
