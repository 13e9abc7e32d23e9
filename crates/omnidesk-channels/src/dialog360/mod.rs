//! WhatsApp adapter for the 360Dialog partner API.
//!
//! The wire format mirrors the Cloud API, but authentication uses the
//! `D360-API-KEY` header and messages post to a partner-hosted base.

use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use omnidesk_core::secrets::ApiKey;
use omnidesk_core::types::{ChannelConnection, ChannelKind, ConnectionData, MessageMeta};

use crate::traits::{
    AdapterError, ChannelAdapter, ConnectOutcome, ConnectionProbe, DeliveryReceipt, MediaPayload,
    Recipient, ReplyContext, excerpt_quote,
};

const DIALOG360_API_BASE: &str = "https://waba.360dialog.io/v1";

#[derive(Debug, Serialize)]
struct SendRequest {
    to: String,
    #[serde(rename = "type")]
    message_type: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    text: Option<TextBody>,
    #[serde(skip_serializing_if = "Option::is_none")]
    image: Option<LinkBody>,
    #[serde(skip_serializing_if = "Option::is_none")]
    video: Option<LinkBody>,
    #[serde(skip_serializing_if = "Option::is_none")]
    audio: Option<LinkBody>,
    #[serde(skip_serializing_if = "Option::is_none")]
    document: Option<LinkBody>,
}

#[derive(Debug, Serialize)]
struct TextBody {
    body: String,
}

#[derive(Debug, Serialize)]
struct LinkBody {
    link: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    caption: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SendResponse {
    messages: Vec<MessageInfo>,
}

#[derive(Debug, Deserialize)]
struct MessageInfo {
    id: String,
}

/// 360Dialog adapter.
pub struct Dialog360Adapter {
    client: Client,
    base_url: String,
}

impl Dialog360Adapter {
    /// Create the adapter.
    #[must_use]
    pub fn new() -> Self {
        Self::with_base_url(DIALOG360_API_BASE)
    }

    /// Create the adapter against a non-default API base (tests).
    #[must_use]
    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into(),
        }
    }

    fn creds(connection: &ChannelConnection) -> Result<(ApiKey, String), AdapterError> {
        match &connection.data {
            ConnectionData::Dialog360 {
                api_key,
                phone_number,
                ..
            } => Ok((ApiKey::new(api_key.clone()), phone_number.clone())),
            _ => Err(AdapterError::Config(
                "connection data is not 360Dialog configuration".to_string(),
            )),
        }
    }

    async fn post(
        &self,
        api_key: &ApiKey,
        request: &SendRequest,
    ) -> Result<DeliveryReceipt, AdapterError> {
        let url = format!("{}/messages", self.base_url);
        let response = self
            .client
            .post(&url)
            .header("D360-API-KEY", api_key.expose())
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
            external_id: result.messages.into_iter().next().map(|m| m.id),
            metadata: MessageMeta::None,
            sent_at: Utc::now(),
        })
    }

    fn text_request(to: &str, body: String) -> SendRequest {
        SendRequest {
            to: to.to_string(),
            message_type: "text",
            text: Some(TextBody { body }),
            image: None,
            video: None,
            audio: None,
            document: None,
        }
    }
}

impl Default for Dialog360Adapter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ChannelAdapter for Dialog360Adapter {
    fn kind(&self) -> ChannelKind {
        ChannelKind::Dialog360
    }

    async fn connect(
        &self,
        connection: &ChannelConnection,
    ) -> Result<ConnectOutcome, AdapterError> {
        // 360Dialog has no cheap credential probe; the API key is
        // validated on first send.
        Self::creds(connection)?;
        Ok(ConnectOutcome::active(connection.data.clone()))
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
        let (_, phone_number) = Self::creds(connection)?;
        Ok(ConnectionProbe {
            connected: connection.status == omnidesk_core::types::ConnectionStatus::Active,
            account_id: Some(phone_number.clone()),
            display_name: Some(phone_number),
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
                "360Dialog does not support group chat replies".to_string(),
            ));
        };
        let (api_key, _) = Self::creds(connection)?;
        self.post(&api_key, &Self::text_request(address, content.to_string()))
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
                "360Dialog does not support group chat replies".to_string(),
            ));
        };
        let (api_key, _) = Self::creds(connection)?;

        let link = LinkBody {
            link: media.url.clone(),
            caption: media.caption.clone(),
        };
        let mut request = SendRequest {
            to: address.clone(),
            message_type: "document",
            text: None,
            image: None,
            video: None,
            audio: None,
            document: None,
        };
        match media.kind {
            omnidesk_core::types::MessageKind::Image => {
                request.message_type = "image";
                request.image = Some(link);
            }
            omnidesk_core::types::MessageKind::Video => {
                request.message_type = "video";
                request.video = Some(link);
            }
            omnidesk_core::types::MessageKind::Audio => {
                request.message_type = "audio";
                request.audio = Some(LinkBody {
                    caption: None,
                    ..link
                });
            }
            _ => {
                request.document = Some(link);
            }
        }

        self.post(&api_key, &request).await
    }

    async fn send_reply(&self, ctx: ReplyContext<'_>) -> Result<DeliveryReceipt, AdapterError> {
        let Recipient::Individual { address } = &ctx.recipient else {
            return Err(AdapterError::Unsupported(
                "360Dialog does not support group chat replies".to_string(),
            ));
        };
        let (api_key, _) = Self::creds(ctx.connection)?;
        let body = excerpt_quote(&ctx.reply.original_content, &ctx.content);
        self.post(&api_key, &Self::text_request(address, body)).await
    }
}
