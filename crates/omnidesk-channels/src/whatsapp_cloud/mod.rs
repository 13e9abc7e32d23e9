//! Official WhatsApp Business Cloud API adapter.

use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use omnidesk_core::secrets::ApiKey;
use omnidesk_core::types::{
    ChannelConnection, ChannelKind, ConnectionData, MessageKind, MessageMeta,
};

use crate::traits::{
    AdapterError, ChannelAdapter, ConnectOutcome, ConnectionProbe, DeliveryReceipt, MediaPayload,
    Recipient, ReplyContext, excerpt_quote,
};

const GRAPH_API_BASE: &str = "https://graph.facebook.com/v18.0";

#[derive(Debug, Clone)]
struct CloudCreds {
    access_token: ApiKey,
    phone_number_id: String,
    business_account_id: Option<String>,
}

/// Send message request.
#[derive(Debug, Serialize)]
struct SendMessageRequest {
    messaging_product: &'static str,
    recipient_type: &'static str,
    to: String,
    #[serde(rename = "type")]
    message_type: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    text: Option<TextContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    image: Option<MediaContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    video: Option<MediaContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    audio: Option<LinkContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    document: Option<DocumentContent>,
}

#[derive(Debug, Serialize)]
struct TextContent {
    preview_url: bool,
    body: String,
}

#[derive(Debug, Serialize)]
struct MediaContent {
    link: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    caption: Option<String>,
}

#[derive(Debug, Serialize)]
struct LinkContent {
    link: String,
}

#[derive(Debug, Serialize)]
struct DocumentContent {
    link: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    filename: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SendMessageResponse {
    messages: Vec<MessageInfo>,
}

#[derive(Debug, Deserialize)]
struct MessageInfo {
    id: String,
}

#[derive(Debug, Deserialize)]
struct PhoneNumberInfo {
    display_phone_number: String,
    verified_name: Option<String>,
}

/// WhatsApp Cloud API adapter.
pub struct WhatsappCloudAdapter {
    client: Client,
    base_url: String,
}

impl WhatsappCloudAdapter {
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

    fn creds(connection: &ChannelConnection) -> Result<CloudCreds, AdapterError> {
        match &connection.data {
            ConnectionData::WhatsappCloud {
                access_token,
                phone_number_id,
                business_account_id,
            } => Ok(CloudCreds {
                access_token: ApiKey::new(access_token.clone()),
                phone_number_id: phone_number_id.clone(),
                business_account_id: business_account_id.clone(),
            }),
            _ => Err(AdapterError::Config(
                "connection data is not WhatsApp Cloud configuration".to_string(),
            )),
        }
    }

    async fn call<T: for<'de> Deserialize<'de>>(
        &self,
        creds: &CloudCreds,
        method: reqwest::Method,
        endpoint: &str,
        body: Option<&impl Serialize>,
    ) -> Result<T, AdapterError> {
        let url = format!("{}{}", self.base_url, endpoint);

        let mut request = self
            .client
            .request(method, &url)
            .bearer_auth(creds.access_token.expose())
            .header("Content-Type", "application/json");
        if let Some(b) = body {
            request = request.json(b);
        }

        let response = request
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

    async fn post_message(
        &self,
        creds: &CloudCreds,
        request: &SendMessageRequest,
    ) -> Result<DeliveryReceipt, AdapterError> {
        let endpoint = format!("/{}/messages", creds.phone_number_id);
        let result: SendMessageResponse = self
            .call(creds, reqwest::Method::POST, &endpoint, Some(request))
            .await?;
        let external_id = result.messages.into_iter().next().map(|m| m.id);
        Ok(DeliveryReceipt {
            external_id,
            metadata: MessageMeta::None,
            sent_at: Utc::now(),
        })
    }

    fn text_request(to: &str, body: String) -> SendMessageRequest {
        SendMessageRequest {
            messaging_product: "whatsapp",
            recipient_type: "individual",
            to: to.to_string(),
            message_type: "text",
            text: Some(TextContent {
                preview_url: false,
                body,
            }),
            image: None,
            video: None,
            audio: None,
            document: None,
        }
    }
}

impl Default for WhatsappCloudAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ChannelAdapter for WhatsappCloudAdapter {
    fn kind(&self) -> ChannelKind {
        ChannelKind::WhatsappCloud
    }

    async fn connect(
        &self,
        connection: &ChannelConnection,
    ) -> Result<ConnectOutcome, AdapterError> {
        let creds = Self::creds(connection)?;
        let endpoint = format!("/{}", creds.phone_number_id);
        match self
            .call::<PhoneNumberInfo>(&creds, reqwest::Method::GET, &endpoint, None::<&()>)
            .await
        {
            Ok(info) => {
                tracing::info!(
                    number = %info.display_phone_number,
                    name = info.verified_name.as_deref().unwrap_or("unknown"),
                    "whatsapp cloud connected"
                );
                Ok(ConnectOutcome::active(connection.data.clone()))
            }
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
        let endpoint = format!("/{}", creds.phone_number_id);
        match self
            .call::<PhoneNumberInfo>(&creds, reqwest::Method::GET, &endpoint, None::<&()>)
            .await
        {
            Ok(info) => Ok(ConnectionProbe {
                connected: true,
                account_id: creds.business_account_id.or(Some(creds.phone_number_id)),
                display_name: Some(info.display_phone_number),
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
        let Recipient::Individual { address } = recipient else {
            return Err(AdapterError::Unsupported(
                "WhatsApp Business API does not support group chat replies".to_string(),
            ));
        };
        let creds = Self::creds(connection)?;
        self.post_message(&creds, &Self::text_request(address, content.to_string()))
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
                "WhatsApp Business API does not support group chat replies".to_string(),
            ));
        };
        let creds = Self::creds(connection)?;

        let mut request = SendMessageRequest {
            messaging_product: "whatsapp",
            recipient_type: "individual",
            to: address.clone(),
            message_type: "document",
            text: None,
            image: None,
            video: None,
            audio: None,
            document: None,
        };
        match media.kind {
            MessageKind::Image => {
                request.message_type = "image";
                request.image = Some(MediaContent {
                    link: media.url.clone(),
                    caption: media.caption.clone(),
                });
            }
            MessageKind::Video => {
                request.message_type = "video";
                request.video = Some(MediaContent {
                    link: media.url.clone(),
                    caption: media.caption.clone(),
                });
            }
            MessageKind::Audio => {
                request.message_type = "audio";
                request.audio = Some(LinkContent {
                    link: media.url.clone(),
                });
            }
            MessageKind::Text | MessageKind::Document => {
                request.document = Some(DocumentContent {
                    link: media.url.clone(),
                    filename: media.filename.clone(),
                });
            }
        }

        self.post_message(&creds, &request).await
    }

    async fn send_reply(&self, ctx: ReplyContext<'_>) -> Result<DeliveryReceipt, AdapterError> {
        let Recipient::Individual { address } = &ctx.recipient else {
            return Err(AdapterError::Unsupported(
                "WhatsApp Business API does not support group chat replies".to_string(),
            ));
        };
        // Business-initiated messages cannot quote natively; copy an
        // excerpt of the original into the body.
        let body = excerpt_quote(&ctx.reply.original_content, &ctx.content);
        let creds = Self::creds(ctx.connection)?;
        self.post_message(&creds, &Self::text_request(address, body))
            .await
    }
}
