//! TikTok business messaging adapter.

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

const TIKTOK_API_BASE: &str = "https://business-api.tiktok.com/open_api/v1.3";

#[derive(Debug, Serialize)]
struct SendRequest {
    business_id: String,
    recipient_id: String,
    message: MessageBody,
}

#[derive(Debug, Serialize)]
struct MessageBody {
    #[serde(rename = "type")]
    message_type: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    media_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SendResponse {
    code: i64,
    message: Option<String>,
    data: Option<SendData>,
}

#[derive(Debug, Deserialize)]
struct SendData {
    message_id: Option<String>,
}

/// TikTok adapter.
pub struct TiktokAdapter {
    client: Client,
    base_url: String,
}

impl TiktokAdapter {
    /// Create the adapter.
    #[must_use]
    pub fn new() -> Self {
        Self::with_base_url(TIKTOK_API_BASE)
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
            ConnectionData::Tiktok {
                business_id,
                access_token,
            } => Ok((business_id.clone(), ApiKey::new(access_token.clone()))),
            _ => Err(AdapterError::Config(
                "connection data is not TikTok configuration".to_string(),
            )),
        }
    }

    async fn send(
        &self,
        token: &ApiKey,
        request: &SendRequest,
    ) -> Result<DeliveryReceipt, AdapterError> {
        let url = format!("{}/business/message/send/", self.base_url);
        let response = self
            .client
            .post(&url)
            .header("Access-Token", token.expose())
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
        // TikTok reports API failures in-band with a nonzero code.
        if result.code != 0 {
            return Err(AdapterError::DeliveryFailed(
                result.message.unwrap_or_else(|| "unknown error".to_string()),
            ));
        }
        Ok(DeliveryReceipt {
            external_id: result.data.and_then(|d| d.message_id),
            metadata: MessageMeta::None,
            sent_at: Utc::now(),
        })
    }
}

impl Default for TiktokAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ChannelAdapter for TiktokAdapter {
    fn kind(&self) -> ChannelKind {
        ChannelKind::Tiktok
    }

    async fn connect(
        &self,
        connection: &ChannelConnection,
    ) -> Result<ConnectOutcome, AdapterError> {
        Self::creds(connection)?;
        // Credentials validate lazily on first send; there is no probe
        // endpoint on the messaging scope.
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
        let (business_id, _) = Self::creds(connection)?;
        Ok(ConnectionProbe {
            connected: connection.status == omnidesk_core::types::ConnectionStatus::Active,
            account_id: Some(business_id),
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
                "TikTok does not support group chat replies".to_string(),
            ));
        };
        let (business_id, token) = Self::creds(connection)?;
        self.send(
            &token,
            &SendRequest {
                business_id,
                recipient_id: address.clone(),
                message: MessageBody {
                    message_type: "text",
                    text: Some(content.to_string()),
                    media_url: None,
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
                "TikTok does not support group chat replies".to_string(),
            ));
        };
        let (business_id, token) = Self::creds(connection)?;
        self.send(
            &token,
            &SendRequest {
                business_id,
                recipient_id: address.clone(),
                message: MessageBody {
                    message_type: "media",
                    text: media.caption.clone(),
                    media_url: Some(media.url.clone()),
                },
            },
        )
        .await
    }

    async fn send_reply(&self, ctx: ReplyContext<'_>) -> Result<DeliveryReceipt, AdapterError> {
        let Recipient::Individual { address } = &ctx.recipient else {
            return Err(AdapterError::Unsupported(
                "TikTok does not support group chat replies".to_string(),
            ));
        };
        let (business_id, token) = Self::creds(ctx.connection)?;
        let text = mention_reply(&ctx.reply.original_sender, &ctx.content);
        self.send(
            &token,
            &SendRequest {
                business_id,
                recipient_id: address.clone(),
                message: MessageBody {
                    message_type: "text",
                    text: Some(text),
                    media_url: None,
                },
            },
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use omnidesk_core::types::{CompanyId, ConnectionId, ConnectionStatus};
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn connection() -> ChannelConnection {
        ChannelConnection {
            id: ConnectionId::new("conn-tt"),
            company_id: CompanyId::new("co1"),
            kind: ChannelKind::Tiktok,
            status: ConnectionStatus::Active,
            data: ConnectionData::Tiktok {
                business_id: "biz1".to_string(),
                access_token: "tt-token".to_string(),
            },
        }
    }

    #[tokio::test]
    async fn test_in_band_error_code_is_delivery_failure() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/business/message/send/"))
            .and(header("Access-Token", "tt-token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "code": 40001,
                "message": "recipient window closed"
            })))
            .mount(&server)
            .await;

        let adapter = TiktokAdapter::with_base_url(server.uri());
        let err = adapter
            .send_message(
                &connection(),
                &Recipient::Individual {
                    address: "user-1".to_string(),
                },
                "hello",
            )
            .await
            .unwrap_err();
        assert!(matches!(err, AdapterError::DeliveryFailed(_)));
    }

    #[tokio::test]
    async fn test_group_reply_rejected() {
        let adapter = TiktokAdapter::with_base_url("http://unused.invalid");
        let err = adapter
            .send_message(
                &connection(),
                &Recipient::Group {
                    jid: "g1".to_string(),
                },
                "hello",
            )
            .await
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "TikTok does not support group chat replies"
        );
    }
}
