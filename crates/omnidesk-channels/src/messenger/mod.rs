//! Facebook Messenger adapter using the Graph Send API.

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
    messaging_type: &'static str,
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
    is_reusable: bool,
}

#[derive(Debug, Deserialize)]
struct SendResponse {
    message_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PageInfo {
    id: String,
    name: Option<String>,
}

/// Messenger adapter.
pub struct MessengerAdapter {
    client: Client,
    base_url: String,
}

impl MessengerAdapter {
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
            ConnectionData::Messenger {
                page_id,
                page_access_token,
            } => Ok((page_id.clone(), ApiKey::new(page_access_token.clone()))),
            _ => Err(AdapterError::Config(
                "connection data is not Messenger configuration".to_string(),
            )),
        }
    }

    async fn send(
        &self,
        token: &ApiKey,
        request: &SendRequest,
    ) -> Result<DeliveryReceipt, AdapterError> {
        let url = format!(
            "{}/me/messages?access_token={}",
            self.base_url,
            urlencoding::encode(token.expose())
        );
        let response = self
            .client
            .post(&url)
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

impl Default for MessengerAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ChannelAdapter for MessengerAdapter {
    fn kind(&self) -> ChannelKind {
        ChannelKind::Messenger
    }

    async fn connect(
        &self,
        connection: &ChannelConnection,
    ) -> Result<ConnectOutcome, AdapterError> {
        let (page_id, token) = Self::creds(connection)?;
        let url = format!(
            "{}/{page_id}?access_token={}",
            self.base_url,
            urlencoding::encode(token.expose())
        );
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| AdapterError::Network(e.to_string()));
        match response {
            Ok(r) if r.status().is_success() => {
                let page: PageInfo = r
                    .json()
                    .await
                    .map_err(|e| AdapterError::Network(e.to_string()))?;
                tracing::info!(page = %page.id, name = page.name.as_deref().unwrap_or(""), "messenger page connected");
                Ok(ConnectOutcome::active(connection.data.clone()))
            }
            Ok(r) => {
                let error = format!("{}", r.status());
                Ok(ConnectOutcome::errored(connection.data.clone(), error))
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
        let (page_id, _) = Self::creds(connection)?;
        Ok(ConnectionProbe {
            connected: connection.status == omnidesk_core::types::ConnectionStatus::Active,
            account_id: Some(page_id),
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
                "Messenger does not support group chat replies".to_string(),
            ));
        };
        let (_, token) = Self::creds(connection)?;
        self.send(
            &token,
            &SendRequest {
                recipient: RecipientRef {
                    id: address.clone(),
                },
                message: MessageBody {
                    text: Some(content.to_string()),
                    attachment: None,
                },
                messaging_type: "RESPONSE",
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
                "Messenger does not support group chat replies".to_string(),
            ));
        };
        let (_, token) = Self::creds(connection)?;
        let attachment_type = match media.kind {
            omnidesk_core::types::MessageKind::Image => "image",
            omnidesk_core::types::MessageKind::Video => "video",
            omnidesk_core::types::MessageKind::Audio => "audio",
            _ => "file",
        };
        self.send(
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
                            is_reusable: true,
                        },
                    }),
                },
                messaging_type: "RESPONSE",
            },
        )
        .await
    }

    async fn send_reply(&self, ctx: ReplyContext<'_>) -> Result<DeliveryReceipt, AdapterError> {
        let Recipient::Individual { address } = &ctx.recipient else {
            return Err(AdapterError::Unsupported(
                "Messenger does not support group chat replies".to_string(),
            ));
        };
        let (_, token) = Self::creds(ctx.connection)?;
        // No reply primitive in the Send API; emulate with a mention.
        let text = mention_reply(&ctx.reply.original_sender, &ctx.content);
        self.send(
            &token,
            &SendRequest {
                recipient: RecipientRef {
                    id: address.clone(),
                },
                message: MessageBody {
                    text: Some(text),
                    attachment: None,
                },
                messaging_type: "RESPONSE",
            },
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use omnidesk_core::types::{CompanyId, ConnectionId, ConnectionStatus, MessageId};
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn connection() -> ChannelConnection {
        ChannelConnection {
            id: ConnectionId::new("conn-fb"),
            company_id: CompanyId::new("co1"),
            kind: ChannelKind::Messenger,
            status: ConnectionStatus::Active,
            data: ConnectionData::Messenger {
                page_id: "page1".to_string(),
                page_access_token: "EAAG".to_string(),
            },
        }
    }

    #[tokio::test]
    async fn test_group_reply_rejected_without_network() {
        let adapter = MessengerAdapter::with_base_url("http://unused.invalid");
        let conn = connection();
        let conversation = crate::manager::test_support::conversation_for(&conn);
        let reply = crate::traits::ReplyOptions {
            original_message_id: MessageId::new("m0"),
            original_content: "orig".to_string(),
            original_sender: "Alice".to_string(),
            quoted_message: None,
        };

        let err = adapter
            .send_reply(ReplyContext {
                connection: &conn,
                conversation: &conversation,
                recipient: Recipient::Group {
                    jid: "g1".to_string(),
                },
                content: "hi".to_string(),
                reply: &reply,
            })
            .await
            .unwrap_err();

        assert_eq!(
            err.to_string(),
            "Messenger does not support group chat replies"
        );
    }

    #[tokio::test]
    async fn test_reply_mentions_original_sender() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/me/messages"))
            .and(body_partial_json(serde_json::json!({
                "recipient": {"id": "psid-1"},
                "message": {"text": "@Alice thanks!"}
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "recipient_id": "psid-1",
                "message_id": "mid.1"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let adapter = MessengerAdapter::with_base_url(server.uri());
        let conn = connection();
        let conversation = crate::manager::test_support::conversation_for(&conn);
        let reply = crate::traits::ReplyOptions {
            original_message_id: MessageId::new("m0"),
            original_content: "orig".to_string(),
            original_sender: "Alice".to_string(),
            quoted_message: None,
        };

        let receipt = adapter
            .send_reply(ReplyContext {
                connection: &conn,
                conversation: &conversation,
                recipient: Recipient::Individual {
                    address: "psid-1".to_string(),
                },
                content: "thanks!".to_string(),
                reply: &reply,
            })
            .await
            .unwrap();

        assert_eq!(receipt.external_id.as_deref(), Some("mid.1"));
    }
}
