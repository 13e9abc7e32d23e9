//! SMS adapter using the Twilio Messages API.
//!
//! Unlike the Conversations API used for WhatsApp, plain SMS is a single
//! stateless POST per message.

use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use serde::Deserialize;

use omnidesk_core::types::{
    ChannelConnection, ChannelKind, ConnectionData, MessageMeta, normalize_phone,
};

use crate::traits::{
    AdapterError, ChannelAdapter, ConnectOutcome, ConnectionProbe, DeliveryReceipt, MediaPayload,
    Recipient, ReplyContext,
};

const TWILIO_API_BASE: &str = "https://api.twilio.com/2010-04-01";

#[derive(Debug, Clone)]
struct SmsCreds {
    account_sid: String,
    auth_token: String,
    from_number: String,
}

#[derive(Debug, Deserialize)]
struct MessageResource {
    sid: String,
}

#[derive(Debug, Deserialize)]
struct AccountResource {
    sid: String,
    friendly_name: Option<String>,
}

/// Twilio SMS adapter.
pub struct SmsAdapter {
    client: Client,
    base_url: String,
}

impl SmsAdapter {
    /// Create the adapter.
    #[must_use]
    pub fn new() -> Self {
        Self::with_base_url(TWILIO_API_BASE)
    }

    /// Create the adapter against a non-default API base (tests).
    #[must_use]
    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into(),
        }
    }

    fn creds(connection: &ChannelConnection) -> Result<SmsCreds, AdapterError> {
        match &connection.data {
            ConnectionData::Sms {
                account_sid,
                auth_token,
                from_number,
            } => Ok(SmsCreds {
                account_sid: account_sid.clone(),
                auth_token: auth_token.clone(),
                from_number: from_number.clone(),
            }),
            _ => Err(AdapterError::Config(
                "connection data is not SMS configuration".to_string(),
            )),
        }
    }

    async fn post_message(
        &self,
        creds: &SmsCreds,
        to: &str,
        body: &str,
        media_url: Option<&str>,
    ) -> Result<DeliveryReceipt, AdapterError> {
        let url = format!(
            "{}/Accounts/{}/Messages.json",
            self.base_url, creds.account_sid
        );
        let to = format!("+{}", normalize_phone(to));
        let mut form: Vec<(&str, &str)> = vec![
            ("To", to.as_str()),
            ("From", creds.from_number.as_str()),
            ("Body", body),
        ];
        if let Some(media) = media_url {
            form.push(("MediaUrl", media));
        }

        let response = self
            .client
            .post(&url)
            .basic_auth(&creds.account_sid, Some(&creds.auth_token))
            .form(&form)
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
        let message: MessageResource = response
            .json()
            .await
            .map_err(|e| AdapterError::Network(e.to_string()))?;
        Ok(DeliveryReceipt {
            external_id: Some(message.sid),
            metadata: MessageMeta::None,
            sent_at: Utc::now(),
        })
    }
}

impl Default for SmsAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ChannelAdapter for SmsAdapter {
    fn kind(&self) -> ChannelKind {
        ChannelKind::Sms
    }

    async fn connect(
        &self,
        connection: &ChannelConnection,
    ) -> Result<ConnectOutcome, AdapterError> {
        let creds = Self::creds(connection)?;
        let url = format!("{}/Accounts/{}.json", self.base_url, creds.account_sid);
        let response = self
            .client
            .get(&url)
            .basic_auth(&creds.account_sid, Some(&creds.auth_token))
            .send()
            .await;
        match response {
            Ok(r) if r.status().is_success() => {
                let account: AccountResource = r
                    .json()
                    .await
                    .map_err(|e| AdapterError::Network(e.to_string()))?;
                tracing::info!(
                    account = %account.sid,
                    name = account.friendly_name.as_deref().unwrap_or(""),
                    "twilio sms account validated"
                );
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
        let creds = Self::creds(connection)?;
        Ok(ConnectionProbe {
            connected: connection.status == omnidesk_core::types::ConnectionStatus::Active,
            account_id: Some(creds.account_sid),
            display_name: Some(creds.from_number),
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
                "SMS does not support group chat replies".to_string(),
            ));
        };
        let creds = Self::creds(connection)?;
        self.post_message(&creds, address, content, None).await
    }

    async fn send_media(
        &self,
        connection: &ChannelConnection,
        recipient: &Recipient,
        media: &MediaPayload,
    ) -> Result<DeliveryReceipt, AdapterError> {
        let Recipient::Individual { address } = recipient else {
            return Err(AdapterError::Unsupported(
                "SMS does not support group chat replies".to_string(),
            ));
        };
        let creds = Self::creds(connection)?;
        self.post_message(
            &creds,
            address,
            media.caption.as_deref().unwrap_or(""),
            Some(&media.url),
        )
        .await
    }

    async fn send_reply(&self, ctx: ReplyContext<'_>) -> Result<DeliveryReceipt, AdapterError> {
        let Recipient::Individual { address } = &ctx.recipient else {
            return Err(AdapterError::Unsupported(
                "SMS does not support group chat replies".to_string(),
            ));
        };
        // SMS has no reply representation; the content goes out flat.
        let creds = Self::creds(ctx.connection)?;
        self.post_message(&creds, address, &ctx.content, None).await
    }
}
