//! Adapter traits.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use omnidesk_core::capabilities::{ChannelCapabilities, capabilities};
use omnidesk_core::types::{
    ChannelConnection, ChannelKind, ConnectionData, ConnectionStatus, Conversation, Message,
    MessageId, MessageKind, MessageMeta,
};

/// Adapter errors.
#[derive(Error, Debug)]
pub enum AdapterError {
    /// Connection is not active.
    #[error("Channel not connected")]
    NotConnected,

    /// Provider rejected the credentials.
    #[error("Authentication failed: {0}")]
    AuthFailed(String),

    /// Operation is not supported on this channel; the message is the
    /// provider-specific caller-visible text.
    #[error("{0}")]
    Unsupported(String),

    /// Unofficial WhatsApp reply without the required quote object.
    #[error("No quoted message object provided for WhatsApp reply")]
    MissingQuote,

    /// Provider-level age gate rejected a delete.
    #[error("Message is too old to be deleted")]
    TooOld,

    /// Message delivery failed.
    #[error("Delivery failed: {0}")]
    DeliveryFailed(String),

    /// Rate limited.
    #[error("Rate limited")]
    RateLimited,

    /// Network error.
    #[error("Network error: {0}")]
    Network(String),

    /// Connection record does not carry this adapter's configuration.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Storage facade failed while the adapter was materializing or
    /// persisting rows.
    #[error("Storage error: {0}")]
    Storage(String),
}

impl From<omnidesk_core::storage::StorageError> for AdapterError {
    fn from(e: omnidesk_core::storage::StorageError) -> Self {
        Self::Storage(e.to_string())
    }
}

/// Result of a connect/disconnect lifecycle call.
///
/// Adapters own their connection-data shape, so status transitions and
/// config mutations (token generation, error recording) travel back to the
/// manager in one value for persistence.
#[derive(Debug, Clone)]
pub struct ConnectOutcome {
    /// Status to store on the connection.
    pub status: ConnectionStatus,
    /// Connection data to store back.
    pub data: ConnectionData,
    /// Provider error when the lifecycle call failed softly.
    pub error: Option<String>,
}

impl ConnectOutcome {
    /// Successful activation.
    #[must_use]
    pub const fn active(data: ConnectionData) -> Self {
        Self {
            status: ConnectionStatus::Active,
            data,
            error: None,
        }
    }

    /// Clean disconnect.
    #[must_use]
    pub const fn disconnected(data: ConnectionData) -> Self {
        Self {
            status: ConnectionStatus::Disconnected,
            data,
            error: None,
        }
    }

    /// Failed activation with the provider error recorded.
    #[must_use]
    pub const fn errored(data: ConnectionData, error: String) -> Self {
        Self {
            status: ConnectionStatus::Error,
            data,
            error: Some(error),
        }
    }
}

/// Connection health probe result.
#[derive(Debug, Clone)]
pub struct ConnectionProbe {
    /// Whether the provider accepted the credentials.
    pub connected: bool,
    /// Provider-side account identifier.
    pub account_id: Option<String>,
    /// Provider-side display name.
    pub display_name: Option<String>,
    /// Error message if not connected.
    pub error: Option<String>,
}

/// Where an outbound message goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Recipient {
    /// A single counterpart address (digits, email, PSID, session id --
    /// whatever the channel family keys on).
    Individual {
        /// The resolved address.
        address: String,
    },
    /// A provider-native group.
    Group {
        /// Group JID.
        jid: String,
    },
}

impl Recipient {
    /// The address or JID as a plain string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Individual { address } => address,
            Self::Group { jid } => jid,
        }
    }
}

/// Reply options supplied by the caller (UI, campaign sender, flows).
#[derive(Debug, Clone)]
pub struct ReplyOptions {
    /// Local id of the message being replied to.
    pub original_message_id: MessageId,
    /// Content of the original message, for quote/mention synthesis.
    pub original_content: String,
    /// Display name of the original sender, for mention synthesis.
    pub original_sender: String,
    /// Provider-native quote object (unofficial WhatsApp only).
    pub quoted_message: Option<serde_json::Value>,
}

/// Everything an adapter needs to send one reply.
#[derive(Debug)]
pub struct ReplyContext<'a> {
    /// The provider connection.
    pub connection: &'a ChannelConnection,
    /// The conversation being replied in.
    pub conversation: &'a Conversation,
    /// Resolved recipient.
    pub recipient: Recipient,
    /// Final outbound content (signature already applied).
    pub content: String,
    /// Caller-supplied reply options.
    pub reply: &'a ReplyOptions,
}

/// Media attachment for outbound sends.
#[derive(Debug, Clone)]
pub struct MediaPayload {
    /// Public URL of the media.
    pub url: String,
    /// Content classification.
    pub kind: MessageKind,
    /// Caption, where the provider supports one.
    pub caption: Option<String>,
    /// Filename, for documents.
    pub filename: Option<String>,
}

/// What a provider send produced.
#[derive(Debug, Clone)]
pub struct DeliveryReceipt {
    /// Provider-native message id, when the provider returns one.
    pub external_id: Option<String>,
    /// Provider-native metadata to store with the message.
    pub metadata: MessageMeta,
    /// Provider send time.
    pub sent_at: DateTime<Utc>,
}

impl DeliveryReceipt {
    /// Receipt with an external id and no extra metadata.
    #[must_use]
    pub fn with_external_id(external_id: impl Into<String>) -> Self {
        Self {
            external_id: Some(external_id.into()),
            metadata: MessageMeta::None,
            sent_at: Utc::now(),
        }
    }

    /// Receipt for channels that return nothing useful.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            external_id: None,
            metadata: MessageMeta::None,
            sent_at: Utc::now(),
        }
    }
}

/// One provider integration.
///
/// Adapters are stateless with respect to tenants: credentials are
/// extracted from the [`ChannelConnection`] record on every call, so one
/// adapter instance serves every connection of its kind.
#[async_trait]
pub trait ChannelAdapter: Send + Sync {
    /// The channel kind this adapter serves.
    fn kind(&self) -> ChannelKind;

    /// Capability table entry for this kind.
    fn capabilities(&self) -> ChannelCapabilities {
        capabilities(self.kind())
    }

    /// Validate credentials and activate the connection.
    ///
    /// Provider rejection is a soft failure: it comes back as an
    /// [`ConnectOutcome::errored`] so the error lands in the stored
    /// connection record. A hard `Err` means the connection record itself
    /// is unusable (wrong data variant).
    async fn connect(
        &self,
        connection: &ChannelConnection,
    ) -> Result<ConnectOutcome, AdapterError>;

    /// Deactivate the connection.
    async fn disconnect(
        &self,
        connection: &ChannelConnection,
    ) -> Result<ConnectOutcome, AdapterError>;

    /// Check provider-side health without mutating anything.
    async fn probe(&self, connection: &ChannelConnection)
    -> Result<ConnectionProbe, AdapterError>;

    /// Send a plain message.
    async fn send_message(
        &self,
        connection: &ChannelConnection,
        recipient: &Recipient,
        content: &str,
    ) -> Result<DeliveryReceipt, AdapterError>;

    /// Send a media message.
    async fn send_media(
        &self,
        connection: &ChannelConnection,
        recipient: &Recipient,
        media: &MediaPayload,
    ) -> Result<DeliveryReceipt, AdapterError>;

    /// Send a reply, constructing the provider-appropriate reply
    /// representation. Group support varies per provider and is checked
    /// here, not in the manager.
    async fn send_reply(&self, ctx: ReplyContext<'_>) -> Result<DeliveryReceipt, AdapterError>;

    /// Delete a message provider-side. Channels without remote deletion
    /// keep the default.
    async fn delete_message(
        &self,
        _connection: &ChannelConnection,
        _conversation: &Conversation,
        _message: &Message,
    ) -> Result<(), AdapterError> {
        Err(AdapterError::Unsupported(format!(
            "{} does not support message deletion",
            self.kind().label()
        )))
    }
}

/// Synthesize a quoted reply by copying a truncated excerpt of the
/// original into the body (official WhatsApp APIs have no native quoting
/// for business-initiated messages).
#[must_use]
pub fn excerpt_quote(original_content: &str, content: &str) -> String {
    let excerpt: String = original_content.chars().take(50).collect();
    let ellipsis = if original_content.chars().count() > 50 {
        "…"
    } else {
        ""
    };
    format!("> {excerpt}{ellipsis}\n\n{content}")
}

/// Synthesize an `@mention` reply prefix for channels with no reply
/// primitive at all.
#[must_use]
pub fn mention_reply(original_sender: &str, content: &str) -> String {
    if original_sender.trim().is_empty() {
        content.to_string()
    } else {
        format!("@{original_sender} {content}")
    }
}
