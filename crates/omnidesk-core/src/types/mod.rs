//! Core types shared across Omnidesk.
//!
//! Every record here is channel-agnostic: provider-specific shapes are
//! confined to the tagged [`ConnectionData`] and [`MessageMeta`] unions so
//! an adapter only ever constructs or reads its own variant.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Unique identifier for a company (tenant).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CompanyId(pub String);

/// Unique identifier for a channel connection.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConnectionId(pub String);

/// Unique identifier for a conversation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConversationId(pub String);

/// Unique identifier for a contact.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContactId(pub String);

/// Unique identifier for a message.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageId(pub String);

/// Unique identifier for an agent user.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UserId(pub String);

macro_rules! string_id {
    ($name:ident) => {
        impl $name {
            /// Create an id from an existing value.
            #[must_use]
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            /// Generate a fresh random id.
            #[must_use]
            pub fn generate() -> Self {
                Self(uuid::Uuid::new_v4().to_string())
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

string_id!(CompanyId);
string_id!(ConnectionId);
string_id!(ConversationId);
string_id!(ContactId);
string_id!(MessageId);
string_id!(UserId);

/// The closed set of supported channel kinds.
///
/// The wire names match what callers and stored records use; adding a kind
/// forces every exhaustive match in the manager and registry to be updated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelKind {
    /// Unofficial WhatsApp via a bridge service.
    Whatsapp,
    /// Official WhatsApp Business Cloud API.
    #[serde(rename = "whatsapp_official")]
    WhatsappCloud,
    /// WhatsApp via the Twilio Conversations API.
    WhatsappTwilio,
    /// WhatsApp via the 360Dialog partner API.
    #[serde(rename = "whatsapp_360dialog")]
    Dialog360,
    /// Facebook Messenger.
    Messenger,
    /// Instagram Direct.
    Instagram,
    /// TikTok business messaging.
    Tiktok,
    /// Email (SMTP outbound, MIME inbound).
    Email,
    /// SMS via the Twilio Messages API.
    Sms,
    /// Embeddable webchat widget.
    Webchat,
}

impl ChannelKind {
    /// All kinds, in capability-table order.
    pub const ALL: [Self; 10] = [
        Self::Whatsapp,
        Self::WhatsappCloud,
        Self::WhatsappTwilio,
        Self::Dialog360,
        Self::Messenger,
        Self::Instagram,
        Self::Tiktok,
        Self::Email,
        Self::Sms,
        Self::Webchat,
    ];

    /// Wire name of this kind.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Whatsapp => "whatsapp",
            Self::WhatsappCloud => "whatsapp_official",
            Self::WhatsappTwilio => "whatsapp_twilio",
            Self::Dialog360 => "whatsapp_360dialog",
            Self::Messenger => "messenger",
            Self::Instagram => "instagram",
            Self::Tiktok => "tiktok",
            Self::Email => "email",
            Self::Sms => "sms",
            Self::Webchat => "webchat",
        }
    }

    /// Human-readable label.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Whatsapp => "WhatsApp",
            Self::WhatsappCloud => "WhatsApp Business",
            Self::WhatsappTwilio => "WhatsApp (Twilio)",
            Self::Dialog360 => "WhatsApp (360Dialog)",
            Self::Messenger => "Messenger",
            Self::Instagram => "Instagram",
            Self::Tiktok => "TikTok",
            Self::Email => "Email",
            Self::Sms => "SMS",
            Self::Webchat => "Web Chat",
        }
    }
}

impl fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Error returned when a channel-kind string is not recognized.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownChannelKind(pub String);

impl fmt::Display for UnknownChannelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown channel kind: {}", self.0)
    }
}

impl std::error::Error for UnknownChannelKind {}

impl FromStr for ChannelKind {
    type Err = UnknownChannelKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| UnknownChannelKind(s.to_string()))
    }
}

/// Lifecycle status of a channel connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    /// Connected and usable.
    Active,
    /// Configured but not running.
    Inactive,
    /// Last connect attempt failed.
    Error,
    /// Explicitly disconnected.
    Disconnected,
}

/// Provider-specific connection configuration.
///
/// One variant per [`ChannelKind`]; the variant determines which adapter
/// may read it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ConnectionData {
    /// Unofficial WhatsApp bridge credentials.
    Whatsapp {
        /// Base URL of the bridge service.
        bridge_url: String,
        /// Bridge instance identifier.
        instance_id: String,
        /// Bridge API token.
        api_token: String,
        /// Business phone number, once known.
        phone_number: Option<String>,
    },
    /// WhatsApp Cloud API credentials.
    #[serde(rename = "whatsapp_official")]
    WhatsappCloud {
        /// Meta access token.
        access_token: String,
        /// WhatsApp Business phone number ID.
        phone_number_id: String,
        /// Business account ID, if configured.
        business_account_id: Option<String>,
    },
    /// Twilio Conversations credentials.
    WhatsappTwilio {
        /// Twilio account SID.
        account_sid: String,
        /// Twilio auth token.
        auth_token: String,
        /// Conversations Service SID.
        conversations_service_sid: String,
        /// Sending WhatsApp number (E.164).
        whatsapp_number: String,
        /// Last connect error, recorded by the adapter.
        last_error: Option<String>,
    },
    /// 360Dialog partner credentials.
    #[serde(rename = "whatsapp_360dialog")]
    Dialog360 {
        /// 360Dialog API key.
        api_key: String,
        /// Sending phone number.
        phone_number: String,
        /// Partner ID, if applicable.
        partner_id: Option<String>,
    },
    /// Messenger page credentials.
    Messenger {
        /// Facebook page ID.
        page_id: String,
        /// Page access token.
        page_access_token: String,
    },
    /// Instagram account credentials.
    Instagram {
        /// Instagram business account ID.
        account_id: String,
        /// Access token.
        access_token: String,
    },
    /// TikTok business credentials.
    Tiktok {
        /// Business account ID.
        business_id: String,
        /// Access token.
        access_token: String,
    },
    /// Email transport configuration.
    Email {
        /// SMTP host.
        smtp_host: String,
        /// SMTP port.
        smtp_port: u16,
        /// SMTP username.
        username: String,
        /// SMTP password.
        password: String,
        /// From address used for outbound mail.
        from_address: String,
    },
    /// Twilio SMS credentials.
    Sms {
        /// Twilio account SID.
        account_sid: String,
        /// Twilio auth token.
        auth_token: String,
        /// Sending phone number (E.164).
        from_number: String,
    },
    /// Webchat widget state.
    Webchat {
        /// Widget token authenticating inbound webhooks.
        widget_token: Option<String>,
        /// Display name shown in the widget.
        site_name: Option<String>,
    },
}

impl ConnectionData {
    /// The channel kind this configuration belongs to.
    #[must_use]
    pub const fn kind(&self) -> ChannelKind {
        match self {
            Self::Whatsapp { .. } => ChannelKind::Whatsapp,
            Self::WhatsappCloud { .. } => ChannelKind::WhatsappCloud,
            Self::WhatsappTwilio { .. } => ChannelKind::WhatsappTwilio,
            Self::Dialog360 { .. } => ChannelKind::Dialog360,
            Self::Messenger { .. } => ChannelKind::Messenger,
            Self::Instagram { .. } => ChannelKind::Instagram,
            Self::Tiktok { .. } => ChannelKind::Tiktok,
            Self::Email { .. } => ChannelKind::Email,
            Self::Sms { .. } => ChannelKind::Sms,
            Self::Webchat { .. } => ChannelKind::Webchat,
        }
    }
}

/// One configured provider account.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelConnection {
    /// Connection id.
    pub id: ConnectionId,
    /// Owning tenant.
    pub company_id: CompanyId,
    /// Channel kind; always equals `data.kind()`.
    pub kind: ChannelKind,
    /// Lifecycle status.
    pub status: ConnectionStatus,
    /// Provider-specific configuration.
    pub data: ConnectionData,
}

/// How contacts are keyed within a tenant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IdentifierKind {
    /// Digits-only phone number (WhatsApp family, SMS).
    Phone,
    /// Email address.
    Email,
    /// Anonymous webchat session id.
    Webchat,
    /// Platform-scoped id (Messenger PSID, Instagram, TikTok).
    External,
}

impl IdentifierKind {
    /// String form used in storage keys.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Phone => "phone",
            Self::Email => "email",
            Self::Webchat => "webchat",
            Self::External => "external",
        }
    }
}

/// A counterpart identity, unique per `(company, identifier, kind)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Contact {
    /// Contact id.
    pub id: ContactId,
    /// Owning tenant.
    pub company_id: CompanyId,
    /// Channel-family identifier (phone digits, email, session id, PSID).
    pub identifier: String,
    /// What the identifier encodes.
    pub identifier_kind: IdentifierKind,
    /// Display name, if known.
    pub name: Option<String>,
    /// Email, if known.
    pub email: Option<String>,
    /// Phone, if known.
    pub phone: Option<String>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
}

/// Insert shape for [`Contact`].
#[derive(Debug, Clone)]
pub struct NewContact {
    /// Owning tenant.
    pub company_id: CompanyId,
    /// Channel-family identifier.
    pub identifier: String,
    /// What the identifier encodes.
    pub identifier_kind: IdentifierKind,
    /// Display name, if known.
    pub name: Option<String>,
    /// Email, if known.
    pub email: Option<String>,
    /// Phone, if known.
    pub phone: Option<String>,
}

/// Conversation lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConversationStatus {
    /// Awaiting agent attention.
    Open,
    /// Waiting on the counterpart.
    Pending,
    /// Resolved.
    Closed,
}

/// Who a conversation is with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "peer", rename_all = "snake_case")]
pub enum ConversationPeer {
    /// A single contact.
    Contact {
        /// The contact id.
        contact_id: ContactId,
    },
    /// A group entity (unofficial WhatsApp only).
    Group {
        /// Provider-native group JID.
        jid: String,
    },
}

/// A thread of messages with one counterpart on one channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    /// Conversation id.
    pub id: ConversationId,
    /// Owning tenant; must equal the connection's `company_id`.
    pub company_id: CompanyId,
    /// The channel connection this conversation lives on.
    pub channel_id: ConnectionId,
    /// Channel kind, denormalized for dispatch.
    pub kind: ChannelKind,
    /// Counterpart.
    pub peer: ConversationPeer,
    /// Lifecycle status.
    pub status: ConversationStatus,
    /// Timestamp of the most recent message.
    pub last_message_at: Option<DateTime<Utc>>,
    /// Whether flow automation is muted for this conversation.
    pub bot_disabled: bool,
    /// Creation time.
    pub created_at: DateTime<Utc>,
}

impl Conversation {
    /// Whether this is a group conversation.
    #[must_use]
    pub const fn is_group(&self) -> bool {
        matches!(self.peer, ConversationPeer::Group { .. })
    }

    /// Contact id for 1:1 conversations.
    #[must_use]
    pub fn contact_id(&self) -> Option<&ContactId> {
        match &self.peer {
            ConversationPeer::Contact { contact_id } => Some(contact_id),
            ConversationPeer::Group { .. } => None,
        }
    }

    /// Group JID for group conversations.
    #[must_use]
    pub fn group_jid(&self) -> Option<&str> {
        match &self.peer {
            ConversationPeer::Group { jid } => Some(jid.as_str()),
            ConversationPeer::Contact { .. } => None,
        }
    }
}

/// Insert shape for [`Conversation`].
#[derive(Debug, Clone)]
pub struct NewConversation {
    /// Owning tenant.
    pub company_id: CompanyId,
    /// The channel connection.
    pub channel_id: ConnectionId,
    /// Channel kind.
    pub kind: ChannelKind,
    /// Counterpart.
    pub peer: ConversationPeer,
}

/// Message direction relative to the company.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// From the counterpart to the company.
    Inbound,
    /// From the company to the counterpart.
    Outbound,
}

/// Content classification of a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    /// Plain text.
    Text,
    /// Image media.
    Image,
    /// Video media.
    Video,
    /// Audio media.
    Audio,
    /// Document/file.
    Document,
}

impl MessageKind {
    /// Classify from a MIME type, defaulting to document for unknown types.
    #[must_use]
    pub fn from_mime(mime: &str) -> Self {
        if mime.starts_with("image/") {
            Self::Image
        } else if mime.starts_with("video/") {
            Self::Video
        } else if mime.starts_with("audio/") {
            Self::Audio
        } else {
            Self::Document
        }
    }
}

/// Delivery status of a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageStatus {
    /// Accepted locally, provider call in flight.
    Sending,
    /// Accepted by the provider.
    Sent,
    /// Delivered to the counterpart.
    Delivered,
    /// Read by the counterpart.
    Read,
    /// Provider rejected the message.
    Failed,
}

/// Who authored a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SenderKind {
    /// The counterpart.
    Contact,
    /// A company agent.
    User,
    /// Flow automation.
    Bot,
}

/// Provider-native message metadata.
///
/// Stored alongside the message and read back for deletes and threaded
/// replies; each adapter only constructs its own variant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MessageMeta {
    /// No provider metadata.
    #[default]
    None,
    /// Unofficial-WhatsApp message key, required for remote deletion.
    WhatsappKey {
        /// Chat JID the message belongs to.
        remote_jid: String,
        /// Whether the business account authored it.
        from_me: bool,
        /// Provider message id.
        id: String,
    },
    /// Twilio Conversations identifiers.
    Twilio {
        /// Conversation SID.
        conversation_sid: String,
        /// Message SID.
        message_sid: String,
    },
    /// Email threading headers.
    Email {
        /// RFC 5322 Message-ID of this email.
        message_id: String,
        /// Accumulated References chain.
        references: Vec<String>,
        /// Subject line, reused for `Re:` replies.
        subject: Option<String>,
    },
}

/// The canonical message unit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    /// Message id.
    pub id: MessageId,
    /// Conversation this message belongs to.
    pub conversation_id: ConversationId,
    /// Direction.
    pub direction: Direction,
    /// Content classification.
    pub kind: MessageKind,
    /// Text content (or caption for media).
    pub content: String,
    /// Media URL, for media kinds.
    pub media_url: Option<String>,
    /// Delivery status.
    pub status: MessageStatus,
    /// Provider-native message id; unique per provider when present.
    pub external_id: Option<String>,
    /// Provider-native metadata.
    pub metadata: MessageMeta,
    /// Author classification.
    pub sender_kind: SenderKind,
    /// Authoring agent, for outbound user messages.
    pub sender_id: Option<UserId>,
    /// Provider send time, when known.
    pub sent_at: Option<DateTime<Utc>>,
    /// Local creation time.
    pub created_at: DateTime<Utc>,
}

impl Message {
    /// The timestamp used for age-based checks: `sent_at` if known,
    /// otherwise `created_at`.
    #[must_use]
    pub fn effective_time(&self) -> DateTime<Utc> {
        self.sent_at.unwrap_or(self.created_at)
    }
}

/// Insert shape for [`Message`].
#[derive(Debug, Clone)]
pub struct NewMessage {
    /// Conversation this message belongs to.
    pub conversation_id: ConversationId,
    /// Direction.
    pub direction: Direction,
    /// Content classification.
    pub kind: MessageKind,
    /// Text content (or caption).
    pub content: String,
    /// Media URL.
    pub media_url: Option<String>,
    /// Delivery status.
    pub status: MessageStatus,
    /// Provider-native message id.
    pub external_id: Option<String>,
    /// Provider-native metadata.
    pub metadata: MessageMeta,
    /// Author classification.
    pub sender_kind: SenderKind,
    /// Authoring agent.
    pub sender_id: Option<UserId>,
    /// Provider send time.
    pub sent_at: Option<DateTime<Utc>>,
}

impl NewMessage {
    /// A plain inbound text message from the counterpart.
    #[must_use]
    pub fn inbound_text(conversation_id: ConversationId, content: impl Into<String>) -> Self {
        Self {
            conversation_id,
            direction: Direction::Inbound,
            kind: MessageKind::Text,
            content: content.into(),
            media_url: None,
            status: MessageStatus::Delivered,
            external_id: None,
            metadata: MessageMeta::None,
            sender_kind: SenderKind::Contact,
            sender_id: None,
            sent_at: None,
        }
    }

    /// A plain outbound text message from an agent.
    #[must_use]
    pub fn outbound_text(conversation_id: ConversationId, content: impl Into<String>) -> Self {
        Self {
            conversation_id,
            direction: Direction::Outbound,
            kind: MessageKind::Text,
            content: content.into(),
            media_url: None,
            status: MessageStatus::Sent,
            external_id: None,
            metadata: MessageMeta::None,
            sender_kind: SenderKind::User,
            sender_id: None,
            sent_at: None,
        }
    }
}

/// An agent user, reduced to the fields the signature chain consumes.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct User {
    /// User id.
    pub id: UserId,
    /// Full name, if set.
    pub full_name: Option<String>,
    /// Short name, if set.
    pub name: Option<String>,
    /// First name, if set.
    pub first_name: Option<String>,
    /// Last name, if set.
    pub last_name: Option<String>,
    /// Display name, if set.
    pub display_name: Option<String>,
    /// Login email.
    pub email: Option<String>,
}

impl User {
    /// Resolve a display name for outbound signatures.
    ///
    /// Fallback chain: full name, name, first+last, display name, then the
    /// local part of the email address.
    #[must_use]
    pub fn signature_name(&self) -> Option<String> {
        if let Some(n) = non_empty(self.full_name.as_deref()) {
            return Some(n.to_string());
        }
        if let Some(n) = non_empty(self.name.as_deref()) {
            return Some(n.to_string());
        }
        match (
            non_empty(self.first_name.as_deref()),
            non_empty(self.last_name.as_deref()),
        ) {
            (Some(first), Some(last)) => return Some(format!("{first} {last}")),
            (Some(first), None) => return Some(first.to_string()),
            _ => {}
        }
        if let Some(n) = non_empty(self.display_name.as_deref()) {
            return Some(n.to_string());
        }
        self.email
            .as_deref()
            .and_then(|e| e.split('@').next())
            .and_then(|local| non_empty(Some(local)))
            .map(ToString::to_string)
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

/// Strip a phone number down to its digits.
///
/// Providers disagree on formatting (`whatsapp:+15551234567`,
/// `+1 555 123 4567`); contacts are keyed by the digits alone.
#[must_use]
pub fn normalize_phone(raw: &str) -> String {
    raw.chars().filter(char::is_ascii_digit).collect()
}
