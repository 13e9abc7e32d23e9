//! # Omnidesk Channels
//!
//! Provider adapters and the reply/delete routing layer for the Omnidesk
//! omnichannel inbox.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod manager;
mod registry;
mod session;
mod traits;

/// Unofficial WhatsApp adapter (bridge service).
pub mod whatsapp;
/// Official WhatsApp Business Cloud API adapter.
pub mod whatsapp_cloud;
/// WhatsApp adapter over the Twilio Conversations API.
pub mod whatsapp_twilio;
/// WhatsApp adapter for the 360Dialog partner API.
pub mod dialog360;
/// Facebook Messenger adapter.
pub mod messenger;
/// Instagram Direct adapter.
pub mod instagram;
/// TikTok business messaging adapter.
pub mod tiktok;
/// Email adapter (SMTP outbound, MIME inbound).
pub mod email;
/// Twilio SMS adapter.
pub mod sms;
/// Webchat widget adapter.
pub mod webchat;

pub use manager::{ChannelManager, DispatchError, ReplyReceipt, SIGNATURE_SETTING, Warning};
pub use registry::AdapterRegistry;
pub use session::{SessionInfo, SessionRegistry};
pub use traits::{
    AdapterError, ChannelAdapter, ConnectOutcome, ConnectionProbe, DeliveryReceipt, MediaPayload,
    Recipient, ReplyContext, ReplyOptions, excerpt_quote, mention_reply,
};

// Re-export adapter types for direct wiring.
pub use dialog360::Dialog360Adapter;
pub use email::EmailAdapter;
pub use instagram::InstagramAdapter;
pub use messenger::MessengerAdapter;
pub use sms::SmsAdapter;
pub use tiktok::TiktokAdapter;
pub use webchat::{WebchatAdapter, WebchatEventData, WebchatWebhook};
pub use whatsapp::WhatsappAdapter;
pub use whatsapp_cloud::WhatsappCloudAdapter;
pub use whatsapp_twilio::{TwilioWebhook, WhatsappTwilioAdapter};
