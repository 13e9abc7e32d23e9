//! Per-channel capability table.
//!
//! Capabilities are a pure function of [`ChannelKind`] and are never
//! persisted. The manager consults them before any reply or delete is
//! attempted; values encode provider-observed constraints, not wishes.

use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::types::ChannelKind;

/// Unofficial WhatsApp advertises deletion for 72 hours.
///
/// The adapter itself enforces the tighter protocol limit; both constants
/// are intentional (coarse gate here, precise gate in the adapter).
pub const WHATSAPP_DELETE_LIMIT_MINUTES: i64 = 4320;

/// How a channel expresses "this is a reply to that".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReplyFormat {
    /// Provider-native quoting, or a copied excerpt where quoting is
    /// emulated.
    Quote,
    /// `@sender` prefix emulation.
    Mention,
    /// Flat threaded replies (native headers for email, plain order
    /// otherwise).
    Thread,
}

/// What a channel supports, consulted before dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelCapabilities {
    /// Whether agent replies can be sent at all.
    pub supports_reply: bool,
    /// Whether provider-side deletion is available.
    pub supports_delete: bool,
    /// Whether the provider has native quoted messages.
    pub supports_quoted_messages: bool,
    /// Age limit for deletion, in minutes, when deletion is supported.
    pub delete_time_limit_minutes: Option<i64>,
    /// Reply representation the adapter will construct.
    pub reply_format: ReplyFormat,
}

impl ChannelCapabilities {
    /// The fully-disabled capability set used for unrecognized kinds.
    #[must_use]
    pub const fn disabled() -> Self {
        Self {
            supports_reply: false,
            supports_delete: false,
            supports_quoted_messages: false,
            delete_time_limit_minutes: None,
            reply_format: ReplyFormat::Mention,
        }
    }
}

/// Capabilities for a known channel kind.
#[must_use]
pub const fn capabilities(kind: ChannelKind) -> ChannelCapabilities {
    match kind {
        ChannelKind::Whatsapp => ChannelCapabilities {
            supports_reply: true,
            supports_delete: true,
            supports_quoted_messages: true,
            delete_time_limit_minutes: Some(WHATSAPP_DELETE_LIMIT_MINUTES),
            reply_format: ReplyFormat::Quote,
        },
        // The official APIs emulate quoting by copying an excerpt into the
        // body; none of them expose deletion.
        ChannelKind::WhatsappCloud | ChannelKind::WhatsappTwilio | ChannelKind::Dialog360 => {
            ChannelCapabilities {
                supports_reply: true,
                supports_delete: false,
                supports_quoted_messages: true,
                delete_time_limit_minutes: None,
                reply_format: ReplyFormat::Quote,
            }
        }
        ChannelKind::Messenger | ChannelKind::Instagram | ChannelKind::Tiktok => {
            ChannelCapabilities {
                supports_reply: true,
                supports_delete: false,
                supports_quoted_messages: false,
                delete_time_limit_minutes: None,
                reply_format: ReplyFormat::Mention,
            }
        }
        ChannelKind::Email | ChannelKind::Sms | ChannelKind::Webchat => ChannelCapabilities {
            supports_reply: true,
            supports_delete: false,
            supports_quoted_messages: false,
            delete_time_limit_minutes: None,
            reply_format: ReplyFormat::Thread,
        },
    }
}

/// Capabilities looked up by wire name.
///
/// Unknown names return [`ChannelCapabilities::disabled`] rather than an
/// error so callers probing arbitrary strings get a safe answer.
#[must_use]
pub fn capabilities_for(kind: &str) -> ChannelCapabilities {
    ChannelKind::from_str(kind).map_or_else(|_| ChannelCapabilities::disabled(), capabilities)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_kind_is_fully_disabled() {
        for unknown in ["telegram", "discord", "", "WhatsApp"] {
            let caps = capabilities_for(unknown);
            assert!(!caps.supports_reply);
            assert!(!caps.supports_delete);
            assert!(!caps.supports_quoted_messages);
            assert_eq!(caps.delete_time_limit_minutes, None);
        }
    }

    #[test]
    fn test_only_unofficial_whatsapp_deletes() {
        for kind in ChannelKind::ALL {
            let caps = capabilities(kind);
            assert_eq!(caps.supports_delete, kind == ChannelKind::Whatsapp);
        }
        assert_eq!(
            capabilities(ChannelKind::Whatsapp).delete_time_limit_minutes,
            Some(4320)
        );
    }

    #[test]
    fn test_every_kind_supports_reply() {
        for kind in ChannelKind::ALL {
            assert!(capabilities(kind).supports_reply, "{kind} must reply");
        }
    }

    #[test]
    fn test_reply_formats() {
        assert_eq!(
            capabilities(ChannelKind::WhatsappTwilio).reply_format,
            ReplyFormat::Quote
        );
        assert_eq!(
            capabilities(ChannelKind::Messenger).reply_format,
            ReplyFormat::Mention
        );
        assert_eq!(
            capabilities(ChannelKind::Email).reply_format,
            ReplyFormat::Thread
        );
        assert_eq!(
            capabilities(ChannelKind::Webchat).reply_format,
            ReplyFormat::Thread
        );
    }

    #[test]
    fn test_string_lookup_matches_enum() {
        assert_eq!(
            capabilities_for("whatsapp_twilio"),
            capabilities(ChannelKind::WhatsappTwilio)
        );
    }
}
