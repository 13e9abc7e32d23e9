//! Adapter registry.
//!
//! One adapter per channel kind, selected by exhaustive match so a new
//! [`ChannelKind`] variant cannot silently fall through a default arm.

use std::sync::Arc;

use omnidesk_core::types::ChannelKind;

use crate::traits::ChannelAdapter;

/// The full adapter set, one per channel kind.
pub struct AdapterRegistry {
    whatsapp: Arc<dyn ChannelAdapter>,
    whatsapp_cloud: Arc<dyn ChannelAdapter>,
    whatsapp_twilio: Arc<dyn ChannelAdapter>,
    dialog360: Arc<dyn ChannelAdapter>,
    messenger: Arc<dyn ChannelAdapter>,
    instagram: Arc<dyn ChannelAdapter>,
    tiktok: Arc<dyn ChannelAdapter>,
    email: Arc<dyn ChannelAdapter>,
    sms: Arc<dyn ChannelAdapter>,
    webchat: Arc<dyn ChannelAdapter>,
}

impl AdapterRegistry {
    /// Build a registry from a complete adapter set.
    #[expect(clippy::too_many_arguments, reason = "one adapter per kind, fixed set")]
    #[must_use]
    pub fn new(
        whatsapp: Arc<dyn ChannelAdapter>,
        whatsapp_cloud: Arc<dyn ChannelAdapter>,
        whatsapp_twilio: Arc<dyn ChannelAdapter>,
        dialog360: Arc<dyn ChannelAdapter>,
        messenger: Arc<dyn ChannelAdapter>,
        instagram: Arc<dyn ChannelAdapter>,
        tiktok: Arc<dyn ChannelAdapter>,
        email: Arc<dyn ChannelAdapter>,
        sms: Arc<dyn ChannelAdapter>,
        webchat: Arc<dyn ChannelAdapter>,
    ) -> Self {
        Self {
            whatsapp,
            whatsapp_cloud,
            whatsapp_twilio,
            dialog360,
            messenger,
            instagram,
            tiktok,
            email,
            sms,
            webchat,
        }
    }

    /// The adapter for a kind.
    #[must_use]
    pub fn get(&self, kind: ChannelKind) -> &Arc<dyn ChannelAdapter> {
        match kind {
            ChannelKind::Whatsapp => &self.whatsapp,
            ChannelKind::WhatsappCloud => &self.whatsapp_cloud,
            ChannelKind::WhatsappTwilio => &self.whatsapp_twilio,
            ChannelKind::Dialog360 => &self.dialog360,
            ChannelKind::Messenger => &self.messenger,
            ChannelKind::Instagram => &self.instagram,
            ChannelKind::Tiktok => &self.tiktok,
            ChannelKind::Email => &self.email,
            ChannelKind::Sms => &self.sms,
            ChannelKind::Webchat => &self.webchat,
        }
    }

    /// Replace the adapter for a kind (tests and alternative providers).
    pub fn set(&mut self, kind: ChannelKind, adapter: Arc<dyn ChannelAdapter>) {
        match kind {
            ChannelKind::Whatsapp => self.whatsapp = adapter,
            ChannelKind::WhatsappCloud => self.whatsapp_cloud = adapter,
            ChannelKind::WhatsappTwilio => self.whatsapp_twilio = adapter,
            ChannelKind::Dialog360 => self.dialog360 = adapter,
            ChannelKind::Messenger => self.messenger = adapter,
            ChannelKind::Instagram => self.instagram = adapter,
            ChannelKind::Tiktok => self.tiktok = adapter,
            ChannelKind::Email => self.email = adapter,
            ChannelKind::Sms => self.sms = adapter,
            ChannelKind::Webchat => self.webchat = adapter,
        }
    }
}
