//! # Omnidesk Core
//!
//! Core types and seams for the Omnidesk omnichannel inbox.
//!
//! This crate provides:
//! - The canonical conversation/contact/message model over heterogeneous
//!   messaging providers
//! - The per-channel capability table
//! - The async storage facade plus sled-backed and in-memory stores
//! - Broadcast event shapes and the fire-and-forget publisher seam
//! - The automation (flow executor) handoff seam
//! - Secret wrappers and inbound content sanitization

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod broadcast;
pub mod capabilities;
pub mod config;
pub mod hooks;
pub mod secrets;
pub mod storage;
pub mod types;
pub mod validation;

pub use broadcast::{EventEnvelope, EventPublisher, InboxEvent, NullPublisher, Scope};
pub use capabilities::{ChannelCapabilities, ReplyFormat, capabilities, capabilities_for};
pub use config::{Config, ConfigError};
pub use hooks::{AutomationHook, NullHook};
pub use secrets::{ApiKey, scrub_secrets};
pub use storage::{LocalStore, MemoryStore, StorageError, StoreFacade};
pub use types::{ChannelConnection, ChannelKind, Contact, Conversation, Message};
pub use validation::sanitize_content;

/// Commonly used types, re-exported for adapter and gateway code.
pub mod prelude {
    pub use crate::broadcast::{EventPublisher, InboxEvent, Scope};
    pub use crate::capabilities::{ChannelCapabilities, capabilities};
    pub use crate::hooks::AutomationHook;
    pub use crate::storage::{StorageError, StoreFacade};
    pub use crate::types::*;
}
