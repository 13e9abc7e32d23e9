//! Storage facade.
//!
//! Persistence is an external collaborator: the channel core only consumes
//! the async [`StoreFacade`] interface. Two implementations ship with the
//! workspace: a sled-backed [`LocalStore`] for single-node deployments and
//! an in-memory [`MemoryStore`] for tests and embedding.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::types::{
    ChannelConnection, ChannelKind, CompanyId, ConnectionData, ConnectionId, ConnectionStatus,
    Contact, ContactId, Conversation, ConversationId, ConversationStatus, IdentifierKind, Message,
    MessageId, MessageStatus, NewContact, NewConversation, NewMessage, User, UserId,
};

mod local;
mod memory;

pub use local::LocalStore;
pub use memory::MemoryStore;

/// Storage errors.
#[derive(Error, Debug)]
pub enum StorageError {
    /// Underlying storage engine failed.
    #[error("Storage error: {0}")]
    Backend(String),

    /// Row serialization failed.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Referenced row does not exist.
    #[error("Not found: {0}")]
    NotFound(String),
}

impl From<sled::Error> for StorageError {
    fn from(e: sled::Error) -> Self {
        Self::Backend(e.to_string())
    }
}

/// Partial update for a channel connection.
#[derive(Debug, Clone, Default)]
pub struct ConnectionPatch {
    /// New status, if changing.
    pub status: Option<ConnectionStatus>,
    /// New provider configuration, if changing (token rotation etc.).
    pub data: Option<ConnectionData>,
}

/// Partial update for a conversation.
#[derive(Debug, Clone, Default)]
pub struct ConversationPatch {
    /// New status, if changing.
    pub status: Option<ConversationStatus>,
    /// New last-message timestamp, if changing.
    pub last_message_at: Option<DateTime<Utc>>,
    /// New automation mute flag, if changing.
    pub bot_disabled: Option<bool>,
}

/// Partial update for a message; only status and read time ever mutate.
#[derive(Debug, Clone, Default)]
pub struct MessagePatch {
    /// New delivery status, if changing.
    pub status: Option<MessageStatus>,
}

/// The async persistence interface the channel core consumes.
///
/// Implementations must make [`StoreFacade::get_or_create_contact`]
/// idempotent on `(company_id, identifier, identifier_kind)`.
#[async_trait]
pub trait StoreFacade: Send + Sync {
    /// Load a conversation by id.
    async fn conversation(
        &self,
        id: &ConversationId,
    ) -> Result<Option<Conversation>, StorageError>;

    /// Load a channel connection by id.
    async fn channel_connection(
        &self,
        id: &ConnectionId,
    ) -> Result<Option<ChannelConnection>, StorageError>;

    /// All connections of one kind, across tenants.
    async fn connections_by_kind(
        &self,
        kind: ChannelKind,
    ) -> Result<Vec<ChannelConnection>, StorageError>;

    /// Create a connection (admin surface; the core mutates but never
    /// creates connections outside tests).
    async fn create_channel_connection(
        &self,
        connection: ChannelConnection,
    ) -> Result<(), StorageError>;

    /// Apply a partial update to a connection.
    async fn update_channel_connection(
        &self,
        id: &ConnectionId,
        patch: ConnectionPatch,
    ) -> Result<(), StorageError>;

    /// Load a contact by id.
    async fn contact(&self, id: &ContactId) -> Result<Option<Contact>, StorageError>;

    /// Look up a contact by normalized phone digits within a tenant.
    async fn contact_by_phone(
        &self,
        company_id: &CompanyId,
        phone: &str,
    ) -> Result<Option<Contact>, StorageError>;

    /// Look up a contact by its tenant-scoped identity key.
    async fn contact_by_identifier(
        &self,
        company_id: &CompanyId,
        identifier: &str,
        kind: IdentifierKind,
    ) -> Result<Option<Contact>, StorageError>;

    /// Fetch or create the contact for an identity key.
    async fn get_or_create_contact(&self, new: NewContact) -> Result<Contact, StorageError>;

    /// The conversation between a contact and a connection, if one exists.
    async fn conversation_for_contact(
        &self,
        contact_id: &ContactId,
        channel_id: &ConnectionId,
    ) -> Result<Option<Conversation>, StorageError>;

    /// Create a conversation.
    async fn create_conversation(
        &self,
        new: NewConversation,
    ) -> Result<Conversation, StorageError>;

    /// Apply a partial update to a conversation.
    async fn update_conversation(
        &self,
        id: &ConversationId,
        patch: ConversationPatch,
    ) -> Result<(), StorageError>;

    /// Persist a message.
    async fn create_message(&self, new: NewMessage) -> Result<Message, StorageError>;

    /// Load a message by id.
    async fn message(&self, id: &MessageId) -> Result<Option<Message>, StorageError>;

    /// Load a message by its provider-native id.
    async fn message_by_external_id(
        &self,
        external_id: &str,
    ) -> Result<Option<Message>, StorageError>;

    /// Apply a partial update to a message.
    async fn update_message(
        &self,
        id: &MessageId,
        patch: MessagePatch,
    ) -> Result<(), StorageError>;

    /// Remove a message row.
    async fn delete_message(&self, id: &MessageId) -> Result<(), StorageError>;

    /// Read a tenant setting value.
    async fn company_setting(
        &self,
        company_id: &CompanyId,
        key: &str,
    ) -> Result<Option<String>, StorageError>;

    /// Write a tenant setting value.
    async fn set_company_setting(
        &self,
        company_id: &CompanyId,
        key: &str,
        value: &str,
    ) -> Result<(), StorageError>;

    /// Load an agent user.
    async fn user(&self, id: &UserId) -> Result<Option<User>, StorageError>;

    /// Create an agent user (admin surface).
    async fn create_user(&self, user: User) -> Result<(), StorageError>;
}

pub(crate) fn contact_key(company_id: &CompanyId, identifier: &str, kind: IdentifierKind) -> String {
    format!("{}|{}|{}", company_id.as_ref(), kind.as_str(), identifier)
}

pub(crate) fn conversation_key(contact_id: &ContactId, channel_id: &ConnectionId) -> String {
    format!("{}|{}", contact_id.as_ref(), channel_id.as_ref())
}

pub(crate) fn setting_key(company_id: &CompanyId, key: &str) -> String {
    format!("{}|{}", company_id.as_ref(), key)
}

pub(crate) fn build_contact(new: NewContact) -> Contact {
    Contact {
        id: ContactId::generate(),
        company_id: new.company_id,
        identifier: new.identifier,
        identifier_kind: new.identifier_kind,
        name: new.name,
        email: new.email,
        phone: new.phone,
        created_at: Utc::now(),
    }
}

pub(crate) fn build_conversation(new: NewConversation) -> Conversation {
    Conversation {
        id: ConversationId::generate(),
        company_id: new.company_id,
        channel_id: new.channel_id,
        kind: new.kind,
        peer: new.peer,
        status: ConversationStatus::Open,
        last_message_at: None,
        bot_disabled: false,
        created_at: Utc::now(),
    }
}

pub(crate) fn build_message(new: NewMessage) -> Message {
    Message {
        id: MessageId::generate(),
        conversation_id: new.conversation_id,
        direction: new.direction,
        kind: new.kind,
        content: new.content,
        media_url: new.media_url,
        status: new.status,
        external_id: new.external_id,
        metadata: new.metadata,
        sender_kind: new.sender_kind,
        sender_id: new.sender_id,
        sent_at: new.sent_at,
        created_at: Utc::now(),
    }
}
