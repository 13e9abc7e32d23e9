//! In-memory store for tests and embedded use.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use super::{
    ConnectionPatch, ConversationPatch, MessagePatch, StorageError, StoreFacade, build_contact,
    build_conversation, build_message, contact_key, conversation_key, setting_key,
};
use crate::types::{
    ChannelConnection, ChannelKind, CompanyId, ConnectionId, Contact, ContactId, Conversation,
    ConversationId, ConversationPeer, IdentifierKind, Message, MessageId, NewContact,
    NewConversation, NewMessage, User, UserId,
};

#[derive(Default)]
struct Inner {
    connections: HashMap<String, ChannelConnection>,
    conversations: HashMap<String, Conversation>,
    contacts: HashMap<String, Contact>,
    messages: HashMap<String, Message>,
    users: HashMap<String, User>,
    settings: HashMap<String, String>,
    contacts_by_key: HashMap<String, String>,
    conversations_by_contact: HashMap<String, String>,
    messages_by_external: HashMap<String, String>,
}

/// Hash-map store with the same semantics as [`super::LocalStore`].
///
/// The mutex is never held across an await point.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored messages; test aid for "no persistence happened"
    /// assertions.
    #[must_use]
    pub fn message_count(&self) -> usize {
        self.lock().messages.len()
    }

    /// Number of stored contacts; test aid for idempotence assertions.
    #[must_use]
    pub fn contact_count(&self) -> usize {
        self.lock().contacts.len()
    }

    /// Number of stored conversations.
    #[must_use]
    pub fn conversation_count(&self) -> usize {
        self.lock().conversations.len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        // A poisoned map is still a usable map.
        self.inner
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

#[async_trait]
impl StoreFacade for MemoryStore {
    async fn conversation(
        &self,
        id: &ConversationId,
    ) -> Result<Option<Conversation>, StorageError> {
        Ok(self.lock().conversations.get(id.as_ref()).cloned())
    }

    async fn channel_connection(
        &self,
        id: &ConnectionId,
    ) -> Result<Option<ChannelConnection>, StorageError> {
        Ok(self.lock().connections.get(id.as_ref()).cloned())
    }

    async fn connections_by_kind(
        &self,
        kind: ChannelKind,
    ) -> Result<Vec<ChannelConnection>, StorageError> {
        Ok(self
            .lock()
            .connections
            .values()
            .filter(|c| c.kind == kind)
            .cloned()
            .collect())
    }

    async fn create_channel_connection(
        &self,
        connection: ChannelConnection,
    ) -> Result<(), StorageError> {
        self.lock()
            .connections
            .insert(connection.id.as_ref().to_string(), connection);
        Ok(())
    }

    async fn update_channel_connection(
        &self,
        id: &ConnectionId,
        patch: ConnectionPatch,
    ) -> Result<(), StorageError> {
        let mut inner = self.lock();
        let connection = inner
            .connections
            .get_mut(id.as_ref())
            .ok_or_else(|| StorageError::NotFound(format!("connection {id}")))?;
        if let Some(status) = patch.status {
            connection.status = status;
        }
        if let Some(data) = patch.data {
            connection.kind = data.kind();
            connection.data = data;
        }
        Ok(())
    }

    async fn contact(&self, id: &ContactId) -> Result<Option<Contact>, StorageError> {
        Ok(self.lock().contacts.get(id.as_ref()).cloned())
    }

    async fn contact_by_phone(
        &self,
        company_id: &CompanyId,
        phone: &str,
    ) -> Result<Option<Contact>, StorageError> {
        self.contact_by_identifier(company_id, phone, IdentifierKind::Phone)
            .await
    }

    async fn contact_by_identifier(
        &self,
        company_id: &CompanyId,
        identifier: &str,
        kind: IdentifierKind,
    ) -> Result<Option<Contact>, StorageError> {
        let inner = self.lock();
        Ok(inner
            .contacts_by_key
            .get(&contact_key(company_id, identifier, kind))
            .and_then(|id| inner.contacts.get(id))
            .cloned())
    }

    async fn get_or_create_contact(&self, new: NewContact) -> Result<Contact, StorageError> {
        let key = contact_key(&new.company_id, &new.identifier, new.identifier_kind);
        let mut inner = self.lock();
        if let Some(existing) = inner
            .contacts_by_key
            .get(&key)
            .and_then(|id| inner.contacts.get(id))
        {
            return Ok(existing.clone());
        }
        let contact = build_contact(new);
        inner
            .contacts_by_key
            .insert(key, contact.id.as_ref().to_string());
        inner
            .contacts
            .insert(contact.id.as_ref().to_string(), contact.clone());
        Ok(contact)
    }

    async fn conversation_for_contact(
        &self,
        contact_id: &ContactId,
        channel_id: &ConnectionId,
    ) -> Result<Option<Conversation>, StorageError> {
        let inner = self.lock();
        Ok(inner
            .conversations_by_contact
            .get(&conversation_key(contact_id, channel_id))
            .and_then(|id| inner.conversations.get(id))
            .cloned())
    }

    async fn create_conversation(
        &self,
        new: NewConversation,
    ) -> Result<Conversation, StorageError> {
        let conversation = build_conversation(new);
        let mut inner = self.lock();
        if let ConversationPeer::Contact { contact_id } = &conversation.peer {
            inner.conversations_by_contact.insert(
                conversation_key(contact_id, &conversation.channel_id),
                conversation.id.as_ref().to_string(),
            );
        }
        inner
            .conversations
            .insert(conversation.id.as_ref().to_string(), conversation.clone());
        Ok(conversation)
    }

    async fn update_conversation(
        &self,
        id: &ConversationId,
        patch: ConversationPatch,
    ) -> Result<(), StorageError> {
        let mut inner = self.lock();
        let conversation = inner
            .conversations
            .get_mut(id.as_ref())
            .ok_or_else(|| StorageError::NotFound(format!("conversation {id}")))?;
        if let Some(status) = patch.status {
            conversation.status = status;
        }
        if let Some(at) = patch.last_message_at {
            conversation.last_message_at = Some(at);
        }
        if let Some(muted) = patch.bot_disabled {
            conversation.bot_disabled = muted;
        }
        Ok(())
    }

    async fn create_message(&self, new: NewMessage) -> Result<Message, StorageError> {
        let message = build_message(new);
        let mut inner = self.lock();
        if let Some(external_id) = &message.external_id {
            inner
                .messages_by_external
                .insert(external_id.clone(), message.id.as_ref().to_string());
        }
        inner
            .messages
            .insert(message.id.as_ref().to_string(), message.clone());
        Ok(message)
    }

    async fn message(&self, id: &MessageId) -> Result<Option<Message>, StorageError> {
        Ok(self.lock().messages.get(id.as_ref()).cloned())
    }

    async fn message_by_external_id(
        &self,
        external_id: &str,
    ) -> Result<Option<Message>, StorageError> {
        let inner = self.lock();
        Ok(inner
            .messages_by_external
            .get(external_id)
            .and_then(|id| inner.messages.get(id))
            .cloned())
    }

    async fn update_message(
        &self,
        id: &MessageId,
        patch: MessagePatch,
    ) -> Result<(), StorageError> {
        let mut inner = self.lock();
        let message = inner
            .messages
            .get_mut(id.as_ref())
            .ok_or_else(|| StorageError::NotFound(format!("message {id}")))?;
        if let Some(status) = patch.status {
            message.status = status;
        }
        Ok(())
    }

    async fn delete_message(&self, id: &MessageId) -> Result<(), StorageError> {
        let mut inner = self.lock();
        if let Some(message) = inner.messages.remove(id.as_ref()) {
            if let Some(external_id) = &message.external_id {
                inner.messages_by_external.remove(external_id);
            }
        }
        Ok(())
    }

    async fn company_setting(
        &self,
        company_id: &CompanyId,
        key: &str,
    ) -> Result<Option<String>, StorageError> {
        Ok(self.lock().settings.get(&setting_key(company_id, key)).cloned())
    }

    async fn set_company_setting(
        &self,
        company_id: &CompanyId,
        key: &str,
        value: &str,
    ) -> Result<(), StorageError> {
        self.lock()
            .settings
            .insert(setting_key(company_id, key), value.to_string());
        Ok(())
    }

    async fn user(&self, id: &UserId) -> Result<Option<User>, StorageError> {
        Ok(self.lock().users.get(id.as_ref()).cloned())
    }

    async fn create_user(&self, user: User) -> Result<(), StorageError> {
        self.lock().users.insert(user.id.as_ref().to_string(), user);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_contact_idempotence() {
        let store = MemoryStore::new();
        let new = NewContact {
            company_id: CompanyId::new("co1"),
            identifier: "sess-9".to_string(),
            identifier_kind: IdentifierKind::Webchat,
            name: None,
            email: None,
            phone: None,
        };
        let a = store.get_or_create_contact(new.clone()).await.unwrap();
        let b = store.get_or_create_contact(new).await.unwrap();
        assert_eq!(a.id, b.id);
        assert_eq!(store.contact_count(), 1);
    }
}
