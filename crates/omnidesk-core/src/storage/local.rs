//! Sled-backed store for single-node deployments.

use std::path::Path;

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;

use super::{
    ConnectionPatch, ConversationPatch, MessagePatch, StorageError, StoreFacade, build_contact,
    build_conversation, build_message, contact_key, conversation_key, setting_key,
};
use crate::types::{
    ChannelConnection, ChannelKind, CompanyId, ConnectionId, Contact, ContactId, Conversation,
    ConversationId, ConversationPeer, IdentifierKind, Message, MessageId, NewContact,
    NewConversation, NewMessage, User, UserId,
};

/// Local store backed by sled trees, one tree per record type plus
/// secondary-index trees for the lookups the facade exposes.
pub struct LocalStore {
    db: sled::Db,
    connections: sled::Tree,
    conversations: sled::Tree,
    contacts: sled::Tree,
    messages: sled::Tree,
    users: sled::Tree,
    settings: sled::Tree,
    // identity key -> contact id
    contacts_by_key: sled::Tree,
    // "contact|connection" -> conversation id
    conversations_by_contact: sled::Tree,
    // provider external id -> message id
    messages_by_external: sled::Tree,
}

impl LocalStore {
    /// Open or create a store at `path`.
    ///
    /// # Errors
    ///
    /// Returns error if the database cannot be opened.
    pub fn open(path: &Path) -> Result<Self, StorageError> {
        let db = sled::open(path)?;
        Ok(Self {
            connections: db.open_tree("connections")?,
            conversations: db.open_tree("conversations")?,
            contacts: db.open_tree("contacts")?,
            messages: db.open_tree("messages")?,
            users: db.open_tree("users")?,
            settings: db.open_tree("settings")?,
            contacts_by_key: db.open_tree("contacts_by_key")?,
            conversations_by_contact: db.open_tree("conversations_by_contact")?,
            messages_by_external: db.open_tree("messages_by_external")?,
            db,
        })
    }

    /// Flush all pending writes to disk.
    ///
    /// # Errors
    ///
    /// Returns error if the flush fails.
    pub fn flush(&self) -> Result<(), StorageError> {
        self.db.flush()?;
        Ok(())
    }

    fn get<T: DeserializeOwned>(tree: &sled::Tree, key: &str) -> Result<Option<T>, StorageError> {
        match tree.get(key.as_bytes())? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    fn put<T: Serialize>(tree: &sled::Tree, key: &str, value: &T) -> Result<(), StorageError> {
        tree.insert(key.as_bytes(), serde_json::to_vec(value)?)?;
        Ok(())
    }

    fn index_get(tree: &sled::Tree, key: &str) -> Result<Option<String>, StorageError> {
        Ok(tree
            .get(key.as_bytes())?
            .map(|v| String::from_utf8_lossy(&v).into_owned()))
    }
}

#[async_trait]
impl StoreFacade for LocalStore {
    async fn conversation(
        &self,
        id: &ConversationId,
    ) -> Result<Option<Conversation>, StorageError> {
        Self::get(&self.conversations, id.as_ref())
    }

    async fn channel_connection(
        &self,
        id: &ConnectionId,
    ) -> Result<Option<ChannelConnection>, StorageError> {
        Self::get(&self.connections, id.as_ref())
    }

    async fn connections_by_kind(
        &self,
        kind: ChannelKind,
    ) -> Result<Vec<ChannelConnection>, StorageError> {
        let mut found = Vec::new();
        for row in self.connections.iter() {
            let (_, bytes) = row?;
            let connection: ChannelConnection = serde_json::from_slice(&bytes)?;
            if connection.kind == kind {
                found.push(connection);
            }
        }
        Ok(found)
    }

    async fn create_channel_connection(
        &self,
        connection: ChannelConnection,
    ) -> Result<(), StorageError> {
        Self::put(&self.connections, connection.id.as_ref(), &connection)
    }

    async fn update_channel_connection(
        &self,
        id: &ConnectionId,
        patch: ConnectionPatch,
    ) -> Result<(), StorageError> {
        let mut connection: ChannelConnection = Self::get(&self.connections, id.as_ref())?
            .ok_or_else(|| StorageError::NotFound(format!("connection {id}")))?;
        if let Some(status) = patch.status {
            connection.status = status;
        }
        if let Some(data) = patch.data {
            connection.kind = data.kind();
            connection.data = data;
        }
        Self::put(&self.connections, id.as_ref(), &connection)
    }

    async fn contact(&self, id: &ContactId) -> Result<Option<Contact>, StorageError> {
        Self::get(&self.contacts, id.as_ref())
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
        let key = contact_key(company_id, identifier, kind);
        match Self::index_get(&self.contacts_by_key, &key)? {
            Some(contact_id) => Self::get(&self.contacts, &contact_id),
            None => Ok(None),
        }
    }

    async fn get_or_create_contact(&self, new: NewContact) -> Result<Contact, StorageError> {
        let key = contact_key(&new.company_id, &new.identifier, new.identifier_kind);
        if let Some(existing) = self
            .contact_by_identifier(&new.company_id, &new.identifier, new.identifier_kind)
            .await?
        {
            return Ok(existing);
        }
        let contact = build_contact(new);
        Self::put(&self.contacts, contact.id.as_ref(), &contact)?;
        self.contacts_by_key
            .insert(key.as_bytes(), contact.id.as_ref().as_bytes())?;
        Ok(contact)
    }

    async fn conversation_for_contact(
        &self,
        contact_id: &ContactId,
        channel_id: &ConnectionId,
    ) -> Result<Option<Conversation>, StorageError> {
        let key = conversation_key(contact_id, channel_id);
        match Self::index_get(&self.conversations_by_contact, &key)? {
            Some(conversation_id) => Self::get(&self.conversations, &conversation_id),
            None => Ok(None),
        }
    }

    async fn create_conversation(
        &self,
        new: NewConversation,
    ) -> Result<Conversation, StorageError> {
        let conversation = build_conversation(new);
        Self::put(&self.conversations, conversation.id.as_ref(), &conversation)?;
        if let ConversationPeer::Contact { contact_id } = &conversation.peer {
            let key = conversation_key(contact_id, &conversation.channel_id);
            self.conversations_by_contact
                .insert(key.as_bytes(), conversation.id.as_ref().as_bytes())?;
        }
        Ok(conversation)
    }

    async fn update_conversation(
        &self,
        id: &ConversationId,
        patch: ConversationPatch,
    ) -> Result<(), StorageError> {
        let mut conversation: Conversation = Self::get(&self.conversations, id.as_ref())?
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
        Self::put(&self.conversations, id.as_ref(), &conversation)
    }

    async fn create_message(&self, new: NewMessage) -> Result<Message, StorageError> {
        let message = build_message(new);
        Self::put(&self.messages, message.id.as_ref(), &message)?;
        if let Some(external_id) = &message.external_id {
            self.messages_by_external
                .insert(external_id.as_bytes(), message.id.as_ref().as_bytes())?;
        }
        Ok(message)
    }

    async fn message(&self, id: &MessageId) -> Result<Option<Message>, StorageError> {
        Self::get(&self.messages, id.as_ref())
    }

    async fn message_by_external_id(
        &self,
        external_id: &str,
    ) -> Result<Option<Message>, StorageError> {
        match Self::index_get(&self.messages_by_external, external_id)? {
            Some(message_id) => Self::get(&self.messages, &message_id),
            None => Ok(None),
        }
    }

    async fn update_message(
        &self,
        id: &MessageId,
        patch: MessagePatch,
    ) -> Result<(), StorageError> {
        let mut message: Message = Self::get(&self.messages, id.as_ref())?
            .ok_or_else(|| StorageError::NotFound(format!("message {id}")))?;
        if let Some(status) = patch.status {
            message.status = status;
        }
        Self::put(&self.messages, id.as_ref(), &message)
    }

    async fn delete_message(&self, id: &MessageId) -> Result<(), StorageError> {
        if let Some(message) = self.message(id).await? {
            if let Some(external_id) = &message.external_id {
                self.messages_by_external.remove(external_id.as_bytes())?;
            }
        }
        self.messages.remove(id.as_ref().as_bytes())?;
        Ok(())
    }

    async fn company_setting(
        &self,
        company_id: &CompanyId,
        key: &str,
    ) -> Result<Option<String>, StorageError> {
        Self::index_get(&self.settings, &setting_key(company_id, key))
    }

    async fn set_company_setting(
        &self,
        company_id: &CompanyId,
        key: &str,
        value: &str,
    ) -> Result<(), StorageError> {
        self.settings
            .insert(setting_key(company_id, key).as_bytes(), value.as_bytes())?;
        Ok(())
    }

    async fn user(&self, id: &UserId) -> Result<Option<User>, StorageError> {
        Self::get(&self.users, id.as_ref())
    }

    async fn create_user(&self, user: User) -> Result<(), StorageError> {
        Self::put(&self.users, user.id.as_ref(), &user)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ChannelKind, ConnectionData, ConnectionStatus};
    use tempfile::tempdir;

    fn webchat_connection(id: &str, company: &str) -> ChannelConnection {
        ChannelConnection {
            id: ConnectionId::new(id),
            company_id: CompanyId::new(company),
            kind: ChannelKind::Webchat,
            status: ConnectionStatus::Active,
            data: ConnectionData::Webchat {
                widget_token: Some("tok".to_string()),
                site_name: None,
            },
        }
    }

    #[tokio::test]
    async fn test_connection_round_trip() {
        let temp = tempdir().unwrap();
        let store = LocalStore::open(temp.path()).unwrap();

        store
            .create_channel_connection(webchat_connection("conn1", "co1"))
            .await
            .unwrap();

        let loaded = store
            .channel_connection(&ConnectionId::new("conn1"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(loaded.kind, ChannelKind::Webchat);

        let by_kind = store
            .connections_by_kind(ChannelKind::Webchat)
            .await
            .unwrap();
        assert_eq!(by_kind.len(), 1);
        assert!(
            store
                .connections_by_kind(ChannelKind::Sms)
                .await
                .unwrap()
                .is_empty()
        );
    }

    #[tokio::test]
    async fn test_get_or_create_contact_is_idempotent() {
        let temp = tempdir().unwrap();
        let store = LocalStore::open(temp.path()).unwrap();

        let new = NewContact {
            company_id: CompanyId::new("co1"),
            identifier: "sess-1".to_string(),
            identifier_kind: IdentifierKind::Webchat,
            name: None,
            email: None,
            phone: None,
        };

        let first = store.get_or_create_contact(new.clone()).await.unwrap();
        let second = store.get_or_create_contact(new).await.unwrap();
        assert_eq!(first.id, second.id);
    }

    #[tokio::test]
    async fn test_message_external_id_lookup() {
        let temp = tempdir().unwrap();
        let store = LocalStore::open(temp.path()).unwrap();

        let mut new = NewMessage::inbound_text(ConversationId::new("cv1"), "hello");
        new.external_id = Some("SM123".to_string());
        let message = store.create_message(new).await.unwrap();

        let found = store
            .message_by_external_id("SM123")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.id, message.id);

        store.delete_message(&message.id).await.unwrap();
        assert!(store.message_by_external_id("SM123").await.unwrap().is_none());
        assert!(store.message(&message.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_conversation_index_and_patch() {
        let temp = tempdir().unwrap();
        let store = LocalStore::open(temp.path()).unwrap();

        let contact = store
            .get_or_create_contact(NewContact {
                company_id: CompanyId::new("co1"),
                identifier: "15551234567".to_string(),
                identifier_kind: IdentifierKind::Phone,
                name: None,
                email: None,
                phone: Some("15551234567".to_string()),
            })
            .await
            .unwrap();

        let conversation = store
            .create_conversation(NewConversation {
                company_id: CompanyId::new("co1"),
                channel_id: ConnectionId::new("conn1"),
                kind: ChannelKind::WhatsappTwilio,
                peer: ConversationPeer::Contact {
                    contact_id: contact.id.clone(),
                },
            })
            .await
            .unwrap();

        let found = store
            .conversation_for_contact(&contact.id, &ConnectionId::new("conn1"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.id, conversation.id);

        let now = chrono::Utc::now();
        store
            .update_conversation(
                &conversation.id,
                ConversationPatch {
                    last_message_at: Some(now),
                    ..ConversationPatch::default()
                },
            )
            .await
            .unwrap();
        let updated = store.conversation(&conversation.id).await.unwrap().unwrap();
        assert_eq!(updated.last_message_at, Some(now));
    }

    #[tokio::test]
    async fn test_settings_round_trip() {
        let temp = tempdir().unwrap();
        let store = LocalStore::open(temp.path()).unwrap();
        let company = CompanyId::new("co1");

        assert!(
            store
                .company_setting(&company, "inbox_agent_signature_enabled")
                .await
                .unwrap()
                .is_none()
        );
        store
            .set_company_setting(&company, "inbox_agent_signature_enabled", "false")
            .await
            .unwrap();
        assert_eq!(
            store
                .company_setting(&company, "inbox_agent_signature_enabled")
                .await
                .unwrap()
                .as_deref(),
            Some("false")
        );
    }
}
