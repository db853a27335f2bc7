//! Repository seams the services are written against. The SQLite
//! [`Database`] implements all three.

use anyhow::Result;

use zchat_db::Database;
use zchat_types::models::{
    Conversation, ConversationId, Message, MessageId, NewMessage, User, UserId,
};

pub trait UserStore: Send + Sync {
    fn get_user(&self, id: UserId) -> Result<Option<User>>;
    fn get_username(&self, id: UserId) -> Result<Option<String>>;
    fn set_online(&self, id: UserId, online: bool) -> Result<()>;
}

pub trait ConversationStore: Send + Sync {
    /// Atomic lookup-or-create by exact participant set.
    fn find_or_create(
        &self,
        participant_ids: &[UserId],
        is_group: bool,
        name: Option<&str>,
    ) -> Result<(Conversation, bool)>;
    fn get(&self, id: ConversationId) -> Result<Option<Conversation>>;
    fn list_for_user(&self, user_id: UserId) -> Result<Vec<Conversation>>;
    fn is_participant(&self, id: ConversationId, user_id: UserId) -> Result<bool>;
    fn participant_ids(&self, id: ConversationId) -> Result<Vec<UserId>>;
    fn participants(&self, id: ConversationId) -> Result<Vec<User>>;
    fn mark_read(&self, id: ConversationId, user_id: UserId) -> Result<()>;
    fn unread_count(&self, id: ConversationId, user_id: UserId) -> Result<u64>;
}

pub trait MessageStore: Send + Sync {
    fn insert(&self, msg: &NewMessage) -> Result<Message>;
    /// Keep the newest `keep` messages; returns how many were removed.
    fn prune(&self, conversation_id: ConversationId, keep: usize) -> Result<usize>;
    fn get(&self, id: MessageId) -> Result<Option<Message>>;
    fn update_content(&self, id: MessageId, content: &str) -> Result<()>;
    fn soft_delete(&self, id: MessageId) -> Result<()>;
    fn hide_for_user(&self, user_id: UserId, id: MessageId) -> Result<()>;
    /// Newest first, without the user's hidden messages.
    fn list_for_user(
        &self,
        conversation_id: ConversationId,
        user_id: UserId,
        limit: usize,
    ) -> Result<Vec<Message>>;
    fn mark_all_read(&self, conversation_id: ConversationId, reader_id: UserId) -> Result<usize>;
}

impl UserStore for Database {
    fn get_user(&self, id: UserId) -> Result<Option<User>> {
        Database::get_user(self, id)
    }

    fn get_username(&self, id: UserId) -> Result<Option<String>> {
        Database::get_username(self, id)
    }

    fn set_online(&self, id: UserId, online: bool) -> Result<()> {
        Database::set_online(self, id, online)
    }
}

impl ConversationStore for Database {
    fn find_or_create(
        &self,
        participant_ids: &[UserId],
        is_group: bool,
        name: Option<&str>,
    ) -> Result<(Conversation, bool)> {
        self.find_or_create_conversation(participant_ids, is_group, name)
    }

    fn get(&self, id: ConversationId) -> Result<Option<Conversation>> {
        self.get_conversation(id)
    }

    fn list_for_user(&self, user_id: UserId) -> Result<Vec<Conversation>> {
        self.list_conversations_for_user(user_id)
    }

    fn is_participant(&self, id: ConversationId, user_id: UserId) -> Result<bool> {
        Database::is_participant(self, id, user_id)
    }

    fn participant_ids(&self, id: ConversationId) -> Result<Vec<UserId>> {
        Database::participant_ids(self, id)
    }

    fn participants(&self, id: ConversationId) -> Result<Vec<User>> {
        self.list_participants(id)
    }

    fn mark_read(&self, id: ConversationId, user_id: UserId) -> Result<()> {
        self.mark_conversation_read(id, user_id)
    }

    fn unread_count(&self, id: ConversationId, user_id: UserId) -> Result<u64> {
        Database::unread_count(self, id, user_id)
    }
}

impl MessageStore for Database {
    fn insert(&self, msg: &NewMessage) -> Result<Message> {
        self.insert_message(msg)
    }

    fn prune(&self, conversation_id: ConversationId, keep: usize) -> Result<usize> {
        self.prune_messages(conversation_id, keep)
    }

    fn get(&self, id: MessageId) -> Result<Option<Message>> {
        self.get_message(id)
    }

    fn update_content(&self, id: MessageId, content: &str) -> Result<()> {
        self.update_message_content(id, content)
    }

    fn soft_delete(&self, id: MessageId) -> Result<()> {
        self.soft_delete_message(id)
    }

    fn hide_for_user(&self, user_id: UserId, id: MessageId) -> Result<()> {
        self.hide_message_for_user(user_id, id)
    }

    fn list_for_user(
        &self,
        conversation_id: ConversationId,
        user_id: UserId,
        limit: usize,
    ) -> Result<Vec<Message>> {
        self.list_messages_for_user(conversation_id, user_id, limit)
    }

    fn mark_all_read(&self, conversation_id: ConversationId, reader_id: UserId) -> Result<usize> {
        Database::mark_all_read(self, conversation_id, reader_id)
    }
}
