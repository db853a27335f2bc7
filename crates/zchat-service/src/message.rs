use std::sync::Arc;

use tracing::{debug, warn};

use zchat_crypto::ContentCipher;
use zchat_types::api::MessageView;
use zchat_types::models::{
    ConversationId, DeleteMode, MAX_CONTENT_CHARS, Message, MessageId, NewMessage, UserId,
};

use crate::error::{ChatError, ChatResult};
use crate::store::{ConversationStore, MessageStore, UserStore};

/// Knobs for message retention and history paging.
#[derive(Debug, Clone, Copy)]
pub struct MessageConfig {
    /// Messages kept per conversation; 0 keeps everything.
    pub retention_limit: usize,
    pub max_page_size: usize,
}

impl Default for MessageConfig {
    fn default() -> Self {
        Self {
            retention_limit: 1000,
            max_page_size: 200,
        }
    }
}

/// Optional attachment reference carried alongside a message body.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileRef {
    pub path: Option<String>,
    pub kind: Option<String>,
}

impl FileRef {
    pub fn new(path: Option<String>, kind: Option<String>) -> Self {
        Self { path, kind }
    }

    fn is_empty(&self) -> bool {
        self.path.as_deref().is_none_or(|p| p.trim().is_empty())
    }
}

#[derive(Clone)]
pub struct MessageService {
    conversations: Arc<dyn ConversationStore>,
    messages: Arc<dyn MessageStore>,
    users: Arc<dyn UserStore>,
    cipher: Arc<dyn ContentCipher>,
    config: MessageConfig,
}

impl MessageService {
    pub fn new(
        conversations: Arc<dyn ConversationStore>,
        messages: Arc<dyn MessageStore>,
        users: Arc<dyn UserStore>,
        cipher: Arc<dyn ContentCipher>,
        config: MessageConfig,
    ) -> Self {
        Self {
            conversations,
            messages,
            users,
            cipher,
            config,
        }
    }

    pub fn config(&self) -> MessageConfig {
        self.config
    }

    /// Validate, encrypt and store a message, then trim the conversation to
    /// the retention limit.
    pub fn create(
        &self,
        conversation_id: ConversationId,
        sender_id: UserId,
        content: &str,
        file: FileRef,
    ) -> ChatResult<Message> {
        check_length(content)?;
        if content.trim().is_empty() && file.is_empty() {
            return Err(ChatError::validation(
                "message needs content or a file attachment",
            ));
        }

        if self.conversations.get(conversation_id)?.is_none() {
            return Err(ChatError::NotFound("conversation"));
        }
        self.ensure_participant(conversation_id, sender_id)?;

        let message = self.messages.insert(&NewMessage {
            conversation_id,
            sender_id,
            content: self.cipher.encrypt(content)?,
            file_path: file.path,
            file_type: file.kind,
        })?;

        if self.config.retention_limit > 0 {
            let pruned = self
                .messages
                .prune(conversation_id, self.config.retention_limit)?;
            if pruned > 0 {
                debug!(
                    "Retention removed {} old messages from conversation {}",
                    pruned, conversation_id
                );
            }
        }

        Ok(message)
    }

    /// Replace the body of one of the caller's own messages.
    pub fn edit(
        &self,
        message_id: MessageId,
        caller_id: UserId,
        new_content: &str,
    ) -> ChatResult<Message> {
        let message = self.load(message_id)?;
        if message.is_deleted {
            return Err(ChatError::AlreadyDeleted);
        }
        if message.sender_id != caller_id {
            return Err(ChatError::Forbidden("only the sender can edit this message"));
        }
        check_length(new_content)?;
        if new_content.trim().is_empty() && message.file_path.is_none() {
            return Err(ChatError::validation("message content cannot be empty"));
        }

        let ciphertext = self.cipher.encrypt(new_content)?;
        self.messages.update_content(message_id, &ciphertext)?;

        Ok(Message {
            content: ciphertext,
            is_edited: true,
            ..message
        })
    }

    /// `ForEveryone` tombstones the message for all participants and is only
    /// open to the sender. `ForMe` hides it from the caller alone.
    pub fn delete(
        &self,
        message_id: MessageId,
        caller_id: UserId,
        mode: DeleteMode,
    ) -> ChatResult<Message> {
        let message = self.load(message_id)?;

        match mode {
            DeleteMode::ForEveryone => {
                if message.sender_id != caller_id {
                    return Err(ChatError::Forbidden(
                        "only the sender can delete this message for everyone",
                    ));
                }
                if !message.is_deleted {
                    self.messages.soft_delete(message_id)?;
                }
                Ok(Message {
                    is_deleted: true,
                    ..message
                })
            }
            DeleteMode::ForMe => {
                self.ensure_participant(message.conversation_id, caller_id)?;
                self.messages.hide_for_user(caller_id, message_id)?;
                Ok(message)
            }
        }
    }

    /// Oldest first. `limit` defaults to, and is clamped at, the configured
    /// page size.
    pub fn list(
        &self,
        conversation_id: ConversationId,
        caller_id: UserId,
        limit: Option<usize>,
    ) -> ChatResult<Vec<Message>> {
        if self.conversations.get(conversation_id)?.is_none() {
            return Err(ChatError::NotFound("conversation"));
        }
        self.ensure_participant(conversation_id, caller_id)?;

        let max = self.config.max_page_size.max(1);
        let limit = limit.unwrap_or(max).clamp(1, max);

        let mut messages = self
            .messages
            .list_for_user(conversation_id, caller_id, limit)?;
        messages.reverse();
        Ok(messages)
    }

    /// Most recent message visible to the caller, if any.
    pub fn latest(
        &self,
        conversation_id: ConversationId,
        caller_id: UserId,
    ) -> ChatResult<Option<Message>> {
        let mut newest = self.messages.list_for_user(conversation_id, caller_id, 1)?;
        Ok(newest.pop())
    }

    pub fn mark_all_read(&self, conversation_id: ConversationId, caller_id: UserId) -> ChatResult<usize> {
        self.ensure_participant(conversation_id, caller_id)?;
        Ok(self.messages.mark_all_read(conversation_id, caller_id)?)
    }

    /// Client-facing view: decrypted body, sender username resolved.
    ///
    /// A body that fails to decrypt is served as stored and logged, so one
    /// bad row never breaks a history page. Deleted messages render empty.
    pub fn to_view(&self, message: &Message) -> ChatResult<MessageView> {
        let content = if message.is_deleted {
            String::new()
        } else {
            match self.cipher.decrypt(&message.content) {
                Ok(plain) => plain,
                Err(e) => {
                    warn!("Serving message {} undecrypted: {}", message.id, e);
                    message.content.clone()
                }
            }
        };

        let sender_username = self
            .users
            .get_username(message.sender_id)?
            .unwrap_or_else(|| "unknown".to_string());

        Ok(MessageView {
            id: message.id,
            conversation_id: message.conversation_id,
            sender_id: message.sender_id,
            sender_username,
            content,
            created_at: message.created_at,
            file_path: message.file_path.clone(),
            file_type: message.file_type.clone(),
            is_deleted: message.is_deleted,
            is_edited: message.is_edited,
            is_read: message.is_read,
        })
    }

    pub fn to_views(&self, messages: &[Message]) -> ChatResult<Vec<MessageView>> {
        messages.iter().map(|m| self.to_view(m)).collect()
    }

    fn load(&self, message_id: MessageId) -> ChatResult<Message> {
        self.messages
            .get(message_id)?
            .ok_or(ChatError::NotFound("message"))
    }

    fn ensure_participant(&self, conversation_id: ConversationId, user_id: UserId) -> ChatResult<()> {
        if self.conversations.is_participant(conversation_id, user_id)? {
            Ok(())
        } else {
            Err(ChatError::Forbidden("not a participant of this conversation"))
        }
    }
}

fn check_length(content: &str) -> ChatResult<()> {
    if content.chars().count() > MAX_CONTENT_CHARS {
        return Err(ChatError::validation(format!(
            "message exceeds {} characters",
            MAX_CONTENT_CHARS
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use zchat_crypto::Encryptor;
    use zchat_db::Database;

    struct Chat {
        db: Arc<Database>,
        svc: MessageService,
        users: Vec<UserId>,
        conv: ConversationId,
    }

    fn chat_with(config: MessageConfig, cipher: Arc<dyn ContentCipher>) -> Chat {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let users: Vec<_> = ["alice", "bob", "eve"]
            .iter()
            .map(|n| db.create_user(n, "h").unwrap().id)
            .collect();
        let (conv, _) = db
            .find_or_create_conversation(&users[..2], false, None)
            .unwrap();
        let svc = MessageService::new(db.clone(), db.clone(), db.clone(), cipher, config);
        Chat {
            db,
            svc,
            users,
            conv: conv.id,
        }
    }

    fn chat(config: MessageConfig) -> Chat {
        chat_with(config, Arc::new(Encryptor::new("test-key", &[]).unwrap()))
    }

    fn text(c: &Chat, sender: UserId, body: &str) -> Message {
        c.svc.create(c.conv, sender, body, FileRef::default()).unwrap()
    }

    #[test]
    fn send_then_list_decrypts_for_the_other_participant() {
        let c = chat(MessageConfig::default());
        let (alice, bob) = (c.users[0], c.users[1]);

        let sent = text(&c, alice, "hi");
        assert_ne!(sent.content, "hi");

        let listed = c.svc.list(c.conv, bob, None).unwrap();
        assert_eq!(listed.len(), 1);
        let view = c.svc.to_view(&listed[0]).unwrap();
        assert_eq!(view.content, "hi");
        assert_eq!(view.sender_id, alice);
        assert_eq!(view.sender_username, "alice");
        assert!(!view.is_edited);
    }

    #[test]
    fn content_rules() {
        let c = chat(MessageConfig::default());
        let alice = c.users[0];

        let too_long = "x".repeat(MAX_CONTENT_CHARS + 1);
        assert!(matches!(
            c.svc.create(c.conv, alice, &too_long, FileRef::default()),
            Err(ChatError::Validation(_))
        ));
        assert!(
            c.svc
                .create(c.conv, alice, &"é".repeat(MAX_CONTENT_CHARS), FileRef::default())
                .is_ok()
        );
        assert!(matches!(
            c.svc.create(c.conv, alice, "  ", FileRef::default()),
            Err(ChatError::Validation(_))
        ));

        let file = FileRef::new(Some("/uploads/a.png".into()), Some("image".into()));
        let with_file = c.svc.create(c.conv, alice, "", file).unwrap();
        assert_eq!(with_file.file_type.as_deref(), Some("image"));
    }

    #[test]
    fn non_participants_are_forbidden() {
        let c = chat(MessageConfig::default());
        let (alice, eve) = (c.users[0], c.users[2]);
        let msg = text(&c, alice, "secret");

        assert!(matches!(
            c.svc.list(c.conv, eve, None),
            Err(ChatError::Forbidden(_))
        ));
        assert!(matches!(
            c.svc.create(c.conv, eve, "hey", FileRef::default()),
            Err(ChatError::Forbidden(_))
        ));
        assert!(matches!(
            c.svc.mark_all_read(c.conv, eve),
            Err(ChatError::Forbidden(_))
        ));
        assert!(matches!(
            c.svc.delete(msg.id, eve, DeleteMode::ForMe),
            Err(ChatError::Forbidden(_))
        ));
        assert!(matches!(
            c.svc.create(c.conv + 10, alice, "hey", FileRef::default()),
            Err(ChatError::NotFound("conversation"))
        ));
    }

    #[test]
    fn edit_is_sender_only_and_blocked_after_delete() {
        let c = chat(MessageConfig::default());
        let (alice, bob) = (c.users[0], c.users[1]);
        let msg = text(&c, alice, "hi");

        assert!(matches!(
            c.svc.edit(msg.id, bob, "hijacked"),
            Err(ChatError::Forbidden(_))
        ));

        let edited = c.svc.edit(msg.id, alice, "hello").unwrap();
        assert!(edited.is_edited);

        let seen_by_bob = c.svc.list(c.conv, bob, None).unwrap();
        let view = c.svc.to_view(&seen_by_bob[0]).unwrap();
        assert_eq!(view.content, "hello");
        assert!(view.is_edited);

        c.svc.delete(msg.id, alice, DeleteMode::ForEveryone).unwrap();
        assert!(matches!(
            c.svc.edit(msg.id, alice, "again"),
            Err(ChatError::AlreadyDeleted)
        ));
        assert!(matches!(
            c.svc.edit(msg.id + 100, alice, "x"),
            Err(ChatError::NotFound("message"))
        ));
    }

    #[test]
    fn delete_for_me_hides_only_for_caller() {
        let c = chat(MessageConfig::default());
        let (alice, bob) = (c.users[0], c.users[1]);
        let msg = text(&c, bob, "hidden soon");
        text(&c, bob, "stays");

        c.svc.delete(msg.id, alice, DeleteMode::ForMe).unwrap();

        let alice_view = c.svc.list(c.conv, alice, None).unwrap();
        assert_eq!(alice_view.len(), 1);
        assert!(alice_view.iter().all(|m| m.id != msg.id));
        assert_eq!(c.svc.list(c.conv, bob, None).unwrap().len(), 2);
    }

    #[test]
    fn delete_for_everyone_tombstones() {
        let c = chat(MessageConfig::default());
        let (alice, bob) = (c.users[0], c.users[1]);
        let msg = text(&c, alice, "oops");

        assert!(matches!(
            c.svc.delete(msg.id, bob, DeleteMode::ForEveryone),
            Err(ChatError::Forbidden(_))
        ));
        c.svc.delete(msg.id, alice, DeleteMode::ForEveryone).unwrap();
        c.svc.delete(msg.id, alice, DeleteMode::ForEveryone).unwrap();

        for user in [alice, bob] {
            let listed = c.svc.list(c.conv, user, None).unwrap();
            let view = c.svc.to_view(&listed[0]).unwrap();
            assert!(view.is_deleted);
            assert!(view.content.is_empty());
        }
    }

    #[test]
    fn retention_keeps_newest() {
        let c = chat(MessageConfig {
            retention_limit: 3,
            max_page_size: 50,
        });
        let alice = c.users[0];
        let sent: Vec<_> = (1..=5).map(|i| text(&c, alice, &format!("m{i}")).id).collect();

        let listed = c.svc.list(c.conv, alice, None).unwrap();
        let ids: Vec<_> = listed.iter().map(|m| m.id).collect();
        assert_eq!(ids, sent[2..].to_vec());
        assert_eq!(c.db.count_messages(c.conv).unwrap(), 3);

        let bodies: Vec<_> = c
            .svc
            .to_views(&listed)
            .unwrap()
            .into_iter()
            .map(|v| v.content)
            .collect();
        assert_eq!(bodies, vec!["m3", "m4", "m5"]);
    }

    #[test]
    fn list_clamps_limit_and_is_chronological() {
        let c = chat(MessageConfig {
            retention_limit: 0,
            max_page_size: 2,
        });
        let alice = c.users[0];
        let sent: Vec<_> = (0..4).map(|i| text(&c, alice, &i.to_string()).id).collect();

        let page: Vec<_> = c
            .svc
            .list(c.conv, alice, Some(500))
            .unwrap()
            .iter()
            .map(|m| m.id)
            .collect();
        assert_eq!(page, vec![sent[2], sent[3]]);
        assert_eq!(c.svc.list(c.conv, alice, Some(1)).unwrap()[0].id, sent[3]);
        assert_eq!(c.db.count_messages(c.conv).unwrap(), 4);
    }

    #[test]
    fn mark_all_read_flags_incoming_only() {
        let c = chat(MessageConfig::default());
        let (alice, bob) = (c.users[0], c.users[1]);
        text(&c, alice, "a");
        text(&c, alice, "b");
        text(&c, bob, "c");

        assert_eq!(c.svc.mark_all_read(c.conv, bob).unwrap(), 2);
        let listed = c.svc.list(c.conv, bob, None).unwrap();
        assert!(listed.iter().filter(|m| m.sender_id == alice).all(|m| m.is_read));
        assert!(listed.iter().filter(|m| m.sender_id == bob).all(|m| !m.is_read));
    }

    #[test]
    fn undecryptable_content_is_served_raw() {
        let c = chat(MessageConfig::default());
        let alice = c.users[0];
        let msg = text(&c, alice, "hi");

        let rotated = MessageService::new(
            c.db.clone(),
            c.db.clone(),
            c.db.clone(),
            Arc::new(Encryptor::new("another-key", &[]).unwrap()),
            MessageConfig::default(),
        );
        let view = rotated.to_view(&msg).unwrap();
        assert_eq!(view.content, msg.content);

        let with_legacy = MessageService::new(
            c.db.clone(),
            c.db.clone(),
            c.db.clone(),
            Arc::new(Encryptor::new("another-key", &["test-key".to_string()]).unwrap()),
            MessageConfig::default(),
        );
        assert_eq!(with_legacy.to_view(&msg).unwrap().content, "hi");
    }
}
