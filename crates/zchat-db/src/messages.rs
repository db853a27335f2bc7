use anyhow::Result;
use rusqlite::{Connection, OptionalExtension, TransactionBehavior, params};
use tracing::debug;

use zchat_types::models::{ConversationId, Message, MessageId, NewMessage, UserId};

use crate::Database;
use crate::models::{MESSAGE_COLUMNS, now, row_to_message};

impl Database {
    /// Store a message and bump the conversation's `updated_at` in the same
    /// transaction. `content` is expected to be ciphertext already.
    pub fn insert_message(&self, msg: &NewMessage) -> Result<Message> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            let ts = now();

            tx.execute(
                "INSERT INTO messages (conversation_id, sender_id, content, file_path, file_type, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    msg.conversation_id,
                    msg.sender_id,
                    msg.content,
                    msg.file_path,
                    msg.file_type,
                    ts
                ],
            )?;
            let id = tx.last_insert_rowid();

            tx.execute(
                "UPDATE conversations SET updated_at = ?2 WHERE id = ?1",
                params![msg.conversation_id, ts],
            )?;

            let message = query_message(&tx, id)?
                .ok_or_else(|| anyhow::anyhow!("Message {} vanished after insert", id))?;
            tx.commit()?;
            Ok(message)
        })
    }

    /// Delete the oldest messages beyond `keep`, together with any per-user
    /// hide markers that point at them. Returns how many messages went away.
    pub fn prune_messages(&self, conversation_id: ConversationId, keep: usize) -> Result<usize> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

            let total: i64 = tx.query_row(
                "SELECT COUNT(*) FROM messages WHERE conversation_id = ?1",
                [conversation_id],
                |row| row.get(0),
            )?;
            let keep = i64::try_from(keep).unwrap_or(i64::MAX);
            let surplus = total - keep;
            if surplus <= 0 {
                return Ok(0);
            }

            const OLDEST: &str = "SELECT id FROM messages
                                  WHERE conversation_id = ?1
                                  ORDER BY created_at ASC, id ASC
                                  LIMIT ?2";

            tx.execute(
                &format!("DELETE FROM user_deleted_messages WHERE message_id IN ({OLDEST})"),
                params![conversation_id, surplus],
            )?;
            let removed = tx.execute(
                &format!("DELETE FROM messages WHERE id IN ({OLDEST})"),
                params![conversation_id, surplus],
            )?;
            tx.commit()?;

            debug!(
                "Pruned {} messages from conversation {} (keeping {})",
                removed, conversation_id, keep
            );
            Ok(removed)
        })
    }

    pub fn get_message(&self, id: MessageId) -> Result<Option<Message>> {
        self.with_conn(|conn| query_message(conn, id))
    }

    /// Replace stored content and flag the message as edited.
    pub fn update_message_content(&self, id: MessageId, content: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE messages SET content = ?2, is_edited = 1 WHERE id = ?1",
                params![id, content],
            )?;
            Ok(())
        })
    }

    pub fn soft_delete_message(&self, id: MessageId) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute("UPDATE messages SET is_deleted = 1 WHERE id = ?1", [id])?;
            Ok(())
        })
    }

    /// Hide a message from one user's view. Repeating is a no-op.
    pub fn hide_message_for_user(&self, user_id: UserId, message_id: MessageId) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT OR IGNORE INTO user_deleted_messages (user_id, message_id, deleted_at)
                 VALUES (?1, ?2, ?3)",
                params![user_id, message_id, now()],
            )?;
            Ok(())
        })
    }

    /// Newest first, skipping messages the user has hidden for themselves.
    pub fn list_messages_for_user(
        &self,
        conversation_id: ConversationId,
        user_id: UserId,
        limit: usize,
    ) -> Result<Vec<Message>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT m.id, m.conversation_id, m.sender_id, m.content, m.file_path, m.file_type,
                        m.created_at, m.is_deleted, m.is_edited, m.is_read
                 FROM messages m
                 WHERE m.conversation_id = ?1
                   AND NOT EXISTS (
                        SELECT 1 FROM user_deleted_messages d
                        WHERE d.message_id = m.id AND d.user_id = ?2)
                 ORDER BY m.created_at DESC, m.id DESC
                 LIMIT ?3",
            )?;
            let limit = i64::try_from(limit).unwrap_or(i64::MAX);
            let messages = stmt
                .query_map(params![conversation_id, user_id, limit], row_to_message)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(messages)
        })
    }

    /// Flag every unread message from other senders as read.
    pub fn mark_all_read(&self, conversation_id: ConversationId, reader_id: UserId) -> Result<usize> {
        self.with_conn(|conn| {
            let updated = conn.execute(
                "UPDATE messages SET is_read = 1
                 WHERE conversation_id = ?1 AND sender_id <> ?2 AND is_read = 0",
                params![conversation_id, reader_id],
            )?;
            Ok(updated)
        })
    }

    pub fn count_messages(&self, conversation_id: ConversationId) -> Result<u64> {
        self.with_conn(|conn| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM messages WHERE conversation_id = ?1",
                [conversation_id],
                |row| row.get(0),
            )?;
            Ok(count.max(0) as u64)
        })
    }
}

fn query_message(conn: &Connection, id: MessageId) -> Result<Option<Message>> {
    let message = conn
        .query_row(
            &format!("SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = ?1"),
            [id],
            row_to_message,
        )
        .optional()?;
    Ok(message)
}
