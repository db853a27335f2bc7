use anyhow::Result;
use rusqlite::{Connection, OptionalExtension, TransactionBehavior, params, params_from_iter};
use tracing::debug;

use zchat_types::models::{Conversation, ConversationId, Participant, User, UserId};

use crate::Database;
use crate::models::{
    CONVERSATION_COLUMNS, now, row_to_conversation, row_to_participant, row_to_user,
};

impl Database {
    /// Return the conversation whose participant set equals `participant_ids`
    /// (same `is_group` kind), creating it if none exists. Lookup and insert
    /// share one immediate transaction, so concurrent callers converge on a
    /// single row. The flag is `true` when a new conversation was created.
    pub fn find_or_create_conversation(
        &self,
        participant_ids: &[UserId],
        is_group: bool,
        name: Option<&str>,
    ) -> Result<(Conversation, bool)> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

            let existing = if is_group {
                find_group(&tx, participant_ids)?
            } else {
                match participant_ids {
                    [a, b] => find_direct(&tx, *a, *b)?,
                    _ => None,
                }
            };
            if let Some(conversation) = existing {
                return Ok((conversation, false));
            }

            let ts = now();
            tx.execute(
                "INSERT INTO conversations (name, is_group, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?3)",
                params![name, is_group, ts],
            )?;
            let id = tx.last_insert_rowid();

            for user_id in participant_ids {
                tx.execute(
                    "INSERT OR IGNORE INTO conversation_participants (user_id, conversation_id, joined_at)
                     VALUES (?1, ?2, ?3)",
                    params![user_id, id, ts],
                )?;
            }

            let conversation = query_conversation(&tx, id)?
                .ok_or_else(|| anyhow::anyhow!("Conversation {} vanished after insert", id))?;
            tx.commit()?;

            debug!(
                "Created {} conversation {} with {} participants",
                if is_group { "group" } else { "direct" },
                id,
                participant_ids.len()
            );
            Ok((conversation, true))
        })
    }

    pub fn get_conversation(&self, id: ConversationId) -> Result<Option<Conversation>> {
        self.with_conn(|conn| query_conversation(conn, id))
    }

    /// Conversations the user belongs to, most recently active first.
    pub fn list_conversations_for_user(&self, user_id: UserId) -> Result<Vec<Conversation>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT c.id, c.name, c.is_group, c.created_at, c.updated_at
                 FROM conversations c
                 JOIN conversation_participants p ON p.conversation_id = c.id
                 WHERE p.user_id = ?1
                 ORDER BY c.updated_at DESC, c.id DESC",
            )?;
            let rows = stmt
                .query_map([user_id], row_to_conversation)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn is_participant(&self, conversation_id: ConversationId, user_id: UserId) -> Result<bool> {
        self.with_conn(|conn| {
            let found = conn
                .query_row(
                    "SELECT 1 FROM conversation_participants
                     WHERE conversation_id = ?1 AND user_id = ?2",
                    params![conversation_id, user_id],
                    |_| Ok(()),
                )
                .optional()?;
            Ok(found.is_some())
        })
    }

    pub fn get_participant(
        &self,
        conversation_id: ConversationId,
        user_id: UserId,
    ) -> Result<Option<Participant>> {
        self.with_conn(|conn| {
            let participant = conn
                .query_row(
                    "SELECT user_id, conversation_id, joined_at, last_read_at
                     FROM conversation_participants
                     WHERE conversation_id = ?1 AND user_id = ?2",
                    params![conversation_id, user_id],
                    row_to_participant,
                )
                .optional()?;
            Ok(participant)
        })
    }

    pub fn participant_ids(&self, conversation_id: ConversationId) -> Result<Vec<UserId>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT user_id FROM conversation_participants
                 WHERE conversation_id = ?1
                 ORDER BY joined_at, user_id",
            )?;
            let ids: Vec<UserId> = stmt
                .query_map([conversation_id], |row| row.get(0))?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(ids)
        })
    }

    pub fn list_participants(&self, conversation_id: ConversationId) -> Result<Vec<User>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT u.id, u.username, u.is_active, u.is_online, u.created_at, u.last_seen
                 FROM users u
                 JOIN conversation_participants p ON p.user_id = u.id
                 WHERE p.conversation_id = ?1
                 ORDER BY u.username ASC",
            )?;
            let users = stmt
                .query_map([conversation_id], row_to_user)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(users)
        })
    }

    /// Set the caller's `last_read_at` to now. Other participants are untouched.
    pub fn mark_conversation_read(
        &self,
        conversation_id: ConversationId,
        user_id: UserId,
    ) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE conversation_participants SET last_read_at = ?3
                 WHERE conversation_id = ?1 AND user_id = ?2",
                params![conversation_id, user_id, now()],
            )?;
            Ok(())
        })
    }

    /// Messages from others, not deleted, newer than the caller's
    /// `last_read_at` (all of them if never read). Zero for non-participants.
    pub fn unread_count(&self, conversation_id: ConversationId, user_id: UserId) -> Result<u64> {
        self.with_conn(|conn| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*)
                 FROM messages m
                 JOIN conversation_participants p
                   ON p.conversation_id = m.conversation_id AND p.user_id = ?2
                 WHERE m.conversation_id = ?1
                   AND m.sender_id <> ?2
                   AND m.is_deleted = 0
                   AND (p.last_read_at IS NULL OR m.created_at > p.last_read_at)",
                params![conversation_id, user_id],
                |row| row.get(0),
            )?;
            Ok(count.max(0) as u64)
        })
    }
}

fn query_conversation(conn: &Connection, id: ConversationId) -> Result<Option<Conversation>> {
    let conversation = conn
        .query_row(
            &format!("SELECT {CONVERSATION_COLUMNS} FROM conversations WHERE id = ?1"),
            [id],
            row_to_conversation,
        )
        .optional()?;
    Ok(conversation)
}

fn find_direct(conn: &Connection, a: UserId, b: UserId) -> Result<Option<Conversation>> {
    let conversation = conn
        .query_row(
            "SELECT c.id, c.name, c.is_group, c.created_at, c.updated_at
             FROM conversations c
             JOIN conversation_participants pa ON pa.conversation_id = c.id AND pa.user_id = ?1
             JOIN conversation_participants pb ON pb.conversation_id = c.id AND pb.user_id = ?2
             WHERE c.is_group = 0
             ORDER BY c.id
             LIMIT 1",
            params![a, b],
            row_to_conversation,
        )
        .optional()?;
    Ok(conversation)
}

/// Group with exactly this participant set: same member count and no member
/// outside the set.
fn find_group(conn: &Connection, participant_ids: &[UserId]) -> Result<Option<Conversation>> {
    if participant_ids.is_empty() {
        return Ok(None);
    }

    let placeholders = (2..=participant_ids.len() + 1)
        .map(|i| format!("?{}", i))
        .collect::<Vec<_>>()
        .join(", ");
    let sql = format!(
        "SELECT c.id, c.name, c.is_group, c.created_at, c.updated_at
         FROM conversations c
         WHERE c.is_group = 1
           AND (SELECT COUNT(*) FROM conversation_participants p
                WHERE p.conversation_id = c.id) = ?1
           AND NOT EXISTS (
                SELECT 1 FROM conversation_participants p
                WHERE p.conversation_id = c.id AND p.user_id NOT IN ({placeholders}))
         ORDER BY c.id
         LIMIT 1"
    );

    let args = std::iter::once(participant_ids.len() as i64).chain(participant_ids.iter().copied());
    let conversation = conn
        .query_row(&sql, params_from_iter(args), row_to_conversation)
        .optional()?;
    Ok(conversation)
}
