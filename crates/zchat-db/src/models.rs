//! Row mapping between SQLite and the zchat-types models.
//!
//! Timestamps are stored as fixed-width RFC 3339 text in UTC with microsecond
//! precision, so string comparison in SQL matches chronological order.

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::Row;
use rusqlite::types::Type;

use zchat_types::models::{Conversation, Message, Participant, User};

/// A user together with the stored credential hash. Only the auth layer
/// reads `password_hash`.
pub struct UserRow {
    pub user: User,
    pub password_hash: String,
}

pub const USER_COLUMNS: &str = "id, username, is_active, is_online, created_at, last_seen";

pub const CONVERSATION_COLUMNS: &str = "id, name, is_group, created_at, updated_at";

pub const MESSAGE_COLUMNS: &str = "id, conversation_id, sender_id, content, file_path, file_type, \
                                   created_at, is_deleted, is_edited, is_read";

pub fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn now() -> String {
    timestamp(Utc::now())
}

fn parse_ts(idx: usize, raw: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn ts_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    parse_ts(idx, &raw)
}

fn opt_ts_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    row.get::<_, Option<String>>(idx)?
        .map(|raw| parse_ts(idx, &raw))
        .transpose()
}

/// Expects [`USER_COLUMNS`] in order.
pub fn row_to_user(row: &Row<'_>) -> rusqlite::Result<User> {
    Ok(User {
        id: row.get(0)?,
        username: row.get(1)?,
        is_active: row.get(2)?,
        is_online: row.get(3)?,
        created_at: ts_at(row, 4)?,
        last_seen: ts_at(row, 5)?,
    })
}

/// Expects [`CONVERSATION_COLUMNS`] in order.
pub fn row_to_conversation(row: &Row<'_>) -> rusqlite::Result<Conversation> {
    Ok(Conversation {
        id: row.get(0)?,
        name: row.get(1)?,
        is_group: row.get(2)?,
        created_at: ts_at(row, 3)?,
        updated_at: ts_at(row, 4)?,
    })
}

/// Expects `user_id, conversation_id, joined_at, last_read_at`.
pub fn row_to_participant(row: &Row<'_>) -> rusqlite::Result<Participant> {
    Ok(Participant {
        user_id: row.get(0)?,
        conversation_id: row.get(1)?,
        joined_at: ts_at(row, 2)?,
        last_read_at: opt_ts_at(row, 3)?,
    })
}

/// Expects [`MESSAGE_COLUMNS`] in order.
pub fn row_to_message(row: &Row<'_>) -> rusqlite::Result<Message> {
    Ok(Message {
        id: row.get(0)?,
        conversation_id: row.get(1)?,
        sender_id: row.get(2)?,
        content: row.get(3)?,
        file_path: row.get(4)?,
        file_type: row.get(5)?,
        created_at: ts_at(row, 6)?,
        is_deleted: row.get(7)?,
        is_edited: row.get(8)?,
        is_read: row.get(9)?,
    })
}
