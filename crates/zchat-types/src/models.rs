use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub type UserId = i64;
pub type ConversationId = i64;
pub type MessageId = i64;

/// Longest message body accepted, counted in characters.
pub const MAX_CONTENT_CHARS: usize = 5000;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub username: String,
    pub is_active: bool,
    pub is_online: bool,
    pub created_at: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: ConversationId,
    pub name: Option<String>,
    pub is_group: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Membership of one user in one conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    pub user_id: UserId,
    pub conversation_id: ConversationId,
    pub joined_at: DateTime<Utc>,
    pub last_read_at: Option<DateTime<Utc>>,
}

/// A stored message. `content` holds ciphertext and never leaves the server
/// in this form; clients only ever see a [`MessageView`](crate::api::MessageView).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub id: MessageId,
    pub conversation_id: ConversationId,
    pub sender_id: UserId,
    pub content: String,
    pub file_path: Option<String>,
    pub file_type: Option<String>,
    pub created_at: DateTime<Utc>,
    pub is_deleted: bool,
    pub is_edited: bool,
    pub is_read: bool,
}

/// Input for inserting a message; `content` is already encrypted.
#[derive(Debug, Clone)]
pub struct NewMessage {
    pub conversation_id: ConversationId,
    pub sender_id: UserId,
    pub content: String,
    pub file_path: Option<String>,
    pub file_type: Option<String>,
}

/// How a message is removed: hidden from the caller only, or tombstoned for
/// every participant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeleteMode {
    ForMe,
    ForEveryone,
}

impl DeleteMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ForMe => "for_me",
            Self::ForEveryone => "for_everyone",
        }
    }
}

impl fmt::Display for DeleteMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("delete_type must be 'for_me' or 'for_everyone', got '{0}'")]
pub struct UnknownDeleteMode(pub String);

impl FromStr for DeleteMode {
    type Err = UnknownDeleteMode;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "for_me" => Ok(Self::ForMe),
            "for_everyone" => Ok(Self::ForEveryone),
            other => Err(UnknownDeleteMode(other.to_string())),
        }
    }
}
