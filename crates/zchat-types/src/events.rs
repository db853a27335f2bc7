use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::api::MessageView;
use crate::models::{ConversationId, DeleteMode, MessageId, UserId};

/// Events sent FROM client TO server over the WebSocket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientEvent {
    /// Post a text and/or file message
    Message {
        conversation_id: ConversationId,
        #[serde(default)]
        content: String,
        #[serde(default)]
        file_path: Option<String>,
        #[serde(default)]
        file_type: Option<String>,
    },

    /// Mark everything in a conversation as read
    MarkRead { conversation_id: ConversationId },

    /// Indicate typing in a conversation
    Typing { conversation_id: ConversationId },

    /// Replace the content of one of the caller's own messages
    EditMessage { message_id: MessageId, content: String },

    /// Delete a message; `delete_type` is `for_me` or `for_everyone`
    DeleteMessage {
        message_id: MessageId,
        delete_type: String,
    },

    CallOffer(CallSignal),
    CallAnswer(CallSignal),
    IceCandidate(CallSignal),
    CallEnd(CallSignal),
    CallRejected(CallSignal),
}

/// WebRTC signaling payload. `sdp` and `candidate` are relayed untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallSignal {
    pub target_user_id: UserId,
    pub conversation_id: ConversationId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdp: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub candidate: Option<Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallKind {
    Offer,
    Answer,
    IceCandidate,
    End,
    Rejected,
}

/// Why an inbound frame could not be turned into a [`ClientEvent`].
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("malformed JSON: {0}")]
    Malformed(#[source] serde_json::Error),

    #[error("event has no type")]
    MissingType,

    #[error("unknown event type '{0}'")]
    UnknownType(String),

    #[error("invalid '{kind}' event: {reason}")]
    Invalid { kind: String, reason: String },
}

impl DecodeError {
    /// Malformed JSON breaks the connection; everything else is answered
    /// with an error frame.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Malformed(_))
    }
}

impl ClientEvent {
    pub const KINDS: &'static [&'static str] = &[
        "message",
        "mark_read",
        "typing",
        "edit_message",
        "delete_message",
        "call_offer",
        "call_answer",
        "ice_candidate",
        "call_end",
        "call_rejected",
    ];

    /// Decode a text frame: the `type` discriminator is checked first, then
    /// the remaining fields are parsed into the matching variant.
    pub fn decode(text: &str) -> Result<Self, DecodeError> {
        let value: Value = serde_json::from_str(text).map_err(DecodeError::Malformed)?;

        let kind = value
            .get("type")
            .and_then(Value::as_str)
            .ok_or(DecodeError::MissingType)?
            .to_string();

        if !Self::KINDS.contains(&kind.as_str()) {
            return Err(DecodeError::UnknownType(kind));
        }

        serde_json::from_value(value).map_err(|e| DecodeError::Invalid {
            kind,
            reason: e.to_string(),
        })
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Message { .. } => "message",
            Self::MarkRead { .. } => "mark_read",
            Self::Typing { .. } => "typing",
            Self::EditMessage { .. } => "edit_message",
            Self::DeleteMessage { .. } => "delete_message",
            Self::CallOffer(_) => "call_offer",
            Self::CallAnswer(_) => "call_answer",
            Self::IceCandidate(_) => "ice_candidate",
            Self::CallEnd(_) => "call_end",
            Self::CallRejected(_) => "call_rejected",
        }
    }
}

/// Events sent FROM server TO clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEvent {
    /// A new message was posted
    Message {
        conversation_id: ConversationId,
        message_id: MessageId,
        content: String,
        sender_id: UserId,
        sender_username: String,
        timestamp: DateTime<Utc>,
        file_path: Option<String>,
        file_type: Option<String>,
        is_deleted: bool,
        is_read: bool,
    },

    /// A participant read the conversation
    MessagesRead {
        conversation_id: ConversationId,
        user_id: UserId,
    },

    Typing {
        conversation_id: ConversationId,
        user_id: UserId,
        username: String,
    },

    MessageEdited {
        message_id: MessageId,
        conversation_id: ConversationId,
        content: String,
        is_edited: bool,
    },

    MessageDeleted {
        message_id: MessageId,
        conversation_id: ConversationId,
        delete_type: DeleteMode,
    },

    UserOnline { user_id: UserId, username: String },

    UserOffline { user_id: UserId, username: String },

    CallOffer(CallRelay),
    CallAnswer(CallRelay),
    IceCandidate(CallRelay),
    CallEnd(CallRelay),
    CallRejected(CallRelay),

    /// A rejected operation
    Error { message: String },
}

/// Signaling payload as delivered to the target, stamped with the sender.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallRelay {
    pub conversation_id: ConversationId,
    pub target_user_id: UserId,
    pub sender_id: UserId,
    pub sender_username: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdp: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub candidate: Option<Value>,
}

impl ServerEvent {
    /// Freshly created messages always go out unread.
    pub fn new_message(view: MessageView) -> Self {
        Self::Message {
            conversation_id: view.conversation_id,
            message_id: view.id,
            content: view.content,
            sender_id: view.sender_id,
            sender_username: view.sender_username,
            timestamp: view.created_at,
            file_path: view.file_path,
            file_type: view.file_type,
            is_deleted: view.is_deleted,
            is_read: false,
        }
    }

    pub fn call(kind: CallKind, relay: CallRelay) -> Self {
        match kind {
            CallKind::Offer => Self::CallOffer(relay),
            CallKind::Answer => Self::CallAnswer(relay),
            CallKind::IceCandidate => Self::IceCandidate(relay),
            CallKind::End => Self::CallEnd(relay),
            CallKind::Rejected => Self::CallRejected(relay),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn decodes_message_event() {
        let event =
            ClientEvent::decode(r#"{"type":"message","conversation_id":7,"content":"hi"}"#)
                .unwrap();
        assert_eq!(
            event,
            ClientEvent::Message {
                conversation_id: 7,
                content: "hi".into(),
                file_path: None,
                file_type: None,
            }
        );
    }

    #[test]
    fn decodes_call_signal_with_opaque_payload() {
        let text = json!({
            "type": "ice_candidate",
            "target_user_id": 2,
            "conversation_id": 9,
            "candidate": {"candidate": "candidate:1 1 UDP 2122252543", "sdpMid": "0"}
        })
        .to_string();

        match ClientEvent::decode(&text).unwrap() {
            ClientEvent::IceCandidate(signal) => {
                assert_eq!(signal.target_user_id, 2);
                assert_eq!(signal.conversation_id, 9);
                assert_eq!(signal.candidate.unwrap()["sdpMid"], "0");
                assert!(signal.sdp.is_none());
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn malformed_json_is_fatal() {
        let err = ClientEvent::decode("{not json").unwrap_err();
        assert!(err.is_fatal());
    }

    #[test]
    fn unknown_type_is_rejected_explicitly() {
        let err = ClientEvent::decode(r#"{"type":"join_voice","channel":1}"#).unwrap_err();
        assert!(matches!(err, DecodeError::UnknownType(ref t) if t == "join_voice"));
        assert!(!err.is_fatal());
    }

    #[test]
    fn missing_required_field_is_invalid() {
        let err = ClientEvent::decode(r#"{"type":"edit_message","message_id":3}"#).unwrap_err();
        assert!(matches!(err, DecodeError::Invalid { ref kind, .. } if kind == "edit_message"));
        assert!(!err.is_fatal());

        let err = ClientEvent::decode(r#"{"conversation_id":1}"#).unwrap_err();
        assert!(matches!(err, DecodeError::MissingType));
    }

    #[test]
    fn server_events_use_snake_case_tags() {
        let value = serde_json::to_value(ServerEvent::MessageDeleted {
            message_id: 4,
            conversation_id: 1,
            delete_type: DeleteMode::ForEveryone,
        })
        .unwrap();
        assert_eq!(value["type"], "message_deleted");
        assert_eq!(value["delete_type"], "for_everyone");

        let relay = CallRelay {
            conversation_id: 1,
            target_user_id: 2,
            sender_id: 3,
            sender_username: "carol".into(),
            sdp: Some(json!("v=0")),
            candidate: None,
        };
        let value = serde_json::to_value(ServerEvent::call(CallKind::Offer, relay)).unwrap();
        assert_eq!(value["type"], "call_offer");
        assert_eq!(value["sender_username"], "carol");
        assert!(value.get("candidate").is_none());
    }
}
