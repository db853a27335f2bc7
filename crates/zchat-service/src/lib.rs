//! Conversation and message rules shared by the WebSocket gateway and the
//! REST API: membership checks, encryption at rest, retention.

pub mod conversation;
pub mod error;
pub mod message;
pub mod overview;
pub mod store;

use std::sync::Arc;

use zchat_crypto::ContentCipher;
use zchat_db::Database;

pub use conversation::ConversationService;
pub use error::{ChatError, ChatResult};
pub use message::{FileRef, MessageConfig, MessageService};
pub use overview::Inbox;

/// The service set wired against one store.
#[derive(Clone)]
pub struct ChatServices {
    pub conversations: ConversationService,
    pub messages: MessageService,
    pub inbox: Inbox,
}

impl ChatServices {
    pub fn from_database(
        db: Arc<Database>,
        cipher: Arc<dyn ContentCipher>,
        config: MessageConfig,
    ) -> Self {
        let conversations = ConversationService::new(db.clone(), db.clone());
        let messages = MessageService::new(db.clone(), db.clone(), db, cipher, config);
        let inbox = Inbox::new(conversations.clone(), messages.clone());
        Self {
            conversations,
            messages,
            inbox,
        }
    }
}
