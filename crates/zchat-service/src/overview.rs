use zchat_types::api::{ConversationOverview, UserSummary};
use zchat_types::models::{Conversation, ConversationId, UserId};

use crate::conversation::ConversationService;
use crate::error::ChatResult;
use crate::message::MessageService;

/// Builds per-viewer conversation summaries from both services, so neither
/// service has to know about the other.
#[derive(Clone)]
pub struct Inbox {
    conversations: ConversationService,
    messages: MessageService,
}

impl Inbox {
    pub fn new(conversations: ConversationService, messages: MessageService) -> Self {
        Self {
            conversations,
            messages,
        }
    }

    pub fn overview(&self, id: ConversationId, viewer_id: UserId) -> ChatResult<ConversationOverview> {
        let conversation = self.conversations.get(id, viewer_id)?;
        self.assemble(conversation, viewer_id)
    }

    /// Every conversation of the viewer, most recently active first.
    pub fn list(&self, viewer_id: UserId) -> ChatResult<Vec<ConversationOverview>> {
        self.conversations
            .list_for_user(viewer_id)?
            .into_iter()
            .map(|c| self.assemble(c, viewer_id))
            .collect()
    }

    fn assemble(&self, conversation: Conversation, viewer_id: UserId) -> ChatResult<ConversationOverview> {
        let participants = self
            .conversations
            .participants(conversation.id)?
            .into_iter()
            .map(UserSummary::from)
            .collect();

        let last_message = self
            .messages
            .latest(conversation.id, viewer_id)?
            .map(|m| self.messages.to_view(&m))
            .transpose()?;

        let unread_count = self.conversations.unread_count(conversation.id, viewer_id)?;

        Ok(ConversationOverview {
            conversation,
            participants,
            last_message,
            unread_count,
        })
    }
}
