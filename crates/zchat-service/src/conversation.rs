use std::sync::Arc;

use tracing::info;

use zchat_types::models::{Conversation, ConversationId, User, UserId};

use crate::error::{ChatError, ChatResult};
use crate::store::{ConversationStore, UserStore};

/// Membership, idempotent creation and read state of conversations.
#[derive(Clone)]
pub struct ConversationService {
    conversations: Arc<dyn ConversationStore>,
    users: Arc<dyn UserStore>,
}

impl ConversationService {
    pub fn new(conversations: Arc<dyn ConversationStore>, users: Arc<dyn UserStore>) -> Self {
        Self {
            conversations,
            users,
        }
    }

    /// Return the conversation for this participant set, creating it on first
    /// use. The creator is always a member; duplicates are dropped. Direct
    /// conversations need exactly two members, groups at least three.
    pub fn create_or_get(
        &self,
        participant_ids: &[UserId],
        is_group: bool,
        name: Option<&str>,
        creator_id: UserId,
    ) -> ChatResult<Conversation> {
        let members = normalize_members(participant_ids, creator_id);

        if is_group && members.len() < 3 {
            return Err(ChatError::validation(
                "group conversations need at least 3 participants",
            ));
        }
        if !is_group && members.len() != 2 {
            return Err(ChatError::validation(
                "direct conversations need exactly 2 participants",
            ));
        }

        for &user_id in &members {
            if self.users.get_user(user_id)?.is_none() {
                return Err(ChatError::NotFound("user"));
            }
        }

        let name = name.map(str::trim).filter(|n| !n.is_empty());
        let (conversation, created) = self.conversations.find_or_create(&members, is_group, name)?;
        if created {
            info!(
                "User {} created conversation {} ({} participants)",
                creator_id,
                conversation.id,
                members.len()
            );
        }
        Ok(conversation)
    }

    pub fn list_for_user(&self, user_id: UserId) -> ChatResult<Vec<Conversation>> {
        Ok(self.conversations.list_for_user(user_id)?)
    }

    pub fn get(&self, id: ConversationId, caller_id: UserId) -> ChatResult<Conversation> {
        let conversation = self
            .conversations
            .get(id)?
            .ok_or(ChatError::NotFound("conversation"))?;
        self.ensure_participant(id, caller_id)?;
        Ok(conversation)
    }

    pub fn mark_read(&self, id: ConversationId, user_id: UserId) -> ChatResult<()> {
        self.ensure_participant(id, user_id)?;
        self.conversations.mark_read(id, user_id)?;
        Ok(())
    }

    pub fn unread_count(&self, id: ConversationId, user_id: UserId) -> ChatResult<u64> {
        self.ensure_participant(id, user_id)?;
        Ok(self.conversations.unread_count(id, user_id)?)
    }

    /// Every participant, the actor included.
    pub fn participant_ids(&self, id: ConversationId) -> ChatResult<Vec<UserId>> {
        Ok(self.conversations.participant_ids(id)?)
    }

    pub fn participants(&self, id: ConversationId) -> ChatResult<Vec<User>> {
        Ok(self.conversations.participants(id)?)
    }

    pub fn is_participant(&self, id: ConversationId, user_id: UserId) -> ChatResult<bool> {
        Ok(self.conversations.is_participant(id, user_id)?)
    }

    pub fn ensure_participant(&self, id: ConversationId, user_id: UserId) -> ChatResult<()> {
        if self.conversations.is_participant(id, user_id)? {
            Ok(())
        } else {
            Err(ChatError::Forbidden("not a participant of this conversation"))
        }
    }
}

fn normalize_members(participant_ids: &[UserId], creator_id: UserId) -> Vec<UserId> {
    let mut members = Vec::with_capacity(participant_ids.len() + 1);
    members.push(creator_id);
    for &id in participant_ids {
        if !members.contains(&id) {
            members.push(id);
        }
    }
    members
}

#[cfg(test)]
mod tests {
    use super::*;
    use zchat_db::Database;

    fn setup(names: &[&str]) -> (ConversationService, Arc<Database>, Vec<UserId>) {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let ids = names
            .iter()
            .map(|n| db.create_user(n, "h").unwrap().id)
            .collect();
        let service = ConversationService::new(db.clone(), db.clone());
        (service, db, ids)
    }

    #[test]
    fn direct_create_is_idempotent() {
        let (svc, _db, ids) = setup(&["alice", "bob"]);

        let first = svc.create_or_get(&[ids[1]], false, None, ids[0]).unwrap();
        let second = svc.create_or_get(&[ids[0]], false, None, ids[1]).unwrap();
        let third = svc
            .create_or_get(&[ids[0], ids[1], ids[1]], false, None, ids[0])
            .unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(first.id, third.id);
        assert!(!first.is_group);
    }

    #[test]
    fn cardinality_is_validated() {
        let (svc, _db, ids) = setup(&["a", "b", "c"]);

        assert!(matches!(
            svc.create_or_get(&[], false, None, ids[0]),
            Err(ChatError::Validation(_))
        ));
        assert!(matches!(
            svc.create_or_get(&[ids[1], ids[2]], false, None, ids[0]),
            Err(ChatError::Validation(_))
        ));
        assert!(matches!(
            svc.create_or_get(&[ids[1]], true, None, ids[0]),
            Err(ChatError::Validation(_))
        ));

        let group = svc
            .create_or_get(&[ids[1], ids[2]], true, Some("  trio "), ids[0])
            .unwrap();
        assert!(group.is_group);
        assert_eq!(group.name.as_deref(), Some("trio"));
    }

    #[test]
    fn unknown_participant_is_not_found() {
        let (svc, _db, ids) = setup(&["alice"]);
        assert!(matches!(
            svc.create_or_get(&[ids[0] + 99], false, None, ids[0]),
            Err(ChatError::NotFound("user"))
        ));
    }

    #[test]
    fn get_and_mark_read_enforce_membership() {
        let (svc, _db, ids) = setup(&["alice", "bob", "mallory"]);
        let conv = svc.create_or_get(&[ids[1]], false, None, ids[0]).unwrap();

        assert_eq!(svc.get(conv.id, ids[1]).unwrap().id, conv.id);
        assert!(matches!(svc.get(conv.id, ids[2]), Err(ChatError::Forbidden(_))));
        assert!(matches!(svc.get(conv.id + 50, ids[0]), Err(ChatError::NotFound(_))));
        assert!(matches!(
            svc.mark_read(conv.id, ids[2]),
            Err(ChatError::Forbidden(_))
        ));
        assert!(matches!(
            svc.unread_count(conv.id, ids[2]),
            Err(ChatError::Forbidden(_))
        ));

        svc.mark_read(conv.id, ids[0]).unwrap();
        assert_eq!(svc.unread_count(conv.id, ids[0]).unwrap(), 0);

        let mut members = svc.participant_ids(conv.id).unwrap();
        members.sort();
        assert_eq!(members, vec![ids[0], ids[1]]);
    }

    #[test]
    fn listing_orders_by_recent_activity() {
        let (svc, db, ids) = setup(&["alice", "bob", "carol"]);
        let with_bob = svc.create_or_get(&[ids[1]], false, None, ids[0]).unwrap();
        let with_carol = svc.create_or_get(&[ids[2]], false, None, ids[0]).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(2));

        db.insert_message(&zchat_types::models::NewMessage {
            conversation_id: with_bob.id,
            sender_id: ids[1],
            content: "x".into(),
            file_path: None,
            file_type: None,
        })
        .unwrap();

        let listed: Vec<_> = svc
            .list_for_user(ids[0])
            .unwrap()
            .into_iter()
            .map(|c| c.id)
            .collect();
        assert_eq!(listed, vec![with_bob.id, with_carol.id]);
        assert_eq!(svc.list_for_user(ids[2]).unwrap().len(), 1);
    }

    #[test]
    fn concurrent_creates_converge() {
        let (svc, db, ids) = setup(&["alice", "bob"]);
        let (a, b) = (ids[0], ids[1]);

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let svc = svc.clone();
                std::thread::spawn(move || {
                    let (creator, other) = if i % 2 == 0 { (a, b) } else { (b, a) };
                    svc.create_or_get(&[other], false, None, creator).unwrap().id
                })
            })
            .collect();

        let ids: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert!(ids.windows(2).all(|w| w[0] == w[1]));
        assert_eq!(db.list_conversations_for_user(a).unwrap().len(), 1);
    }
}
