use tracing::{debug, error, info, warn};

use zchat_service::{ChatError, ChatResult, FileRef};
use zchat_types::events::{CallKind, CallRelay, CallSignal, ClientEvent, ServerEvent};
use zchat_types::models::{DeleteMode, UserId};

use crate::Gateway;
use crate::hub::ConnectionId;

/// The authenticated side of one socket.
#[derive(Debug, Clone)]
pub struct Session {
    pub user_id: UserId,
    pub username: String,
    pub conn_id: ConnectionId,
}

/// Run the storage-bound part of an event off the async runtime.
async fn blocking<T, F>(f: F) -> ChatResult<T>
where
    F: FnOnce() -> ChatResult<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| ChatError::Storage(anyhow::anyhow!("blocking task failed: {}", e)))?
}

/// Apply one inbound event and fan out whatever it produced.
pub async fn handle_event(gw: &Gateway, session: &Session, event: ClientEvent) -> ChatResult<()> {
    let services = gw.services().clone();
    let user_id = session.user_id;

    match event {
        ClientEvent::Message {
            conversation_id,
            content,
            file_path,
            file_type,
        } => {
            let (view, targets) = blocking(move || {
                let message = services.messages.create(
                    conversation_id,
                    user_id,
                    &content,
                    FileRef::new(file_path, file_type),
                )?;
                let view = services.messages.to_view(&message)?;
                let targets = services.conversations.participant_ids(conversation_id)?;
                Ok((view, targets))
            })
            .await?;

            debug!(
                "{} ({}) posted message {} in conversation {}",
                session.username, user_id, view.id, conversation_id
            );
            gw.hub()
                .broadcast_to_users(&targets, &ServerEvent::new_message(view))
                .await;
        }

        ClientEvent::MarkRead { conversation_id } => {
            let targets = blocking(move || {
                services.messages.mark_all_read(conversation_id, user_id)?;
                services.conversations.mark_read(conversation_id, user_id)?;
                services.conversations.participant_ids(conversation_id)
            })
            .await?;

            gw.hub()
                .broadcast_to_users(
                    &targets,
                    &ServerEvent::MessagesRead {
                        conversation_id,
                        user_id,
                    },
                )
                .await;
        }

        ClientEvent::Typing { conversation_id } => {
            let targets = blocking(move || {
                services
                    .conversations
                    .ensure_participant(conversation_id, user_id)?;
                services.conversations.participant_ids(conversation_id)
            })
            .await?;

            let others: Vec<UserId> = targets.into_iter().filter(|&id| id != user_id).collect();
            gw.hub()
                .broadcast_to_users(
                    &others,
                    &ServerEvent::Typing {
                        conversation_id,
                        user_id,
                        username: session.username.clone(),
                    },
                )
                .await;
        }

        ClientEvent::EditMessage {
            message_id,
            content,
        } => {
            let (view, targets) = blocking(move || {
                let edited = services.messages.edit(message_id, user_id, &content)?;
                let view = services.messages.to_view(&edited)?;
                let targets = services
                    .conversations
                    .participant_ids(edited.conversation_id)?;
                Ok((view, targets))
            })
            .await?;

            gw.hub()
                .broadcast_to_users(
                    &targets,
                    &ServerEvent::MessageEdited {
                        message_id: view.id,
                        conversation_id: view.conversation_id,
                        content: view.content,
                        is_edited: true,
                    },
                )
                .await;
        }

        ClientEvent::DeleteMessage {
            message_id,
            delete_type,
        } => {
            let mode = delete_type
                .parse::<DeleteMode>()
                .map_err(|e| ChatError::validation(e.to_string()))?;

            let (message, targets) = blocking(move || {
                let message = services.messages.delete(message_id, user_id, mode)?;
                let targets = match mode {
                    DeleteMode::ForEveryone => services
                        .conversations
                        .participant_ids(message.conversation_id)?,
                    DeleteMode::ForMe => vec![user_id],
                };
                Ok((message, targets))
            })
            .await?;

            info!(
                "{} ({}) deleted message {} ({})",
                session.username, user_id, message_id, mode
            );
            gw.hub()
                .broadcast_to_users(
                    &targets,
                    &ServerEvent::MessageDeleted {
                        message_id,
                        conversation_id: message.conversation_id,
                        delete_type: mode,
                    },
                )
                .await;
        }

        ClientEvent::CallOffer(signal) => relay_call(gw, session, CallKind::Offer, signal).await?,
        ClientEvent::CallAnswer(signal) => relay_call(gw, session, CallKind::Answer, signal).await?,
        ClientEvent::IceCandidate(signal) => {
            relay_call(gw, session, CallKind::IceCandidate, signal).await?
        }
        ClientEvent::CallEnd(signal) => relay_call(gw, session, CallKind::End, signal).await?,
        ClientEvent::CallRejected(signal) => {
            relay_call(gw, session, CallKind::Rejected, signal).await?
        }
    }

    Ok(())
}

/// Forward a signaling payload to its target, untouched apart from the
/// sender stamp. Both ends must belong to the named conversation.
async fn relay_call(
    gw: &Gateway,
    session: &Session,
    kind: CallKind,
    signal: CallSignal,
) -> ChatResult<()> {
    match kind {
        CallKind::Offer | CallKind::Answer if signal.sdp.is_none() => {
            return Err(ChatError::validation("sdp is required"));
        }
        CallKind::IceCandidate if signal.candidate.is_none() => {
            return Err(ChatError::validation("candidate is required"));
        }
        _ => {}
    }
    if signal.target_user_id == session.user_id {
        return Err(ChatError::validation("cannot call yourself"));
    }

    let conversations = gw.services().conversations.clone();
    let (caller, target, conversation_id) =
        (session.user_id, signal.target_user_id, signal.conversation_id);
    blocking(move || {
        conversations.ensure_participant(conversation_id, caller)?;
        if !conversations.is_participant(conversation_id, target)? {
            return Err(ChatError::Forbidden(
                "call target is not a participant of this conversation",
            ));
        }
        Ok(())
    })
    .await?;

    let relay = CallRelay {
        conversation_id,
        target_user_id: target,
        sender_id: caller,
        sender_username: session.username.clone(),
        sdp: signal.sdp,
        candidate: signal.candidate,
    };
    let delivered = gw
        .hub()
        .broadcast_to_users(&[target], &ServerEvent::call(kind, relay))
        .await;
    if delivered == 0 {
        debug!(
            "{:?} from {} to {} dropped: target offline",
            kind, caller, target
        );
    }
    Ok(())
}

/// Answer a rejected event on the originating connection only.
pub async fn report_error(gw: &Gateway, session: &Session, kind: &str, err: &ChatError) {
    match err {
        ChatError::Storage(e) => error!(
            "{} ({}) {} failed: {:#}",
            session.username, session.user_id, kind, e
        ),
        other => warn!(
            "{} ({}) {} rejected: {}",
            session.username, session.user_id, kind, other
        ),
    }
    gw.hub()
        .send_to_connection(
            session.user_id,
            session.conn_id,
            &ServerEvent::error(err.client_message()),
        )
        .await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use serde_json::json;
    use tokio::sync::mpsc;
    use zchat_crypto::Encryptor;
    use zchat_db::Database;
    use zchat_service::{ChatServices, MessageConfig};
    use zchat_types::models::ConversationId;

    use crate::handshake::{JwtVerifier, OriginPolicy};
    use crate::hub::{Frame, Hub};

    struct Harness {
        gw: Gateway,
        db: Arc<Database>,
    }

    struct Client {
        session: Session,
        rx: mpsc::Receiver<Frame>,
    }

    impl Client {
        fn next(&mut self) -> Option<ServerEvent> {
            self.rx
                .try_recv()
                .ok()
                .map(|frame| serde_json::from_str(&frame).unwrap())
        }
    }

    fn harness() -> Harness {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let services = ChatServices::from_database(
            db.clone(),
            Arc::new(Encryptor::new("gateway-test", &[]).unwrap()),
            MessageConfig::default(),
        );
        let gw = Gateway::new(
            Hub::new(),
            services,
            db.clone(),
            Arc::new(JwtVerifier::new("jwt", db.clone())),
            OriginPolicy::new(["http://localhost:3000"]),
        );
        Harness { gw, db }
    }

    async fn connect(h: &Harness, name: &str) -> Client {
        let user_id = match h.db.get_user_by_username(name).unwrap() {
            Some(row) => row.user.id,
            None => h.db.create_user(name, "h").unwrap().id,
        };
        let (conn_id, rx) = h.gw.hub().register(user_id, name).await;
        Client {
            session: Session {
                user_id,
                username: name.to_string(),
                conn_id,
            },
            rx,
        }
    }

    fn direct(h: &Harness, a: &Client, b: &Client) -> ConversationId {
        h.gw.services()
            .conversations
            .create_or_get(&[b.session.user_id], false, None, a.session.user_id)
            .unwrap()
            .id
    }

    async fn send(h: &Harness, c: &Client, event: serde_json::Value) -> ChatResult<()> {
        let event = ClientEvent::decode(&event.to_string()).unwrap();
        handle_event(&h.gw, &c.session, event).await
    }

    #[tokio::test]
    async fn message_fans_out_to_every_participant() {
        let h = harness();
        let mut alice = connect(&h, "alice").await;
        let mut bob = connect(&h, "bob").await;
        let mut eve = connect(&h, "eve").await;
        let conv = direct(&h, &alice, &bob);

        send(&h, &alice, json!({"type": "message", "conversation_id": conv, "content": "hi"}))
            .await
            .unwrap();

        for client in [&mut alice, &mut bob] {
            match client.next() {
                Some(ServerEvent::Message {
                    content,
                    sender_username,
                    is_read,
                    ..
                }) => {
                    assert_eq!(content, "hi");
                    assert_eq!(sender_username, "alice");
                    assert!(!is_read);
                }
                other => panic!("unexpected {:?}", other),
            }
        }
        assert!(eve.next().is_none());

        let err = send(&h, &eve, json!({"type": "message", "conversation_id": conv, "content": "x"}))
            .await
            .unwrap_err();
        assert!(matches!(err, ChatError::Forbidden(_)));
    }

    #[tokio::test]
    async fn typing_skips_the_typist() {
        let h = harness();
        let mut alice = connect(&h, "alice").await;
        let mut bob = connect(&h, "bob").await;
        let conv = direct(&h, &alice, &bob);

        send(&h, &alice, json!({"type": "typing", "conversation_id": conv}))
            .await
            .unwrap();

        assert!(alice.next().is_none());
        assert_eq!(
            bob.next(),
            Some(ServerEvent::Typing {
                conversation_id: conv,
                user_id: alice.session.user_id,
                username: "alice".into(),
            })
        );
    }

    #[tokio::test]
    async fn mark_read_updates_flags_and_notifies() {
        let h = harness();
        let mut alice = connect(&h, "alice").await;
        let mut bob = connect(&h, "bob").await;
        let conv = direct(&h, &alice, &bob);

        send(&h, &alice, json!({"type": "message", "conversation_id": conv, "content": "ping"}))
            .await
            .unwrap();
        alice.next();
        bob.next();

        send(&h, &bob, json!({"type": "mark_read", "conversation_id": conv}))
            .await
            .unwrap();

        let receipt = ServerEvent::MessagesRead {
            conversation_id: conv,
            user_id: bob.session.user_id,
        };
        assert_eq!(alice.next(), Some(receipt.clone()));
        assert_eq!(bob.next(), Some(receipt));
        assert_eq!(
            h.gw.services()
                .conversations
                .unread_count(conv, bob.session.user_id)
                .unwrap(),
            0
        );
    }

    #[tokio::test]
    async fn edit_and_delete_broadcasts() {
        let h = harness();
        let mut alice = connect(&h, "alice").await;
        let mut bob = connect(&h, "bob").await;
        let conv = direct(&h, &alice, &bob);

        send(&h, &alice, json!({"type": "message", "conversation_id": conv, "content": "hi"}))
            .await
            .unwrap();
        let Some(ServerEvent::Message { message_id, .. }) = alice.next() else {
            panic!("expected message event");
        };
        bob.next();

        send(&h, &alice, json!({"type": "edit_message", "message_id": message_id, "content": "hello"}))
            .await
            .unwrap();
        let edited = ServerEvent::MessageEdited {
            message_id,
            conversation_id: conv,
            content: "hello".into(),
            is_edited: true,
        };
        assert_eq!(alice.next(), Some(edited.clone()));
        assert_eq!(bob.next(), Some(edited));

        // hidden for bob only, alice hears nothing
        send(&h, &bob, json!({"type": "delete_message", "message_id": message_id, "delete_type": "for_me"}))
            .await
            .unwrap();
        assert!(alice.next().is_none());
        assert_eq!(
            bob.next(),
            Some(ServerEvent::MessageDeleted {
                message_id,
                conversation_id: conv,
                delete_type: DeleteMode::ForMe,
            })
        );

        let err = send(&h, &bob, json!({"type": "delete_message", "message_id": message_id, "delete_type": "for_everyone"}))
            .await
            .unwrap_err();
        assert!(matches!(err, ChatError::Forbidden(_)));

        let err = send(&h, &alice, json!({"type": "delete_message", "message_id": message_id, "delete_type": "shred"}))
            .await
            .unwrap_err();
        assert!(matches!(err, ChatError::Validation(_)));

        send(&h, &alice, json!({"type": "delete_message", "message_id": message_id, "delete_type": "for_everyone"}))
            .await
            .unwrap();
        let deleted = ServerEvent::MessageDeleted {
            message_id,
            conversation_id: conv,
            delete_type: DeleteMode::ForEveryone,
        };
        assert_eq!(alice.next(), Some(deleted.clone()));
        assert_eq!(bob.next(), Some(deleted));

        let err = send(&h, &alice, json!({"type": "edit_message", "message_id": message_id, "content": "again"}))
            .await
            .unwrap_err();
        assert!(matches!(err, ChatError::AlreadyDeleted));
    }

    #[tokio::test]
    async fn call_signals_reach_only_the_target() {
        let h = harness();
        let mut alice = connect(&h, "alice").await;
        let mut bob = connect(&h, "bob").await;
        let mut eve = connect(&h, "eve").await;
        let conv = direct(&h, &alice, &bob);

        let sdp = json!({"type": "offer", "sdp": "v=0"});
        send(
            &h,
            &alice,
            json!({
                "type": "call_offer",
                "conversation_id": conv,
                "target_user_id": bob.session.user_id,
                "sdp": sdp.clone(),
            }),
        )
        .await
        .unwrap();

        match bob.next() {
            Some(ServerEvent::CallOffer(relay)) => {
                assert_eq!(relay.sender_id, alice.session.user_id);
                assert_eq!(relay.sender_username, "alice");
                assert_eq!(relay.sdp, Some(sdp));
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(alice.next().is_none());
        assert!(eve.next().is_none());

        let err = send(
            &h,
            &alice,
            json!({
                "type": "call_offer",
                "conversation_id": conv,
                "target_user_id": eve.session.user_id,
                "sdp": {"sdp": "v=0"},
            }),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ChatError::Forbidden(_)));

        let err = send(
            &h,
            &eve,
            json!({
                "type": "ice_candidate",
                "conversation_id": conv,
                "target_user_id": bob.session.user_id,
                "candidate": {"candidate": "c"},
            }),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ChatError::Forbidden(_)));
        assert!(bob.next().is_none());

        send(
            &h,
            &bob,
            json!({
                "type": "call_end",
                "conversation_id": conv,
                "target_user_id": alice.session.user_id,
            }),
        )
        .await
        .unwrap();
        assert!(matches!(alice.next(), Some(ServerEvent::CallEnd(_))));
    }

    #[tokio::test]
    async fn errors_go_back_to_the_sender_connection() {
        let h = harness();
        let mut alice = connect(&h, "alice").await;
        let mut alice_phone = connect(&h, "alice").await;

        let err = send(&h, &alice, json!({"type": "typing", "conversation_id": 404}))
            .await
            .unwrap_err();
        report_error(&h.gw, &alice.session, "typing", &err).await;

        assert_eq!(
            alice.next(),
            Some(ServerEvent::error("not a participant of this conversation"))
        );
        assert!(alice_phone.next().is_none());
    }
}
