use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, error, info, trace, warn};

use zchat_types::events::{ClientEvent, ServerEvent};
use zchat_types::models::UserId;

use crate::Gateway;
use crate::handlers::{self, Session};
use crate::handshake::Identity;
use crate::hub::Frame;

/// Heartbeat interval: server sends a Ping every 15 seconds.
/// If 2 consecutive Pongs are missed (~30s), the connection is dropped.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);
const MAX_MISSED_PONGS: u8 = 2;

/// Serve an upgraded, already authenticated socket until it closes.
pub async fn handle_connection(socket: WebSocket, gw: Gateway, identity: Identity) {
    let Identity { user_id, username } = identity;
    let (mut sender, receiver) = socket.split();

    let (conn_id, outbox) = gw.hub().register(user_id, &username).await;
    info!("{} ({}) connected to gateway [{}]", username, user_id, conn_id);
    gw.presence().connected(user_id).await;

    // Tell the newcomer who is already here before announcing them
    if send_presence_snapshot(&mut sender, &gw, user_id).await {
        gw.hub()
            .broadcast_all(&ServerEvent::UserOnline {
                user_id,
                username: username.clone(),
            })
            .await;

        let session = Session {
            user_id,
            username: username.clone(),
            conn_id,
        };
        run_connection_loop(sender, receiver, outbox, gw.clone(), session).await;
    }

    if gw.hub().unregister(user_id, conn_id).await {
        gw.presence().release(user_id, &username).await;
    }
    info!("{} ({}) disconnected from gateway [{}]", username, user_id, conn_id);
}

async fn send_presence_snapshot(
    sender: &mut SplitSink<WebSocket, Message>,
    gw: &Gateway,
    user_id: UserId,
) -> bool {
    for (uid, uname) in gw.hub().online_users().await {
        if uid == user_id {
            continue;
        }
        let event = ServerEvent::UserOnline {
            user_id: uid,
            username: uname,
        };
        let text = match serde_json::to_string(&event) {
            Ok(text) => text,
            Err(e) => {
                error!("Failed to serialize presence event: {}", e);
                continue;
            }
        };
        if sender.send(Message::Text(text.into())).await.is_err() {
            return false;
        }
    }
    true
}

/// Writer drains the hub queue and runs the heartbeat; reader decodes and
/// dispatches. Whichever ends first takes the other down.
async fn run_connection_loop(
    mut sender: SplitSink<WebSocket, Message>,
    mut receiver: SplitStream<WebSocket>,
    mut outbox: mpsc::Receiver<Frame>,
    gw: Gateway,
    session: Session,
) {
    let pong_received = Arc::new(AtomicBool::new(true));
    let pong_flag_send = pong_received.clone();
    let pong_flag_recv = pong_received;

    let mut send_task = tokio::spawn(async move {
        let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
        heartbeat.tick().await;
        let mut missed_heartbeats: u8 = 0;

        loop {
            tokio::select! {
                frame = outbox.recv() => {
                    // None: the hub dropped this connection
                    let Some(frame) = frame else { break };
                    if sender.send(Message::Text(frame.to_string().into())).await.is_err() {
                        break;
                    }
                }
                _ = heartbeat.tick() => {
                    if pong_flag_send.swap(false, Ordering::Acquire) {
                        missed_heartbeats = 0;
                    } else {
                        missed_heartbeats += 1;
                        if missed_heartbeats >= MAX_MISSED_PONGS {
                            warn!("Heartbeat timeout (missed {} pongs), dropping connection", missed_heartbeats);
                            break;
                        }
                    }
                    if sender.send(Message::Ping(Vec::new().into())).await.is_err() {
                        break;
                    }
                }
            }
        }
        let _ = sender.close().await;
    });

    let label = format!("{} ({})", session.username, session.user_id);
    let mut recv_task = tokio::spawn(async move {
        while let Some(frame) = receiver.next().await {
            let msg = match frame {
                Ok(msg) => msg,
                Err(e) => {
                    debug!("{} ({}) read error: {}", session.username, session.user_id, e);
                    break;
                }
            };

            match msg {
                Message::Text(text) => match ClientEvent::decode(text.as_str()) {
                    Ok(event) => {
                        let kind = event.kind();
                        trace!("{} ({}) -> {}", session.username, session.user_id, kind);
                        if let Err(e) = handlers::handle_event(&gw, &session, event).await {
                            handlers::report_error(&gw, &session, kind, &e).await;
                        }
                    }
                    Err(e) if e.is_fatal() => {
                        warn!(
                            "{} ({}) sent malformed frame, closing: {} -- raw: {}",
                            session.username,
                            session.user_id,
                            e,
                            truncate(text.as_str(), 200)
                        );
                        break;
                    }
                    Err(e) => {
                        warn!("{} ({}) bad event: {}", session.username, session.user_id, e);
                        gw.hub()
                            .send_to_connection(
                                session.user_id,
                                session.conn_id,
                                &ServerEvent::error(e.to_string()),
                            )
                            .await;
                    }
                },
                Message::Binary(_) => {
                    warn!(
                        "{} ({}) sent a binary frame, closing",
                        session.username, session.user_id
                    );
                    break;
                }
                Message::Pong(_) => {
                    pong_flag_recv.store(true, Ordering::Release);
                }
                Message::Close(_) => break,
                Message::Ping(_) => {}
            }
        }
    });

    // Wait for either task to finish
    let finished = tokio::select! {
        res = &mut send_task => { recv_task.abort(); res }
        res = &mut recv_task => { send_task.abort(); res }
    };
    if let Err(e) = finished {
        if e.is_panic() {
            error!("{} connection task panicked: {}", label, e);
        }
    }
}

fn truncate(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncate_respects_char_boundaries() {
        assert_eq!(truncate("hello", 10), "hello");
        assert_eq!(truncate("hello", 2), "he");
        assert_eq!(truncate("ééé", 2), "éé");
    }
}
