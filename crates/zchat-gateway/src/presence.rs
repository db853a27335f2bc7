use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{error, warn};

use zchat_service::store::UserStore;
use zchat_types::events::ServerEvent;
use zchat_types::models::UserId;

use crate::hub::Hub;

/// Keeps the stored online flag in line with the hub.
///
/// Writes go through one gate, and the offline side re-reads the hub under
/// it: a connection that registers while an older one is closing always
/// leaves the user online.
#[derive(Clone)]
pub struct Presence {
    hub: Hub,
    store: Arc<dyn UserStore>,
    gate: Arc<Mutex<()>>,
}

impl Presence {
    pub fn new(hub: Hub, store: Arc<dyn UserStore>) -> Self {
        Self {
            hub,
            store,
            gate: Arc::new(Mutex::new(())),
        }
    }

    /// Call after the connection is registered with the hub.
    pub async fn connected(&self, user_id: UserId) {
        let _gate = self.gate.lock().await;
        self.record(user_id, true).await;
    }

    /// Mark the user offline and announce it, unless a connection is still
    /// registered. Returns whether the user went offline.
    pub async fn release(&self, user_id: UserId, username: &str) -> bool {
        let _gate = self.gate.lock().await;
        if self.hub.is_online(user_id).await {
            return false;
        }

        self.record(user_id, false).await;
        self.hub
            .broadcast_all(&ServerEvent::UserOffline {
                user_id,
                username: username.to_string(),
            })
            .await;
        true
    }

    async fn record(&self, user_id: UserId, online: bool) {
        let store = self.store.clone();
        match tokio::task::spawn_blocking(move || store.set_online(user_id, online)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!("Failed to record presence for user {}: {}", user_id, e),
            Err(e) => error!("spawn_blocking join error: {}", e),
        }
    }
}
