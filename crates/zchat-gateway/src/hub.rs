use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use tokio::sync::{Mutex, mpsc};
use tracing::{debug, error, warn};
use uuid::Uuid;

use zchat_types::events::ServerEvent;
use zchat_types::models::UserId;

/// Serialized event, shared by every connection it is fanned out to.
pub type Frame = Arc<str>;

/// Outbound frames buffered per connection before it counts as stalled.
pub const DEFAULT_QUEUE_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

struct UserEntry {
    username: String,
    conns: HashMap<ConnectionId, mpsc::Sender<Frame>>,
}

/// Registry of live connections, keyed by user. A user may hold several
/// connections at once.
///
/// Every connection owns a bounded outbound queue drained by its writer task.
/// Fan-out only enqueues, so the lock is never held across socket I/O. A
/// connection whose queue is full or closed is evicted on the spot; dropping
/// its sender ends the writer, which closes the socket.
#[derive(Clone)]
pub struct Hub {
    inner: Arc<HubInner>,
}

struct HubInner {
    users: Mutex<HashMap<UserId, UserEntry>>,
    queue_capacity: usize,
}

impl Default for Hub {
    fn default() -> Self {
        Self::new()
    }
}

impl Hub {
    pub fn new() -> Self {
        Self::with_queue_capacity(DEFAULT_QUEUE_CAPACITY)
    }

    pub fn with_queue_capacity(queue_capacity: usize) -> Self {
        Self {
            inner: Arc::new(HubInner {
                users: Mutex::new(HashMap::new()),
                queue_capacity: queue_capacity.max(1),
            }),
        }
    }

    /// Add a connection for `user_id`. The receiver yields every frame
    /// addressed to it, in enqueue order.
    pub async fn register(
        &self,
        user_id: UserId,
        username: &str,
    ) -> (ConnectionId, mpsc::Receiver<Frame>) {
        let conn_id = ConnectionId::new();
        let (tx, rx) = mpsc::channel(self.inner.queue_capacity);

        let mut users = self.inner.users.lock().await;
        let entry = users.entry(user_id).or_insert_with(|| UserEntry {
            username: username.to_string(),
            conns: HashMap::new(),
        });
        entry.conns.insert(conn_id, tx);
        debug!(
            "Registered connection {} for user {} ({} open)",
            conn_id,
            user_id,
            entry.conns.len()
        );

        (conn_id, rx)
    }

    /// Remove a connection. Returns `true` when the user has no connection
    /// left, i.e. they just went offline.
    pub async fn unregister(&self, user_id: UserId, conn_id: ConnectionId) -> bool {
        let mut users = self.inner.users.lock().await;
        let Some(entry) = users.get_mut(&user_id) else {
            return true;
        };
        entry.conns.remove(&conn_id);
        if entry.conns.is_empty() {
            users.remove(&user_id);
            true
        } else {
            false
        }
    }

    /// Enqueue `event` on every connection of every listed user. Returns the
    /// number of connections it was delivered to.
    pub async fn broadcast_to_users(&self, user_ids: &[UserId], event: &ServerEvent) -> usize {
        let Some(frame) = encode(event) else {
            return 0;
        };

        let mut seen = HashSet::with_capacity(user_ids.len());
        let mut users = self.inner.users.lock().await;
        let mut delivered = 0;
        for &user_id in user_ids {
            if seen.insert(user_id) {
                delivered += deliver(&mut users, user_id, &frame);
            }
        }
        delivered
    }

    /// Enqueue `event` on every registered connection.
    pub async fn broadcast_all(&self, event: &ServerEvent) -> usize {
        let Some(frame) = encode(event) else {
            return 0;
        };

        let mut users = self.inner.users.lock().await;
        let targets: Vec<UserId> = users.keys().copied().collect();
        targets
            .into_iter()
            .map(|user_id| deliver(&mut users, user_id, &frame))
            .sum()
    }

    /// Enqueue `event` on a single connection.
    pub async fn send_to_connection(
        &self,
        user_id: UserId,
        conn_id: ConnectionId,
        event: &ServerEvent,
    ) -> bool {
        let Some(frame) = encode(event) else {
            return false;
        };

        let mut users = self.inner.users.lock().await;
        let Some(entry) = users.get_mut(&user_id) else {
            return false;
        };
        let Some(tx) = entry.conns.get(&conn_id) else {
            return false;
        };

        if let Err(e) = tx.try_send(frame) {
            warn!("Evicting connection {} of user {}: {}", conn_id, user_id, e);
            entry.conns.remove(&conn_id);
            if entry.conns.is_empty() {
                users.remove(&user_id);
            }
            return false;
        }
        true
    }

    /// Users with at least one live connection.
    pub async fn online_users(&self) -> Vec<(UserId, String)> {
        self.inner
            .users
            .lock()
            .await
            .iter()
            .map(|(id, entry)| (*id, entry.username.clone()))
            .collect()
    }

    pub async fn is_online(&self, user_id: UserId) -> bool {
        self.inner.users.lock().await.contains_key(&user_id)
    }

    pub async fn connection_count(&self) -> usize {
        self.inner
            .users
            .lock()
            .await
            .values()
            .map(|entry| entry.conns.len())
            .sum()
    }
}

fn encode(event: &ServerEvent) -> Option<Frame> {
    match serde_json::to_string(event) {
        Ok(json) => Some(Arc::from(json)),
        Err(e) => {
            error!("Failed to serialize outbound event: {}", e);
            None
        }
    }
}

/// Push `frame` to each connection of one user, evicting the ones that
/// cannot take it.
fn deliver(users: &mut HashMap<UserId, UserEntry>, user_id: UserId, frame: &Frame) -> usize {
    let Some(entry) = users.get_mut(&user_id) else {
        return 0;
    };

    let mut delivered = 0;
    entry.conns.retain(|conn_id, tx| match tx.try_send(frame.clone()) {
        Ok(()) => {
            delivered += 1;
            true
        }
        Err(e) => {
            warn!("Evicting connection {} of user {}: {}", conn_id, user_id, e);
            false
        }
    });

    if entry.conns.is_empty() {
        users.remove(&user_id);
    }
    delivered
}
