use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::{
    mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender},
    RwLock,
};
use uuid::Uuid;

pub mod broadcast;
pub mod message_types;
pub mod session;

/// Opaque authenticated-identity key, resolved at connect time by the
/// identity boundary. One user may hold several simultaneous connections.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(String);

impl UserId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for UserId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for UserId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Opaque caller-chosen channel key grouping connections for fan-out.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoomId(String);

impl RoomId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for RoomId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for RoomId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Unique identifier for a registered connection.
///
/// Each connection gets a unique id when it registers, which allows for
/// precise cleanup no matter which exit path runs it.
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

/// The receiving session is gone; its queue can no longer accept frames.
#[derive(Debug, Error)]
#[error("connection {0} is closed")]
pub struct ConnectionClosed(pub ConnectionId);

/// Send half of one live connection. Cheap to clone; the registry keeps the
/// authoritative copy and hands out snapshots for delivery.
#[derive(Clone)]
pub struct Connection {
    id: ConnectionId,
    sender: UnboundedSender<String>,
}

impl Connection {
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Queue a frame for delivery. Never blocks; fails only when the
    /// receiving session has terminated.
    pub fn send(&self, frame: String) -> Result<(), ConnectionClosed> {
        self.sender.send(frame).map_err(|_| ConnectionClosed(self.id))
    }
}

/// What a connection was registered as. Returned exactly once by
/// `unregister`, so the caller that actually tore the connection down can
/// emit its leave events.
///
/// The accept protocol currently binds a connection to at most one room;
/// the registry itself handles any number.
#[derive(Debug, Clone, Default)]
pub struct Registration {
    pub user_id: Option<UserId>,
    pub rooms: Vec<RoomId>,
}

struct Entry {
    connection: Connection,
    registration: Registration,
}

#[derive(Default)]
struct Indices {
    connections: HashMap<ConnectionId, Entry>,
    by_user: HashMap<UserId, HashSet<ConnectionId>>,
    by_room: HashMap<RoomId, HashSet<ConnectionId>>,
    memberships: HashMap<UserId, HashSet<RoomId>>,
}

/// Authoritative concurrent index of connections, users, and rooms.
///
/// All four indices live behind one lock, so every connect/disconnect is
/// externally a single atomic step and readers always observe a consistent
/// snapshot. Critical sections only mutate or copy indices; delivery I/O
/// happens outside the lock.
#[derive(Default, Clone)]
pub struct ConnectionRegistry {
    inner: Arc<RwLock<Indices>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new connection, optionally bound to a user identity and a
    /// set of rooms.
    ///
    /// Returns the connection id plus the receive half the owning session
    /// drains for outbound frames. Dropping the registration (via
    /// `unregister`) closes the channel and ends the drain loop.
    pub async fn register(
        &self,
        user_id: Option<UserId>,
        rooms: Vec<RoomId>,
    ) -> (ConnectionId, UnboundedReceiver<String>) {
        let (tx, rx) = unbounded_channel();
        let id = ConnectionId::new();
        let registration = Registration { user_id, rooms };

        let mut guard = self.inner.write().await;

        if let Some(user) = &registration.user_id {
            guard.by_user.entry(user.clone()).or_default().insert(id);
        }
        for room in &registration.rooms {
            guard.by_room.entry(room.clone()).or_default().insert(id);
            if let Some(user) = &registration.user_id {
                guard
                    .memberships
                    .entry(user.clone())
                    .or_default()
                    .insert(room.clone());
            }
        }
        guard.connections.insert(
            id,
            Entry {
                connection: Connection { id, sender: tx },
                registration,
            },
        );

        tracing::debug!(
            connection = %id,
            total = guard.connections.len(),
            "connection registered"
        );

        (id, rx)
    }

    /// Remove a connection from every index it appears in, pruning entries
    /// that become empty.
    ///
    /// Idempotent: teardown runs from several exit paths (normal close, read
    /// error, failed delivery), and only the first call observes the
    /// registration.
    pub async fn unregister(&self, id: ConnectionId) -> Option<Registration> {
        let mut guard = self.inner.write().await;
        let entry = guard.connections.remove(&id)?;
        let registration = &entry.registration;

        if let Some(user) = &registration.user_id {
            if let Some(ids) = guard.by_user.get_mut(user) {
                ids.remove(&id);
                if ids.is_empty() {
                    guard.by_user.remove(user);
                }
            }
        }

        for room in &registration.rooms {
            if let Some(ids) = guard.by_room.get_mut(room) {
                ids.remove(&id);
                if ids.is_empty() {
                    guard.by_room.remove(room);
                }
            }

            // The (user, room) membership pair outlives this connection as
            // long as any other connection of the same user is in the room.
            if let Some(user) = &registration.user_id {
                let still_present = guard.by_user.get(user).is_some_and(|ids| {
                    ids.iter().any(|other| {
                        guard
                            .connections
                            .get(other)
                            .is_some_and(|e| e.registration.rooms.contains(room))
                    })
                });

                if !still_present {
                    if let Some(rooms) = guard.memberships.get_mut(user) {
                        rooms.remove(room);
                        if rooms.is_empty() {
                            guard.memberships.remove(user);
                        }
                    }
                }
            }
        }

        tracing::debug!(
            connection = %id,
            remaining = guard.connections.len(),
            "connection unregistered"
        );

        Some(entry.registration)
    }

    /// Live connections for a user; empty when the user is offline.
    /// A consistent snapshot at the instant of the call.
    pub async fn connections_for_user(&self, user_id: &UserId) -> Vec<Connection> {
        let guard = self.inner.read().await;
        guard
            .by_user
            .get(user_id)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| guard.connections.get(id).map(|e| e.connection.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Live connections in a room; same snapshot contract.
    pub async fn connections_in_room(&self, room_id: &RoomId) -> Vec<Connection> {
        let guard = self.inner.read().await;
        guard
            .by_room
            .get(room_id)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| guard.connections.get(id).map(|e| e.connection.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Every registered connection.
    pub async fn all_connections(&self) -> Vec<Connection> {
        let guard = self.inner.read().await;
        guard
            .connections
            .values()
            .map(|e| e.connection.clone())
            .collect()
    }

    /// Rooms the user currently has at least one open connection in.
    pub async fn rooms_of(&self, user_id: &UserId) -> Vec<RoomId> {
        let guard = self.inner.read().await;
        guard
            .memberships
            .get(user_id)
            .map(|rooms| rooms.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Users currently present in a room.
    pub async fn users_of(&self, room_id: &RoomId) -> Vec<UserId> {
        let guard = self.inner.read().await;
        guard
            .memberships
            .iter()
            .filter(|(_, rooms)| rooms.contains(room_id))
            .map(|(user, _)| user.clone())
            .collect()
    }

    /// Number of registered connections (for logging/metrics).
    pub async fn connection_count(&self) -> usize {
        let guard = self.inner.read().await;
        guard.connections.len()
    }
}
