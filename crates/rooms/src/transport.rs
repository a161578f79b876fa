use std::collections::HashMap;

use async_trait::async_trait;
use shared::domain::{Connection, ConnectionId, RoomId};
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, warn};

use crate::error::TransportError;

/// What a coordinator needs from the layer that holds the sockets.
#[async_trait]
pub trait RoomTransport: Send + Sync {
    /// Currently open connections of `room`. Calling it again enumerates again.
    async fn connections(&self, room: &RoomId) -> Result<Vec<Connection>, TransportError>;

    /// Sends `payload` to every open connection of `room` and returns how many
    /// accepted it. A failed send is logged and skipped.
    async fn broadcast(&self, room: &RoomId, payload: &str) -> usize;

    async fn send(
        &self,
        room: &RoomId,
        connection: ConnectionId,
        payload: &str,
    ) -> Result<(), TransportError>;
}

struct Attached {
    connection: Connection,
    outbound: mpsc::UnboundedSender<String>,
}

/// In-process transport: every attached connection owns an unbounded outbound
/// queue that the socket task drains.
#[derive(Default)]
pub struct LocalTransport {
    rooms: RwLock<HashMap<RoomId, HashMap<ConnectionId, Attached>>>,
}

impl LocalTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn attach(&self, connection: Connection) -> mpsc::UnboundedReceiver<String> {
        let (outbound, rx) = mpsc::unbounded_channel();
        let mut rooms = self.rooms.write().await;
        debug!(room = %connection.room, connection = %connection.id, "attach");
        rooms
            .entry(connection.room.clone())
            .or_default()
            .insert(connection.id, Attached { connection, outbound });
        rx
    }

    /// Removes a connection, returning its metadata. `None` means it was not
    /// attached, e.g. it already went through the close or error path.
    pub async fn detach(&self, room: &RoomId, connection: ConnectionId) -> Option<Connection> {
        let mut rooms = self.rooms.write().await;
        let members = rooms.get_mut(room)?;
        let removed = members.remove(&connection).map(|attached| attached.connection);
        if members.is_empty() {
            rooms.remove(room);
        }
        if removed.is_some() {
            debug!(%room, %connection, "detach");
        }
        removed
    }

    pub async fn connection(&self, room: &RoomId, connection: ConnectionId) -> Option<Connection> {
        self.rooms
            .read()
            .await
            .get(room)
            .and_then(|members| members.get(&connection))
            .map(|attached| attached.connection.clone())
    }

    pub async fn connection_count(&self, room: &RoomId) -> usize {
        self.rooms.read().await.get(room).map_or(0, HashMap::len)
    }

    pub async fn rooms(&self) -> Vec<RoomId> {
        self.rooms.read().await.keys().cloned().collect()
    }
}

#[async_trait]
impl RoomTransport for LocalTransport {
    async fn connections(&self, room: &RoomId) -> Result<Vec<Connection>, TransportError> {
        Ok(self
            .rooms
            .read()
            .await
            .get(room)
            .map(|members| {
                members
                    .values()
                    .map(|attached| attached.connection.clone())
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn broadcast(&self, room: &RoomId, payload: &str) -> usize {
        let rooms = self.rooms.read().await;
        let Some(members) = rooms.get(room) else {
            return 0;
        };
        let mut delivered = 0;
        for (id, attached) in members {
            if attached.outbound.send(payload.to_owned()).is_ok() {
                delivered += 1;
            } else {
                warn!(%room, connection = %id, "broadcast skipped closed connection");
            }
        }
        delivered
    }

    async fn send(
        &self,
        room: &RoomId,
        connection: ConnectionId,
        payload: &str,
    ) -> Result<(), TransportError> {
        let rooms = self.rooms.read().await;
        let attached = rooms
            .get(room)
            .and_then(|members| members.get(&connection))
            .ok_or(TransportError::UnknownConnection(connection))?;
        attached
            .outbound
            .send(payload.to_owned())
            .map_err(|_| TransportError::Closed(connection))
    }
}

#[cfg(test)]
#[path = "tests/transport_tests.rs"]
mod tests;
