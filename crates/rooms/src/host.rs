use std::{
    collections::{HashMap, HashSet},
    error::Error as StdError,
    sync::Arc,
    time::Duration,
};

use shared::domain::{Connection, ConnectionId, RoomId};
use tokio::{
    sync::{mpsc, Mutex, RwLock},
    time::Instant,
};
use tracing::{debug, info};

use crate::{
    context::RoomContext,
    coordinator::{Coordinator, RoomRequest, RoomResponse},
    error::{RoomError, TransportError},
    transport::{LocalTransport, RoomTransport},
};

struct Resident<C> {
    coordinator: C,
    last_active: Instant,
}

type Slot<C> = Mutex<Option<Resident<C>>>;

/// Owns the coordinator instances of one party, one slot per room.
///
/// Every event for a room runs while holding that room's slot lock, so the
/// coordinator's read-modify-write and the broadcast that follows are never
/// interleaved with another event of the same room. Rooms do not share locks.
///
/// A slot may be empty while its connections stay attached to the transport
/// (hibernation). The next event recreates the coordinator and runs
/// `on_start` against the connection set as it was before that event.
pub struct RoomHost<C: Coordinator> {
    transport: Arc<LocalTransport>,
    slots: RwLock<HashMap<RoomId, Arc<Slot<C>>>>,
}

impl<C: Coordinator> Default for RoomHost<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: Coordinator> RoomHost<C> {
    pub fn new() -> Self {
        Self::with_transport(Arc::new(LocalTransport::new()))
    }

    pub fn with_transport(transport: Arc<LocalTransport>) -> Self {
        Self {
            transport,
            slots: RwLock::new(HashMap::new()),
        }
    }

    pub fn transport(&self) -> &Arc<LocalTransport> {
        &self.transport
    }

    async fn slot(&self, room: &RoomId) -> Arc<Slot<C>> {
        if let Some(slot) = self.slots.read().await.get(room) {
            return slot.clone();
        }
        self.slots
            .write()
            .await
            .entry(room.clone())
            .or_insert_with(|| Arc::new(Mutex::new(None)))
            .clone()
    }

    async fn start<'g>(
        &self,
        room: &RoomId,
        slot: &'g mut Option<Resident<C>>,
    ) -> Result<&'g mut Resident<C>, RoomError> {
        let mut resident = match slot.take() {
            Some(resident) => resident,
            None => {
                let transport: Arc<dyn RoomTransport> = self.transport.clone();
                let mut coordinator = C::create(RoomContext::new(room.clone(), transport));
                coordinator.on_start().await?;
                info!(%room, "room instance started");
                Resident {
                    coordinator,
                    last_active: Instant::now(),
                }
            }
        };
        resident.last_active = Instant::now();
        Ok(slot.insert(resident))
    }

    /// Attaches a new connection and runs `on_connect`. The returned queue
    /// receives every broadcast of the room, starting with this one.
    pub async fn connect(
        &self,
        connection: Connection,
    ) -> Result<mpsc::UnboundedReceiver<String>, RoomError> {
        let room = connection.room.clone();
        let slot = self.slot(&room).await;
        let mut guard = slot.lock().await;
        let resident = self.start(&room, &mut guard).await?;
        let outbound = self.transport.attach(connection.clone()).await;
        resident.coordinator.on_connect(&connection).await?;
        Ok(outbound)
    }

    /// Detaches a connection and runs `on_close`. Closing a connection that is
    /// no longer attached is a no-op, so a close that follows an error for the
    /// same connection does not count it twice.
    pub async fn close(&self, room: &RoomId, connection: ConnectionId) -> Result<(), RoomError> {
        let slot = self.slot(room).await;
        let mut guard = slot.lock().await;
        let started = self.start(room, &mut guard).await;
        let detached = self.transport.detach(room, connection).await;
        let resident = started?;
        let Some(connection) = detached else {
            debug!(%room, %connection, "close for detached connection ignored");
            return Ok(());
        };
        resident.coordinator.on_close(&connection).await
    }

    /// Same as [`RoomHost::close`] but routed through `on_error`.
    pub async fn error(
        &self,
        room: &RoomId,
        connection: ConnectionId,
        error: &(dyn StdError + Send + Sync),
    ) -> Result<(), RoomError> {
        let slot = self.slot(room).await;
        let mut guard = slot.lock().await;
        let started = self.start(room, &mut guard).await;
        let detached = self.transport.detach(room, connection).await;
        let resident = started?;
        let Some(connection) = detached else {
            debug!(%room, %connection, %error, "error for detached connection ignored");
            return Ok(());
        };
        resident.coordinator.on_error(&connection, error).await
    }

    pub async fn message(
        &self,
        room: &RoomId,
        connection: ConnectionId,
        message: &str,
    ) -> Result<(), RoomError> {
        let slot = self.slot(room).await;
        let mut guard = slot.lock().await;
        let resident = self.start(room, &mut guard).await?;
        let connection = self
            .transport
            .connection(room, connection)
            .await
            .ok_or(TransportError::UnknownConnection(connection))?;
        resident.coordinator.on_message(&connection, message).await
    }

    pub async fn request(
        &self,
        room: &RoomId,
        request: RoomRequest,
    ) -> Result<RoomResponse, RoomError> {
        let slot = self.slot(room).await;
        let mut guard = slot.lock().await;
        let resident = self.start(room, &mut guard).await?;
        resident.coordinator.on_request(request).await
    }

    /// Drops the room's coordinator instance and keeps its connections.
    /// Returns whether an instance was resident.
    pub async fn evict(&self, room: &RoomId) -> bool {
        let Some(slot) = self.slots.read().await.get(room).cloned() else {
            return false;
        };
        let evicted = slot.lock().await.take().is_some();
        if evicted {
            info!(%room, "room instance evicted");
        }
        evicted
    }

    /// Evicts instances idle for at least `max_idle`, then forgets rooms that
    /// have neither an instance nor connections. Coordinators that do not
    /// hibernate are only evicted once their room has no connections.
    pub async fn evict_idle(&self, max_idle: Duration) -> usize {
        self.sweep(max_idle, C::HIBERNATE).await
    }

    /// Like [`RoomHost::evict_idle`] with hibernation turned off: only rooms
    /// without connections lose their instance, and their slots are forgotten.
    pub async fn reclaim_idle(&self, max_idle: Duration) -> usize {
        self.sweep(max_idle, false).await
    }

    async fn sweep(&self, max_idle: Duration, hibernate: bool) -> usize {
        let now = Instant::now();
        let slots: Vec<(RoomId, Arc<Slot<C>>)> = self
            .slots
            .read()
            .await
            .iter()
            .map(|(room, slot)| (room.clone(), slot.clone()))
            .collect();

        let mut evicted = 0;
        for (room, slot) in slots {
            // a held lock means an event is running, so the room is not idle
            let Ok(mut guard) = slot.try_lock() else {
                continue;
            };
            let Some(resident) = guard.as_ref() else {
                continue;
            };
            if now.duration_since(resident.last_active) < max_idle {
                continue;
            }
            if !hibernate && self.transport.connection_count(&room).await > 0 {
                continue;
            }
            guard.take();
            evicted += 1;
            info!(%room, "idle room instance evicted");
        }

        self.reclaim_empty_rooms().await;
        evicted
    }

    async fn reclaim_empty_rooms(&self) {
        let live: HashSet<RoomId> = self.transport.rooms().await.into_iter().collect();
        let mut slots = self.slots.write().await;
        slots.retain(|room, slot| {
            if live.contains(room) || Arc::strong_count(slot) > 1 {
                return true;
            }
            match slot.try_lock() {
                Ok(guard) => guard.is_some(),
                Err(_) => true,
            }
        });
    }

    pub async fn is_resident(&self, room: &RoomId) -> bool {
        let Some(slot) = self.slots.read().await.get(room).cloned() else {
            return false;
        };
        let resident = slot.lock().await.is_some();
        resident
    }

    /// Runs `f` against the resident instance without starting one.
    pub async fn inspect<R>(&self, room: &RoomId, f: impl FnOnce(&C) -> R) -> Option<R> {
        let slot = self.slots.read().await.get(room).cloned()?;
        let guard = slot.lock().await;
        guard.as_ref().map(|resident| f(&resident.coordinator))
    }

    pub async fn room_count(&self) -> usize {
        self.slots.read().await.len()
    }
}

#[cfg(test)]
#[path = "tests/host_tests.rs"]
mod tests;
