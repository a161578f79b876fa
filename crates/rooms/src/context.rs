use std::sync::Arc;

use serde::Serialize;
use shared::domain::{Connection, RoomId};

use crate::{error::RoomError, transport::RoomTransport};

/// A coordinator's handle on its room: the id plus the transport's view of
/// the room's connections. Connections are never owned through this handle.
#[derive(Clone)]
pub struct RoomContext {
    id: RoomId,
    transport: Arc<dyn RoomTransport>,
}

impl RoomContext {
    pub fn new(id: RoomId, transport: Arc<dyn RoomTransport>) -> Self {
        Self { id, transport }
    }

    pub fn id(&self) -> &RoomId {
        &self.id
    }

    pub async fn connections(&self) -> Result<Vec<Connection>, RoomError> {
        Ok(self.transport.connections(&self.id).await?)
    }

    pub async fn broadcast_json<T: Serialize + Sync>(&self, state: &T) -> Result<usize, RoomError> {
        let payload = serde_json::to_string(state)?;
        Ok(self.transport.broadcast(&self.id, &payload).await)
    }
}
