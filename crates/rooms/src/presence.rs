use std::error::Error as StdError;

use async_trait::async_trait;
use shared::{domain::Connection, protocol::PresenceState};
use tracing::{debug, warn};

use crate::{
    context::RoomContext,
    coordinator::{decrement_total, Coordinator},
    error::RoomError,
};

/// Tracks how many connections a room has and broadcasts `{"total": n}`.
pub struct PresenceCoordinator {
    ctx: RoomContext,
    state: PresenceState,
}

impl PresenceCoordinator {
    pub fn state(&self) -> PresenceState {
        self.state
    }

    async fn broadcast(&self) -> Result<(), RoomError> {
        let delivered = self.ctx.broadcast_json(&self.state).await?;
        debug!(room = %self.ctx.id(), total = self.state.total, delivered, "presence broadcast");
        Ok(())
    }
}

#[async_trait]
impl Coordinator for PresenceCoordinator {
    const HIBERNATE: bool = true;

    fn create(ctx: RoomContext) -> Self {
        Self {
            ctx,
            state: PresenceState::default(),
        }
    }

    async fn on_start(&mut self) -> Result<(), RoomError> {
        let connections = self.ctx.connections().await?;
        self.state.total = connections.len() as u64;
        debug!(room = %self.ctx.id(), total = self.state.total, "presence rehydrated");
        Ok(())
    }

    async fn on_connect(&mut self, _connection: &Connection) -> Result<(), RoomError> {
        self.state.total += 1;
        self.broadcast().await
    }

    async fn on_close(&mut self, _connection: &Connection) -> Result<(), RoomError> {
        decrement_total(&mut self.state.total, self.ctx.id());
        self.broadcast().await
    }

    async fn on_error(
        &mut self,
        connection: &Connection,
        error: &(dyn StdError + Send + Sync),
    ) -> Result<(), RoomError> {
        warn!(
            room = %self.ctx.id(),
            connection = %connection.id,
            %error,
            "presence connection error"
        );
        self.on_close(connection).await
    }
}

#[cfg(test)]
#[path = "tests/presence_tests.rs"]
mod tests;
