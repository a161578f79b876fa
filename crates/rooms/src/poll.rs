use std::error::Error as StdError;

use async_trait::async_trait;
use serde_json::Value;
use shared::{
    domain::Connection,
    protocol::{ClientMessage, Poll, PollDescriptor, PollState},
};
use tracing::{debug, info, warn};

use crate::{
    context::RoomContext,
    coordinator::{decrement_total, Coordinator, RequestMethod, RoomRequest, RoomResponse},
    error::RoomError,
};

/// Connection count plus an optional poll.
///
/// The poll only lives in instance memory: it cannot be rebuilt from the
/// connection set, so an instance recreated after hibernation starts with
/// `poll: None` even if a poll was open before eviction.
pub struct PollCoordinator {
    ctx: RoomContext,
    state: PollState,
}

impl PollCoordinator {
    pub fn state(&self) -> &PollState {
        &self.state
    }

    async fn broadcast(&self) -> Result<(), RoomError> {
        let delivered = self.ctx.broadcast_json(&self.state).await?;
        debug!(room = %self.ctx.id(), total = self.state.total, delivered, "poll broadcast");
        Ok(())
    }

    fn apply_vote(&mut self, option: usize) -> Result<u64, RoomError> {
        let poll = self.state.poll.as_mut().ok_or(RoomError::NoPoll)?;
        Ok(poll.record_vote(option)?)
    }
}

/// Reads a poll write body. `Ok(None)` clears the poll.
///
/// Accepted shapes: a bare `{"title", "options"}` descriptor, the same wrapped
/// as `{"poll": {...}}`, and `{"poll": null}` or `{}` to clear.
pub fn parse_poll_body(body: &[u8]) -> Result<Option<PollDescriptor>, RoomError> {
    let value: Value =
        serde_json::from_slice(body).map_err(|e| RoomError::MalformedBody(e.to_string()))?;
    let Value::Object(mut fields) = value else {
        return Err(RoomError::MalformedBody("expected a JSON object".into()));
    };

    if let Some(wrapped) = fields.remove("poll") {
        return match wrapped {
            Value::Null => Ok(None),
            other => descriptor_from(other).map(Some),
        };
    }
    if fields.contains_key("title") || fields.contains_key("options") {
        return descriptor_from(Value::Object(fields)).map(Some);
    }
    Ok(None)
}

fn descriptor_from(value: Value) -> Result<PollDescriptor, RoomError> {
    if !value.is_object() {
        return Err(RoomError::MalformedBody("poll must be an object".into()));
    }
    serde_json::from_value(value).map_err(|e| RoomError::MalformedBody(e.to_string()))
}

#[async_trait]
impl Coordinator for PollCoordinator {
    const HIBERNATE: bool = true;

    fn create(ctx: RoomContext) -> Self {
        Self {
            ctx,
            state: PollState::default(),
        }
    }

    async fn on_start(&mut self) -> Result<(), RoomError> {
        let connections = self.ctx.connections().await?;
        self.state.total = connections.len() as u64;
        debug!(
            room = %self.ctx.id(),
            total = self.state.total,
            has_poll = self.state.poll.is_some(),
            "poll room rehydrated"
        );
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
        warn!(room = %self.ctx.id(), connection = %connection.id, %error, "poll connection error");
        self.on_close(connection).await
    }

    async fn on_message(
        &mut self,
        connection: &Connection,
        message: &str,
    ) -> Result<(), RoomError> {
        let ClientMessage::Vote { option } = serde_json::from_str::<ClientMessage>(message)
            .map_err(|e| RoomError::InvalidMessage(e.to_string()))?;
        let tally = self.apply_vote(option)?;
        debug!(room = %self.ctx.id(), connection = %connection.id, option, tally, "vote recorded");
        self.broadcast().await
    }

    async fn on_request(&mut self, request: RoomRequest) -> Result<RoomResponse, RoomError> {
        if request.method == RequestMethod::Post {
            let update = parse_poll_body(&request.body)?;
            match &update {
                Some(descriptor) => info!(
                    room = %self.ctx.id(),
                    title = %descriptor.title,
                    options = descriptor.options.len(),
                    "poll created"
                ),
                None => info!(room = %self.ctx.id(), "poll cleared"),
            }
            self.state.poll = update.map(Poll::from_descriptor);
        }

        match &self.state.poll {
            Some(poll) => Ok(RoomResponse::Json(serde_json::to_string(poll)?)),
            None => Ok(RoomResponse::NotFound),
        }
    }
}

#[cfg(test)]
#[path = "tests/poll_tests.rs"]
mod tests;
