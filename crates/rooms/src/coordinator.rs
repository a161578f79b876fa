use std::error::Error as StdError;

use async_trait::async_trait;
use shared::domain::{Connection, RoomId};
use tracing::warn;

use crate::{context::RoomContext, error::RoomError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestMethod {
    Get,
    Post,
    Put,
    Delete,
    Other(String),
}

impl RequestMethod {
    pub fn parse(method: &str) -> Self {
        match method.to_ascii_uppercase().as_str() {
            "GET" => Self::Get,
            "POST" => Self::Post,
            "PUT" => Self::Put,
            "DELETE" => Self::Delete,
            other => Self::Other(other.to_owned()),
        }
    }
}

/// An HTTP-style request addressed to a room rather than to a connection.
#[derive(Debug, Clone)]
pub struct RoomRequest {
    pub method: RequestMethod,
    pub body: Vec<u8>,
}

impl RoomRequest {
    pub fn get() -> Self {
        Self {
            method: RequestMethod::Get,
            body: Vec::new(),
        }
    }

    pub fn post(body: impl Into<Vec<u8>>) -> Self {
        Self {
            method: RequestMethod::Post,
            body: body.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoomResponse {
    /// `200 OK` with a JSON body.
    Json(String),
    /// `404 Not Found` with a plain-text body.
    NotFound,
}

/// Lifecycle hooks of one room's coordinator.
///
/// The host calls every hook of a room under the same lock, so a hook sees
/// `&mut self` exclusively from its first mutation through its broadcast.
/// `on_message` and `on_request` are optional capabilities; coordinators that
/// do not serve them keep the defaults.
#[async_trait]
pub trait Coordinator: Send + Sized + 'static {
    /// Whether the host may drop idle instances while connections stay open.
    const HIBERNATE: bool = false;

    fn create(ctx: RoomContext) -> Self;

    /// Runs once per instance, before any other hook. Rebuilds state from the
    /// live connection set and never broadcasts.
    async fn on_start(&mut self) -> Result<(), RoomError>;

    async fn on_connect(&mut self, connection: &Connection) -> Result<(), RoomError>;

    async fn on_close(&mut self, connection: &Connection) -> Result<(), RoomError>;

    async fn on_error(
        &mut self,
        connection: &Connection,
        error: &(dyn StdError + Send + Sync),
    ) -> Result<(), RoomError>;

    async fn on_message(
        &mut self,
        _connection: &Connection,
        _message: &str,
    ) -> Result<(), RoomError> {
        Ok(())
    }

    async fn on_request(&mut self, _request: RoomRequest) -> Result<RoomResponse, RoomError> {
        Ok(RoomResponse::NotFound)
    }
}

/// `total -= 1`, clamped at zero. Reaching the clamp means a close arrived
/// without a matching connect.
pub(crate) fn decrement_total(total: &mut u64, room: &RoomId) {
    match total.checked_sub(1) {
        Some(next) => *total = next,
        None => warn!(%room, "close without matching connect; total stays at zero"),
    }
}

#[cfg(test)]
#[path = "tests/coordinator_tests.rs"]
mod tests;
