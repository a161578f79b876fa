use std::{fmt, str::FromStr};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

pub const MAX_ROOM_ID_BYTES: usize = 128;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RoomId(String);

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvalidRoomId {
    #[error("room id must not be empty")]
    Empty,
    #[error("room id exceeds {} bytes", MAX_ROOM_ID_BYTES)]
    TooLong,
    #[error("room id contains invalid character {0:?}")]
    InvalidChar(char),
}

impl RoomId {
    pub fn new(raw: impl Into<String>) -> Result<Self, InvalidRoomId> {
        let raw = raw.into();
        if raw.is_empty() {
            return Err(InvalidRoomId::Empty);
        }
        if raw.len() > MAX_ROOM_ID_BYTES {
            return Err(InvalidRoomId::TooLong);
        }
        if let Some(bad) = raw
            .chars()
            .find(|c| !(c.is_ascii_alphanumeric() || *c == '-' || *c == '_'))
        {
            return Err(InvalidRoomId::InvalidChar(bad));
        }
        Ok(Self(raw))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for RoomId {
    type Err = InvalidRoomId;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for RoomId {
    type Error = InvalidRoomId;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<RoomId> for String {
    fn from(value: RoomId) -> Self {
        value.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConnectionId(pub Uuid);

impl ConnectionId {
    pub fn random() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

/// Which coordinator a room is served by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PartyKind {
    Presence,
    Poll,
}

impl PartyKind {
    /// Resolves a party name from a URL segment. `main` is the presence party.
    pub fn from_segment(segment: &str) -> Option<Self> {
        match segment {
            "presence" | "main" => Some(Self::Presence),
            "poll" => Some(Self::Poll),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Presence => "presence",
            Self::Poll => "poll",
        }
    }
}

/// Transport-assigned metadata for one open connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Connection {
    pub id: ConnectionId,
    pub room: RoomId,
    pub connected_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote: Option<String>,
}

impl Connection {
    pub fn new(room: RoomId, remote: Option<String>) -> Self {
        Self {
            id: ConnectionId::random(),
            room,
            connected_at: Utc::now(),
            remote,
        }
    }
}

#[cfg(test)]
#[path = "tests/domain_tests.rs"]
mod tests;
