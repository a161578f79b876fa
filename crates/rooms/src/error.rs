use shared::{
    domain::{ConnectionId, InvalidRoomId},
    error::{ApiError, ErrorCode},
    protocol::VoteOutOfRange,
};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("failed to enumerate connections: {0}")]
    Enumeration(String),
    #[error("connection {0} is not attached to this room")]
    UnknownConnection(ConnectionId),
    #[error("connection {0} is closed")]
    Closed(ConnectionId),
}

#[derive(Debug, Error)]
pub enum RoomError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("malformed request body: {0}")]
    MalformedBody(String),
    #[error("invalid client message: {0}")]
    InvalidMessage(String),
    #[error(transparent)]
    OptionOutOfRange(#[from] VoteOutOfRange),
    #[error("no poll is open in this room")]
    NoPoll,
    #[error(transparent)]
    InvalidRoomId(#[from] InvalidRoomId),
    #[error("failed to encode room state: {0}")]
    Encode(#[from] serde_json::Error),
}

impl RoomError {
    /// Errors caused by what a client sent, as opposed to server-side faults.
    pub fn is_client_fault(&self) -> bool {
        matches!(
            self,
            Self::MalformedBody(_)
                | Self::InvalidMessage(_)
                | Self::OptionOutOfRange(_)
                | Self::NoPoll
                | Self::InvalidRoomId(_)
        )
    }
}

impl From<RoomError> for ApiError {
    fn from(value: RoomError) -> Self {
        let code = if value.is_client_fault() {
            ErrorCode::Validation
        } else {
            ErrorCode::Internal
        };
        ApiError::new(code, value.to_string())
    }
}
