//! Per-room coordinators that keep a small shared state in memory and push it
//! to every connection of the room after each change.
//!
//! A coordinator instance can be dropped while its connections stay open. The
//! [`RoomHost`] recreates it on the next event and the coordinator rebuilds
//! what it can from the live connection set in [`Coordinator::on_start`].

pub mod context;
pub mod coordinator;
pub mod error;
pub mod host;
pub mod poll;
pub mod presence;
pub mod transport;

pub use context::RoomContext;
pub use coordinator::{Coordinator, RequestMethod, RoomRequest, RoomResponse};
pub use error::{RoomError, TransportError};
pub use host::RoomHost;
pub use poll::{parse_poll_body, PollCoordinator};
pub use presence::PresenceCoordinator;
pub use transport::{LocalTransport, RoomTransport};
