use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Broadcast payload of a presence room.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresenceState {
    pub total: u64,
}

/// Broadcast payload of a poll room. `poll` serializes as `null` when absent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollState {
    pub total: u64,
    pub poll: Option<Poll>,
}

/// Body of a poll create request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollDescriptor {
    pub title: String,
    pub options: Vec<String>,
}

/// A poll with one tally per option. Both vectors always have the same length.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "PollWire")]
pub struct Poll {
    title: String,
    options: Vec<String>,
    votes: Vec<u64>,
}

#[derive(Deserialize)]
struct PollWire {
    title: String,
    options: Vec<String>,
    votes: Vec<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("poll has {options} options but {votes} tallies")]
pub struct TallyMismatch {
    pub options: usize,
    pub votes: usize,
}

impl TryFrom<PollWire> for Poll {
    type Error = TallyMismatch;

    fn try_from(wire: PollWire) -> Result<Self, Self::Error> {
        if wire.options.len() != wire.votes.len() {
            return Err(TallyMismatch {
                options: wire.options.len(),
                votes: wire.votes.len(),
            });
        }
        Ok(Self {
            title: wire.title,
            options: wire.options,
            votes: wire.votes,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("option {option} is out of range for a poll with {len} options")]
pub struct VoteOutOfRange {
    pub option: usize,
    pub len: usize,
}

impl Poll {
    /// Builds a fresh poll; every tally starts at zero.
    pub fn from_descriptor(descriptor: PollDescriptor) -> Self {
        let votes = vec![0; descriptor.options.len()];
        Self {
            title: descriptor.title,
            options: descriptor.options,
            votes,
        }
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn options(&self) -> &[String] {
        &self.options
    }

    pub fn votes(&self) -> &[u64] {
        &self.votes
    }

    pub fn record_vote(&mut self, option: usize) -> Result<u64, VoteOutOfRange> {
        let len = self.votes.len();
        let tally = self
            .votes
            .get_mut(option)
            .ok_or(VoteOutOfRange { option, len })?;
        *tally = tally.saturating_add(1);
        Ok(*tally)
    }
}

/// Messages a client may send over a poll room socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    Vote { option: usize },
}

#[cfg(test)]
#[path = "tests/protocol_tests.rs"]
mod tests;
