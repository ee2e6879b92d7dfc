use crate::db::models::PollOptionId;
use serde::{Deserialize, Serialize};

/// A single counter change, broadcast to every subscriber of the poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeltaEvent {
    pub poll_option_id: PollOptionId,
    pub votes: i64,
}

impl DeltaEvent {
    pub fn new(poll_option_id: PollOptionId, votes: i64) -> Self {
        Self {
            poll_option_id,
            votes,
        }
    }

    pub fn to_message(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Per-subscriber delivery failure. Logged by the hub, never surfaced to
/// the publisher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HubDeliveryFault {
    /// The subscriber's queue is full; it misses this delta.
    Lagging,
    /// The subscriber's receiver is gone; it is pruned from the registry.
    Closed,
}
