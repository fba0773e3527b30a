use async_trait::async_trait;
use thiserror::Error;

use crate::{RoomEvent, RoomId};

#[derive(Debug, Error)]
pub enum BroadcastError {
    #[error("Could not encode event: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("Could not relay event: {0}")]
    Relay(String),
}

/// Publishes events to the members of a room.
///
/// Implementations end up calling [crate::Registry::deliver] on every instance that may
/// hold connections of the room, exactly once per published event.
#[async_trait]
pub trait Broadcaster: Send + Sync {
    async fn publish(&self, room_id: RoomId, event: RoomEvent) -> Result<(), BroadcastError>;
}
