use std::sync::Arc;

use async_trait::async_trait;

use crate::{BroadcastError, Broadcaster, Registry, RoomEvent, RoomId};

/// Delivers events straight to the connections of this process.
pub struct LocalBroadcaster {
    registry: Arc<Registry>,
}

impl LocalBroadcaster {
    pub fn new(registry: Arc<Registry>) -> Self {
        Self { registry }
    }
}

#[async_trait]
impl Broadcaster for LocalBroadcaster {
    async fn publish(&self, room_id: RoomId, event: RoomEvent) -> Result<(), BroadcastError> {
        self.registry.deliver(room_id, event);
        Ok(())
    }
}
