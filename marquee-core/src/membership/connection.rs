use std::{
    collections::{HashSet, VecDeque},
    pin::Pin,
    sync::Arc,
    task::{Context, Poll},
};

use futures_util::Stream;
use tokio::sync::mpsc::Receiver;

use crate::{EventEnvelope, Id, Identity, Labeled, RoomEvent, RoomId};

use super::Registry;

pub type ConnectionId = Id<Connection>;

/// Represents a user's presence in a room
#[derive(Debug, Clone, PartialEq)]
pub struct Connection {
    pub id: ConnectionId,
    pub room_id: RoomId,
    pub identity: Identity,
}

impl Labeled for Connection {
    const LABEL: &'static str = "conn";
}

impl Connection {
    pub fn new(room_id: RoomId, identity: Identity) -> Self {
        Self {
            id: ConnectionId::new(),
            room_id,
            identity,
        }
    }
}

/// A stream of the events of a room, which when dropped removes the [Connection] from the room
pub struct RoomConnection {
    connection: Connection,
    /// Received before anything from the receiver.
    backlog: VecDeque<Arc<EventEnvelope>>,
    receiver: Receiver<Arc<EventEnvelope>>,
    registry: Arc<Registry>,
}

impl RoomConnection {
    pub fn new(
        connection: Connection,
        receiver: Receiver<Arc<EventEnvelope>>,
        registry: Arc<Registry>,
    ) -> Self {
        Self {
            connection,
            backlog: Default::default(),
            receiver,
            registry,
        }
    }

    /// Puts `history` in front of the events delivered so far.
    /// Delivered chat messages that are part of the history are skipped.
    pub(crate) fn replay(&mut self, history: Vec<Arc<EventEnvelope>>) {
        let replayed: HashSet<_> = history.iter().filter_map(|e| message_id(&e.event)).collect();

        let mut delivered = vec![];
        while let Ok(envelope) = self.receiver.try_recv() {
            delivered.push(envelope);
        }

        self.backlog.extend(history);
        self.backlog.extend(delivered.into_iter().filter(|envelope| {
            message_id(&envelope.event).map_or(true, |id| !replayed.contains(&id))
        }));
    }

    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    /// Waits for the next event.
    /// Returns `None` once the connection was removed from the room and everything was received.
    pub async fn recv(&mut self) -> Option<Arc<EventEnvelope>> {
        if let Some(envelope) = self.backlog.pop_front() {
            return Some(envelope);
        }

        self.receiver.recv().await
    }
}

impl Drop for RoomConnection {
    fn drop(&mut self) {
        self.registry
            .leave(self.connection.room_id, self.connection.id);
    }
}

impl Stream for RoomConnection {
    type Item = Arc<EventEnvelope>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if let Some(envelope) = self.backlog.pop_front() {
            return Poll::Ready(Some(envelope));
        }

        self.receiver.poll_recv(cx)
    }
}

fn message_id(event: &RoomEvent) -> Option<crate::MessageId> {
    match event {
        RoomEvent::ChatMessage { message_id, .. } => *message_id,
        _ => None,
    }
}
