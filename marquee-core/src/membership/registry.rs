use std::sync::Arc;

use dashmap::DashMap;
use log::{debug, warn};
use parking_lot::Mutex;
use tokio::sync::mpsc::{error::TrySendError, Sender};

use crate::{EventEnvelope, Identity, RoomEvent, RoomId, UserId};

use super::{Connection, ConnectionId};

pub type Outbound = Sender<Arc<EventEnvelope>>;

struct Member {
    connection: Connection,
    sender: Outbound,
}

#[derive(Default)]
struct Group {
    /// The sequence number of the last delivered event.
    sequence: u64,
    members: Vec<Member>,
}

/// Keeps track of which connections belong to which room, and delivers events to them.
#[derive(Default)]
pub struct Registry {
    groups: DashMap<RoomId, Arc<Mutex<Group>>>,
}

impl Registry {
    pub fn insert(&self, connection: Connection, sender: Outbound) {
        // The map entry stays locked until the member is in, so the group cannot be pruned meanwhile
        self.groups
            .entry(connection.room_id)
            .or_default()
            .lock()
            .members
            .push(Member { connection, sender });
    }

    /// Removes a connection from its room. Returns false if it was not there.
    pub fn leave(&self, room_id: RoomId, connection_id: ConnectionId) -> bool {
        let Some(group) = self.groups.get(&room_id).map(|g| g.clone()) else {
            return false;
        };

        let removed = {
            let mut group = group.lock();
            let before = group.members.len();
            group.members.retain(|m| m.connection.id != connection_id);

            group.members.len() != before
        };

        self.prune(room_id);
        removed
    }

    /// Delivers an event to every connection of a room, and returns its sequence number.
    /// Returns `None` if nobody is in the room.
    ///
    /// Never waits on a connection. One that is closed or too far behind is removed.
    pub fn deliver(&self, room_id: RoomId, event: RoomEvent) -> Option<u64> {
        let group = self.groups.get(&room_id).map(|g| g.clone())?;
        let sequence = Self::deliver_to(&mut group.lock(), room_id, event);

        self.prune(room_id);
        Some(sequence)
    }

    fn deliver_to(group: &mut Group, room_id: RoomId, event: RoomEvent) -> u64 {
        group.sequence += 1;

        let recipient = event.recipient();
        let envelope = Arc::new(EventEnvelope {
            room_id,
            sequence: Some(group.sequence),
            event,
        });

        group.members.retain(|member| {
            let connection = &member.connection;

            if recipient.is_some_and(|user_id| user_id != connection.identity.user_id) {
                return true;
            }

            match member.sender.try_send(envelope.clone()) {
                Ok(()) => true,
                Err(TrySendError::Full(_)) => {
                    warn!(
                        "Dropping connection {} of user {} in room {}, it is too far behind",
                        connection.id, connection.identity.user_id, room_id
                    );
                    false
                }
                Err(TrySendError::Closed(_)) => {
                    debug!(
                        "Removing closed connection {} from room {}",
                        connection.id, room_id
                    );
                    false
                }
            }
        });

        group.sequence
    }

    pub fn contains(&self, room_id: RoomId, connection_id: ConnectionId) -> bool {
        self.groups
            .get(&room_id)
            .map(|g| g.lock().members.iter().any(|m| m.connection.id == connection_id))
            .unwrap_or(false)
    }

    /// Returns the connections of a room.
    pub fn connections(&self, room_id: RoomId) -> Vec<Connection> {
        self.groups
            .get(&room_id)
            .map(|g| {
                g.lock()
                    .members
                    .iter()
                    .map(|m| m.connection.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Returns the identity of a user connected to a room.
    pub fn identity_of(&self, room_id: RoomId, user_id: UserId) -> Option<Identity> {
        self.connections(room_id)
            .into_iter()
            .find(|c| c.identity.user_id == user_id)
            .map(|c| c.identity)
    }

    /// Forgets a room once its last member is gone. Sequence numbers start over after.
    fn prune(&self, room_id: RoomId) {
        self.groups
            .remove_if(&room_id, |_, group| group.lock().members.is_empty());
    }

    #[cfg(test)]
    fn room_count(&self) -> usize {
        self.groups.len()
    }
}
