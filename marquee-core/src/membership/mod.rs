//! Membership decides who is in which room, and hands out the event streams of rooms.

use std::sync::Arc;

use log::{info, warn};
use tokio::sync::mpsc;

use crate::{
    Access, Authorization, CoordinatorContext, CoordinatorError, EventEnvelope, Identity,
    RoomEvent, RoomId,
};

mod connection;
mod registry;

pub use connection::*;
pub use registry::*;

pub struct Membership {
    context: CoordinatorContext,
    access: Arc<Access>,
}

impl Membership {
    pub fn new(context: &CoordinatorContext, access: Arc<Access>) -> Self {
        Self {
            context: context.clone(),
            access,
        }
    }

    /// Joins a room, returning a stream of its events.
    ///
    /// The stream starts with the recent chat history, oldest first,
    /// followed by everything published after the join.
    pub async fn join(
        &self,
        room_id: RoomId,
        identity: Identity,
    ) -> Result<RoomConnection, CoordinatorError> {
        let room = self.context.store.room(room_id).await?;
        let authorization = self.access.authorize(&identity, &room).await?;

        if authorization == Authorization::Denied {
            warn!("User {} was denied access to room {}", identity.user_id, room);
            return Err(CoordinatorError::AccessDenied);
        }

        let (sender, receiver) = mpsc::channel(self.context.config.connection_buffer_size.max(1));

        // Joined before the history is read, so nothing posted meanwhile is missed
        let connection = Connection::new(room_id, identity);
        self.context.registry.insert(connection.clone(), sender);

        let mut events = RoomConnection::new(
            connection.clone(),
            receiver,
            self.context.registry.clone(),
        );

        let history = self
            .context
            .store
            .recent_messages(room_id, self.context.config.history_limit)
            .await?;

        events.replay(
            history
                .iter()
                .map(|message| {
                    Arc::new(EventEnvelope {
                        room_id,
                        sequence: None,
                        event: message.into(),
                    })
                })
                .collect(),
        );

        let identity = &connection.identity;
        let name = identity
            .display_name(self.context.config.display_identity)
            .to_string();

        if let Authorization::InvitedValid(invitation) = authorization {
            if let Err(err) = self.access.consume(&invitation).await {
                warn!("Could not mark invitation {} as used: {}", invitation.id, err);
            }

            self.context
                .publish(
                    room_id,
                    RoomEvent::WaitingRoomJoin {
                        user_id: identity.user_id,
                        username: name.clone(),
                    },
                )
                .await;
        }

        info!(
            "{} joined room {} with connection {}",
            name, room, connection.id
        );

        Ok(events)
    }

    /// Removes a connection from its room. Leaving twice is the same as leaving once.
    pub fn leave(&self, connection: &Connection) -> bool {
        self.context.registry.leave(connection.room_id, connection.id)
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};

    use std::sync::atomic::Ordering;

    use super::*;
    use crate::testing::{
        identity, invitation, room, FakeBot, FakeTransport, Harness, SuspendingStore,
    };
    use crate::{Config, Coordinator};

    #[tokio::test]
    async fn test_join_requires_room_and_access() {
        let harness = Harness::new();
        harness.store.insert_room(room(1, 1));

        let membership = &harness.coordinator.membership;

        assert!(matches!(
            membership.join(2, identity(1)).await,
            Err(CoordinatorError::RoomNotFound)
        ));
        assert!(matches!(
            membership.join(1, identity(2)).await,
            Err(CoordinatorError::AccessDenied)
        ));
        assert!(harness.coordinator.registry().connections(1).is_empty());
    }

    #[tokio::test]
    async fn test_history_is_replayed_oldest_first() {
        let harness = Harness::new();
        harness.store.insert_room(room(1, 1));

        for n in 0..60 {
            harness.post(1, 1, &format!("message {}", n)).await;
        }

        let mut connection = harness.coordinator.join(1, identity(1)).await.unwrap();

        let mut replayed = vec![];
        for _ in 0..50 {
            let envelope = connection.recv().await.unwrap();
            assert_eq!(envelope.sequence, None);

            if let RoomEvent::ChatMessage { message, .. } = &envelope.event {
                replayed.push(message.clone());
            }
        }

        let expected: Vec<_> = (10..60).map(|n| format!("message {}", n)).collect();
        assert_eq!(replayed, expected);

        // Nothing else is queued
        harness.coordinator.leave(connection.connection());
        assert!(connection.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_short_history_is_replayed_whole() {
        let harness = Harness::new();
        harness.store.insert_room(room(1, 1));

        harness.post(1, 1, "first").await;
        harness.post(1, 1, "second").await;

        let mut connection = harness.coordinator.join(1, identity(1)).await.unwrap();
        harness.coordinator.leave(connection.connection());

        let mut count = 0;
        while connection.recv().await.is_some() {
            count += 1;
        }

        assert_eq!(count, 2);
    }

    #[tokio::test]
    async fn test_invited_join_consumes_invitation() {
        let harness = Harness::new();
        harness.store.insert_room(room(1, 1));
        harness
            .store
            .insert_invitation(invitation(1, 1, 2, Utc::now() + Duration::days(1)));

        let mut creator = harness.coordinator.join(1, identity(1)).await.unwrap();
        let guest = harness.coordinator.join(1, identity(2)).await.unwrap();

        assert!(harness.store.invitation(1).unwrap().used);

        let envelope = creator.recv().await.unwrap();
        assert_eq!(
            envelope.event,
            RoomEvent::WaitingRoomJoin {
                user_id: 2,
                username: "user2".to_string()
            }
        );

        // Used invitations still let the invitee back in
        drop(guest);
        assert!(harness.coordinator.join(1, identity(2)).await.is_ok());
    }

    #[tokio::test]
    async fn test_dropping_the_stream_leaves() {
        let harness = Harness::new();
        harness.store.insert_room(room(1, 1));

        let connection = harness.coordinator.join(1, identity(1)).await.unwrap();
        let descriptor = connection.connection().clone();
        assert_eq!(harness.coordinator.registry().connections(1).len(), 1);

        drop(connection);
        assert!(harness.coordinator.registry().connections(1).is_empty());
        assert!(!harness.coordinator.leave(&descriptor));
    }

    #[tokio::test]
    async fn test_messages_posted_while_joining_are_received() {
        let store = Arc::new(SuspendingStore::default());
        store.inner.insert_room(room(1, 1));
        store
            .inner
            .insert_invitation(invitation(1, 1, 2, Utc::now() + Duration::days(1)));

        let coordinator = Coordinator::new(
            Config::default(),
            store.clone(),
            Arc::new(FakeTransport::default()),
            FakeBot::new(0),
        );

        let creator = coordinator.join(1, identity(1)).await.unwrap();
        store.suspend.store(true, Ordering::SeqCst);

        let (guest, posted) = tokio::join!(coordinator.join(1, identity(2)), async {
            store.suspended.notified().await;
            let posted = coordinator.chat.post(creator.connection(), "during join").await;
            store.release.notify_one();
            posted
        });

        let mut guest = guest.unwrap();
        let posted = posted.unwrap();

        let first = guest.recv().await.unwrap();
        assert_eq!(first.event, RoomEvent::from(&posted));

        // The message is not received twice
        let second = guest.recv().await.unwrap();
        assert_eq!(second.event.kind(), "waitingroom.join");
    }
}
