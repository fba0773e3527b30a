use std::sync::Arc;

use chrono::{DateTime, Duration, SubsecRound, Utc};
use dashmap::DashMap;
use log::debug;
use tokio::sync::Mutex;

use crate::{
    ChatMessageData, Connection, CoordinatorContext, CoordinatorError, NewChatMessage, RoomEvent,
    RoomId,
};

/// The last timestamp handed out in a room
type Clock = Arc<Mutex<Option<DateTime<Utc>>>>;

/// Posts chat messages, in order.
///
/// Messages of a room are timestamped, persisted and published one at a time,
/// so every member sees them in the same order with strictly increasing timestamps.
pub struct Chat {
    context: CoordinatorContext,
    clocks: DashMap<RoomId, Clock>,
}

impl Chat {
    pub fn new(context: &CoordinatorContext) -> Self {
        Self {
            context: context.clone(),
            clocks: Default::default(),
        }
    }

    /// Persists a message from a connected member and publishes it to the room.
    pub async fn post(
        &self,
        connection: &Connection,
        text: &str,
    ) -> Result<ChatMessageData, CoordinatorError> {
        let content = text.trim();

        if content.is_empty() {
            return Err(CoordinatorError::EmptyMessage);
        }

        let room_id = connection.room_id;
        let author_name = connection
            .identity
            .display_name(self.context.config.display_identity)
            .to_string();

        let clock = self.clock(room_id);
        let mut last = clock.lock().await;
        let timestamp = next_timestamp(*last, Utc::now());

        let message = self
            .context
            .store
            .create_message(NewChatMessage {
                room_id,
                author_id: connection.identity.user_id,
                author_name,
                content: content.to_string(),
                created_at: timestamp,
            })
            .await?;

        *last = Some(timestamp);

        debug!(
            "User {} posted message {} in room {}",
            message.author_id, message.id, room_id
        );

        self.context
            .publish(room_id, RoomEvent::from(&message))
            .await;

        drop(last);
        self.release(room_id, clock);

        Ok(message)
    }

    /// Publishes a message from the coordinator itself. These are not persisted.
    pub async fn announce(&self, room_id: RoomId, text: impl Into<String>) {
        let clock = self.clock(room_id);
        let mut last = clock.lock().await;
        let timestamp = next_timestamp(*last, Utc::now());

        *last = Some(timestamp);

        let event = RoomEvent::ChatMessage {
            message_id: None,
            author: self.context.config.bot_display_name.clone(),
            author_id: None,
            message: text.into(),
            timestamp,
        };

        self.context.publish(room_id, event).await;

        drop(last);
        self.release(room_id, clock);
    }

    fn clock(&self, room_id: RoomId) -> Clock {
        self.clocks.entry(room_id).or_default().clone()
    }

    /// Forgets the clock of a room once nobody uses it, and a new one could not go back in time.
    fn release(&self, room_id: RoomId, clock: Clock) {
        drop(clock);
        let now = Utc::now().trunc_subsecs(6);

        self.clocks.remove_if(&room_id, |_, clock| {
            Arc::strong_count(clock) == 1
                && clock
                    .try_lock()
                    .is_ok_and(|last| (*last).map_or(true, |last| last < now))
        });
    }
}

/// Returns a timestamp strictly after `last`, as close to `now` as possible.
/// Timestamps have microsecond precision, like the ones that get persisted.
fn next_timestamp(last: Option<DateTime<Utc>>, now: DateTime<Utc>) -> DateTime<Utc> {
    let now = now.trunc_subsecs(6);

    match last {
        Some(last) if now <= last => last + Duration::microseconds(1),
        _ => now,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{identity, room, Harness};

    #[test]
    fn test_timestamps_strictly_increase() {
        let now = Utc::now().trunc_subsecs(6);

        assert_eq!(next_timestamp(None, now), now);
        assert_eq!(
            next_timestamp(Some(now), now),
            now + Duration::microseconds(1)
        );
        // A clock going backwards does not matter
        assert_eq!(
            next_timestamp(Some(now), now - Duration::seconds(5)),
            now + Duration::microseconds(1)
        );
        assert_eq!(
            next_timestamp(Some(now - Duration::seconds(5)), now),
            now
        );
    }

    #[tokio::test]
    async fn test_members_see_identical_messages() {
        let harness = Harness::new();
        harness.store.insert_room(room(1, 1));
        harness.invite(1, 2);

        let coordinator = &harness.coordinator;
        let mut alice = coordinator.join(1, identity(1)).await.unwrap();
        let mut bob = coordinator.join(1, identity(2)).await.unwrap();

        let first = coordinator
            .chat
            .post(alice.connection(), "hello")
            .await
            .unwrap();
        let second = coordinator
            .chat
            .post(alice.connection(), "anyone?")
            .await
            .unwrap();
        assert!(second.created_at > first.created_at);

        for connection in [&mut alice, &mut bob] {
            // Both see Bob arriving first
            let arrival = connection.recv().await.unwrap();
            assert_eq!(arrival.event.kind(), "waitingroom.join");

            let a = connection.recv().await.unwrap();
            let b = connection.recv().await.unwrap();

            assert_eq!(a.event, RoomEvent::from(&first));
            assert_eq!(b.event, RoomEvent::from(&second));
            assert!(b.sequence > a.sequence);
        }
    }

    #[tokio::test]
    async fn test_empty_messages_are_rejected() {
        let harness = Harness::new();
        harness.store.insert_room(room(1, 1));

        let connection = harness.coordinator.join(1, identity(1)).await.unwrap();

        assert!(matches!(
            harness.coordinator.chat.post(connection.connection(), "   ").await,
            Err(CoordinatorError::EmptyMessage)
        ));
        assert!(harness.store.messages(1).is_empty());
    }

    #[tokio::test]
    async fn test_clocks_are_released() {
        let harness = Harness::new();
        harness.store.insert_room(room(1, 1));

        let connection = harness.coordinator.join(1, identity(1)).await.unwrap();
        let chat = &harness.coordinator.chat;

        let first = chat.post(connection.connection(), "hello").await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(2)).await;
        chat.announce(1, "Bot joined").await;
        tokio::time::sleep(std::time::Duration::from_millis(2)).await;

        chat.release(1, chat.clock(1));
        assert!(chat.clocks.is_empty());

        let second = chat.post(connection.connection(), "again").await.unwrap();
        assert!(second.created_at > first.created_at);
    }
}
