use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use log::{debug, error, info, warn};
use marquee_core::{BroadcastError, Broadcaster, Registry, RoomEvent, RoomId};
use serde::{Deserialize, Serialize};
use sqlx::{postgres::PgListener, query, PgPool};
use tokio::task::JoinHandle;

/// The channel events are relayed on.
pub const EVENTS_CHANNEL: &str = "marquee_events";

/// The payload of a notification on [EVENTS_CHANNEL].
#[derive(Debug, Serialize, Deserialize)]
struct Notification {
    room_id: RoomId,
    event: RoomEvent,
}

/// Publishes events through postgres, so every instance delivers them to its own connections.
///
/// The instance publishing an event receives it like every other instance,
/// see [spawn_relay].
pub struct PgBroadcaster {
    pool: PgPool,
}

impl PgBroadcaster {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl Broadcaster for PgBroadcaster {
    async fn publish(&self, room_id: RoomId, event: RoomEvent) -> Result<(), BroadcastError> {
        let payload = serde_json::to_string(&Notification { room_id, event })?;

        query("SELECT pg_notify($1, $2)")
            .bind(EVENTS_CHANNEL)
            .bind(payload)
            .execute(&self.pool)
            .await
            .map_err(|e| BroadcastError::Relay(e.to_string()))?;

        Ok(())
    }
}

/// Listens for relayed events and delivers them to the connections of this instance.
pub fn spawn_relay(pool: PgPool, registry: Arc<Registry>) -> JoinHandle<()> {
    const RETRY_DELAY: Duration = Duration::from_secs(5);

    tokio::spawn(async move {
        loop {
            let mut listener = match PgListener::connect_with(&pool).await {
                Ok(listener) => listener,
                Err(err) => {
                    error!("Could not connect event relay: {}", err);
                    tokio::time::sleep(RETRY_DELAY).await;
                    continue;
                }
            };

            if let Err(err) = listener.listen(EVENTS_CHANNEL).await {
                error!("Could not listen on {}: {}", EVENTS_CHANNEL, err);
                tokio::time::sleep(RETRY_DELAY).await;
                continue;
            }

            info!("Relaying events from {}", EVENTS_CHANNEL);

            loop {
                match listener.recv().await {
                    Ok(notification) => relay(&registry, notification.payload()),
                    Err(err) => {
                        warn!("Event relay lost its connection: {}", err);
                        break;
                    }
                }
            }

            tokio::time::sleep(RETRY_DELAY).await;
        }
    })
}

fn relay(registry: &Registry, payload: &str) {
    match serde_json::from_str::<Notification>(payload) {
        Ok(Notification { room_id, event }) => {
            if let Some(sequence) = registry.deliver(room_id, event) {
                debug!("Relayed event {} to room {}", sequence, room_id);
            }
        }
        Err(err) => warn!("Ignoring malformed event notification: {}", err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use marquee_core::{Connection, EventEnvelope, Identity};
    use tokio::sync::mpsc;

    fn connect(registry: &Registry, room_id: RoomId) -> mpsc::Receiver<Arc<EventEnvelope>> {
        let (sender, receiver) = mpsc::channel(8);
        let identity = Identity {
            user_id: 1,
            username: "fritz".to_string(),
            email: "fritz@example.com".to_string(),
        };

        registry.insert(Connection::new(room_id, identity), sender);
        receiver
    }

    #[test]
    fn test_notifications_are_delivered_locally() {
        let registry = Registry::default();
        let mut receiver = connect(&registry, 4);

        let payload = serde_json::to_string(&Notification {
            room_id: 4,
            event: RoomEvent::WaitingRoomJoin {
                user_id: 2,
                username: "thea".to_string(),
            },
        })
        .unwrap();

        assert!(payload.contains(r#""type":"waitingroom.join""#));

        relay(&registry, &payload);
        relay(&registry, "not json");

        let envelope = receiver.try_recv().unwrap();
        assert_eq!(envelope.room_id, 4);
        assert_eq!(envelope.sequence, Some(1));
        assert!(receiver.try_recv().is_err());
    }
}
