use dashmap::DashSet;
use implementors::LocalBroadcaster;
use log::{error, info, warn};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::{sync::mpsc::unbounded_channel, task::JoinHandle};
use tokio_util::sync::CancellationToken;

mod access;
mod broadcast;
mod chat;
mod config;
mod data;
mod error;
mod events;
mod ingestion;
mod membership;
mod playback;
mod scheduler;
mod store;
mod transport;
mod util;

pub mod implementors;

#[cfg(test)]
mod testing;

pub use access::*;
pub use broadcast::*;
pub use chat::*;
pub use config::*;
pub use data::*;
pub use error::*;
pub use events::*;
pub use ingestion::*;
pub use membership::*;
pub use playback::*;
pub use scheduler::*;
pub use store::*;
pub use transport::*;
pub use util::*;

/// The room session coordinator, facilitating membership, chat, and the playback of rooms.
pub struct Coordinator {
    context: CoordinatorContext,
    action_receiver: Mutex<Option<ActionReceiver>>,
    shutdown: CancellationToken,

    pub access: Arc<Access>,
    pub chat: Arc<Chat>,
    pub membership: Membership,
    pub controller: Arc<Controller>,
    pub scheduler: Arc<Scheduler>,
}

/// A type passed to the components of the coordinator, to access collaborators, queue actions, and publish events.
#[derive(Clone)]
pub struct CoordinatorContext {
    pub config: Config,
    pub store: Arc<dyn Store>,
    pub transport: Arc<dyn MediaTransport>,
    pub registry: Arc<Registry>,

    broadcaster: Arc<dyn Broadcaster>,
    action_sender: ActionSender,
    /// Actions that are queued or being performed.
    pending: Arc<DashSet<ActionKey>>,
}

impl Coordinator {
    /// Creates a coordinator that publishes events to the connections of this process only.
    pub fn new(
        config: Config,
        store: Arc<dyn Store>,
        transport: Arc<dyn MediaTransport>,
        bot: Arc<dyn BotBackend>,
    ) -> Self {
        Self::with_broadcaster(config, store, transport, bot, |registry| {
            Arc::new(LocalBroadcaster::new(registry))
        })
    }

    /// Creates a coordinator with a custom broadcaster, which is given the registry to deliver to.
    pub fn with_broadcaster<F>(
        config: Config,
        store: Arc<dyn Store>,
        transport: Arc<dyn MediaTransport>,
        bot: Arc<dyn BotBackend>,
        create_broadcaster: F,
    ) -> Self
    where
        F: FnOnce(Arc<Registry>) -> Arc<dyn Broadcaster>,
    {
        let (action_sender, action_receiver) = unbounded_channel();
        let registry = Arc::new(Registry::default());
        let broadcaster = create_broadcaster(registry.clone());

        let context = CoordinatorContext {
            config,
            store,
            transport,
            registry,

            broadcaster,
            action_sender,
            pending: Default::default(),
        };

        let access = Arc::new(Access::new(&context));
        let chat = Arc::new(Chat::new(&context));
        let membership = Membership::new(&context, access.clone());
        let controller = Arc::new(Controller::new(&context, chat.clone(), bot));
        let scheduler = Arc::new(Scheduler::new(&context));

        Self {
            context,
            action_receiver: Mutex::new(Some(action_receiver)),
            shutdown: CancellationToken::new(),

            access,
            chat,
            membership,
            controller,
            scheduler,
        }
    }

    /// Spawns the action handler and the scheduler. Does nothing if they already run.
    pub fn run(&self) -> Vec<JoinHandle<()>> {
        let Some(action_receiver) = self.action_receiver.lock().take() else {
            warn!("Coordinator is already running");
            return vec![];
        };

        let handler = spawn_action_handler(
            self.controller.clone(),
            action_receiver,
            self.shutdown.clone(),
        );

        let scheduler = {
            let scheduler = self.scheduler.clone();
            let shutdown = self.shutdown.clone();

            tokio::spawn(async move { scheduler.run(shutdown).await })
        };

        vec![handler, scheduler]
    }

    /// Stops the scheduler and the action handler, and cancels every fallback bot.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        self.controller.shutdown().await;
    }

    pub fn config(&self) -> &Config {
        &self.context.config
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.context.registry
    }

    /// Joins a room. See [Membership::join].
    pub async fn join(
        &self,
        room_id: RoomId,
        identity: Identity,
    ) -> Result<RoomConnection, CoordinatorError> {
        self.membership.join(room_id, identity).await
    }

    pub fn leave(&self, connection: &Connection) -> bool {
        self.membership.leave(connection)
    }

    /// Handles a message sent by a member over its connection.
    pub async fn handle_message(
        &self,
        connection: &Connection,
        message: ClientMessage,
    ) -> Result<(), CoordinatorError> {
        if !self.context.registry.contains(connection.room_id, connection.id) {
            return Err(CoordinatorError::NotConnected);
        }

        match message {
            ClientMessage::Chat { message } => {
                self.chat.post(connection, &message).await?;
            }
            ClientMessage::Approve { user_id } => {
                self.approve(connection, user_id).await?;
            }
            ClientMessage::Start => {
                let room = self.context.store.room(connection.room_id).await?;
                self.access.ensure_control(&connection.identity, &room)?;
                self.controller.request_start(room.id).await?;
            }
            ClientMessage::Stop => {
                let room = self.context.store.room(connection.room_id).await?;
                self.access.ensure_control(&connection.identity, &room)?;
                self.controller.request_stop(room.id).await?;
            }
        }

        Ok(())
    }

    /// Admits a waiting user, handing them a token for the transport room.
    async fn approve(
        &self,
        connection: &Connection,
        user_id: UserId,
    ) -> Result<(), CoordinatorError> {
        let room = self.context.store.room(connection.room_id).await?;
        self.access.ensure_control(&connection.identity, &room)?;

        let guest = self
            .context
            .registry
            .identity_of(room.id, user_id)
            .ok_or(CoordinatorError::NotConnected)?;

        let token = self.access.participant_token(&guest, &room)?;

        info!("User {} was admitted to room {}", user_id, room);

        self.context
            .publish(room.id, RoomEvent::WaitingRoomApproved { user_id, token })
            .await;

        Ok(())
    }
}

impl CoordinatorContext {
    /// Queues an action, unless the same action is already queued or being performed.
    /// Returns true if it was queued.
    pub fn enqueue(&self, action: ControlAction) -> bool {
        let key = action.key();

        if !self.pending.insert(key) {
            return false;
        }

        if self.action_sender.send(action).is_err() {
            error!("Action handler is gone, dropping {:?}", action);
            self.pending.remove(&key);
            return false;
        }

        true
    }

    pub fn is_pending(&self, key: ActionKey) -> bool {
        self.pending.contains(&key)
    }

    /// Marks a queued action as performed, so it may be queued again.
    pub(crate) fn complete(&self, key: ActionKey) {
        self.pending.remove(&key);
    }

    /// Publishes an event to a room. Failures are logged, not returned,
    /// since whatever caused the event already happened.
    pub async fn publish(&self, room_id: RoomId, event: RoomEvent) {
        let kind = event.kind();

        if let Err(err) = self.broadcaster.publish(room_id, event).await {
            error!("Could not publish {} to room {}: {}", kind, room_id, err);
        }
    }
}

fn spawn_action_handler(
    controller: Arc<Controller>,
    mut action_receiver: ActionReceiver,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let action = tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                action = action_receiver.recv() => action,
            };

            let Some(action) = action else {
                break;
            };

            // Different rooms proceed in parallel, the controller serializes each room
            let controller = controller.clone();
            tokio::spawn(async move { controller.handle(action).await });
        }

        info!("Action handler stopped");
    })
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::testing::{identity, Harness};

    #[tokio::test]
    async fn test_only_the_creator_controls_playback() {
        let harness = Harness::new();
        harness.room(1);
        harness.invite(1, 2);

        let coordinator = &harness.coordinator;
        let creator = coordinator.join(1, identity(1)).await.unwrap();
        let guest = coordinator.join(1, identity(2)).await.unwrap();

        assert!(matches!(
            coordinator
                .handle_message(guest.connection(), ClientMessage::Start)
                .await,
            Err(CoordinatorError::AccessDenied)
        ));
        assert_eq!(harness.next_action(), None);

        coordinator
            .handle_message(creator.connection(), ClientMessage::Start)
            .await
            .unwrap();
        assert_eq!(
            harness.next_action(),
            Some(ControlAction::Start { room_id: 1 })
        );
    }

    #[tokio::test]
    async fn test_approval_reaches_only_the_guest() {
        let harness = Harness::new();
        harness.room(1);
        harness.invite(1, 2);
        harness.invite(1, 3);

        let coordinator = &harness.coordinator;
        let mut creator = coordinator.join(1, identity(1)).await.unwrap();
        let mut guest = coordinator.join(1, identity(2)).await.unwrap();
        let mut bystander = coordinator.join(1, identity(3)).await.unwrap();

        coordinator
            .handle_message(creator.connection(), ClientMessage::Approve { user_id: 2 })
            .await
            .unwrap();

        // Everyone saw the joins, only the guest sees the approval
        for connection in [&mut creator, &mut guest, &mut bystander] {
            while let Ok(envelope) =
                tokio::time::timeout(Duration::from_millis(10), connection.recv()).await
            {
                let envelope = envelope.unwrap();

                if let RoomEvent::WaitingRoomApproved { user_id, token } = &envelope.event {
                    assert_eq!(connection.connection().identity.user_id, 2);
                    assert_eq!(*user_id, 2);
                    assert_eq!(token, "token:user2:room-1");
                }
            }
        }

        // Users that are not connected cannot be approved
        assert!(matches!(
            coordinator
                .handle_message(creator.connection(), ClientMessage::Approve { user_id: 9 })
                .await,
            Err(CoordinatorError::NotConnected)
        ));
    }

    #[tokio::test]
    async fn test_messages_from_dropped_connections_are_rejected() {
        let harness = Harness::new();
        harness.room(1);

        let connection = harness.coordinator.join(1, identity(1)).await.unwrap();
        let descriptor = connection.connection().clone();
        drop(connection);

        assert!(matches!(
            harness
                .coordinator
                .handle_message(
                    &descriptor,
                    ClientMessage::Chat {
                        message: "hello".to_string()
                    }
                )
                .await,
            Err(CoordinatorError::NotConnected)
        ));
    }

    #[tokio::test]
    async fn test_running_coordinator_performs_actions() {
        let store = Arc::new(implementors::MemoryStore::new());
        let mut room = testing::room(1, 1);
        // Not due, so only the request below starts it
        room.scheduled_at += chrono::Duration::hours(1);
        store.insert_room(room);

        let coordinator = Coordinator::new(
            Config::default(),
            store.clone(),
            Arc::new(testing::FakeTransport::default()),
            testing::FakeBot::new(10),
        );

        assert_eq!(coordinator.run().len(), 2);
        assert!(coordinator.run().is_empty());

        coordinator.controller.request_start(1).await.unwrap();

        let mut status = PlaybackStatus::Idle;
        for _ in 0..100 {
            status = store.room_data(1).unwrap().session.status;

            if status == PlaybackStatus::Active {
                break;
            }

            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        assert_eq!(status, PlaybackStatus::Active);
        coordinator.shutdown().await;
    }
}
