//! Fixtures and fake collaborators for tests.

use std::{
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::{
    implementors::MemoryStore, ActionReceiver, BotBackend, BotError, BotRequest, BotStream,
    ChatMessageData, Config, ControlAction, Coordinator, CoordinatorContext, Frame, Grants,
    Identity, IngressInfo, InvitationData, InvitationId, MediaData, MediaTransport,
    NewChatMessage, PlaybackSession, RoomData, RoomId, Store, StoreError, TransportError, UserId,
};

pub fn identity(user_id: UserId) -> Identity {
    Identity {
        user_id,
        username: format!("user{}", user_id),
        email: format!("user{}@example.com", user_id),
    }
}

pub fn room(id: RoomId, creator_id: UserId) -> RoomData {
    RoomData {
        id,
        name: format!("Room {}", id),
        creator_id,
        transport_room: format!("room-{}", id),
        scheduled_at: Utc::now(),
        duration_minutes: 120,
        media: Some(MediaData {
            id,
            title: format!("Movie {}", id),
            file_path: format!("movies/room-{}.mp4", id),
            hls_path: None,
            conversion: Default::default(),
        }),
        is_active: false,
        session: Default::default(),
    }
}

pub fn invitation(
    id: InvitationId,
    room_id: RoomId,
    invitee_id: UserId,
    expires_at: DateTime<Utc>,
) -> InvitationData {
    InvitationData {
        id,
        room_id,
        invitee_id,
        email: format!("user{}@example.com", invitee_id),
        token: format!("token-{}", id),
        expires_at,
        used: false,
    }
}

/// A transport that records what it was asked to do.
#[derive(Default)]
pub struct FakeTransport {
    pub created: Mutex<Vec<(String, String)>>,
    pub stopped: Mutex<Vec<String>>,
    /// Refuse to create ingresses.
    pub fail_ingress: AtomicBool,
    /// Pretend every ingress has disappeared.
    pub lose_ingresses: AtomicBool,
    /// Suspend before answering.
    pub slow: AtomicBool,
}

#[async_trait]
impl MediaTransport for FakeTransport {
    async fn create_ingress(
        &self,
        room_name: &str,
        source_url: &str,
    ) -> Result<IngressInfo, TransportError> {
        if self.slow.load(Ordering::SeqCst) {
            for _ in 0..10 {
                tokio::task::yield_now().await;
            }
        }

        if self.fail_ingress.load(Ordering::SeqCst) {
            return Err(TransportError::Request("ingress refused".to_string()));
        }

        let mut created = self.created.lock();
        created.push((room_name.to_string(), source_url.to_string()));

        Ok(IngressInfo {
            ingress_id: format!("IN_{}", created.len()),
            url: None,
        })
    }

    async fn stop_ingress(&self, ingress_id: &str) -> Result<(), TransportError> {
        if self.lose_ingresses.load(Ordering::SeqCst) {
            return Err(TransportError::NotFound(ingress_id.to_string()));
        }

        self.stopped.lock().push(ingress_id.to_string());
        Ok(())
    }

    fn issue_access_token(
        &self,
        identity: &str,
        room_name: &str,
        _grants: Grants,
    ) -> Result<String, TransportError> {
        Ok(format!("token:{}:{}", identity, room_name))
    }
}

/// A bot backend producing a fixed number of empty frames per stream.
pub struct FakeBot {
    pub frames: AtomicUsize,
    pub fail_prepare: AtomicBool,
    /// Break every stream on its first frame.
    pub fail_frames: AtomicBool,
    pub requests: Mutex<Vec<BotRequest>>,
    pub published: Arc<AtomicUsize>,
    pub closed: Arc<AtomicBool>,
}

pub struct FakeBotStream {
    remaining: usize,
    broken: bool,
    published: Arc<AtomicUsize>,
    closed: Arc<AtomicBool>,
}

impl FakeBot {
    pub fn new(frames: usize) -> Arc<Self> {
        Arc::new(Self {
            frames: AtomicUsize::new(frames),
            fail_prepare: AtomicBool::new(false),
            fail_frames: AtomicBool::new(false),
            requests: Default::default(),
            published: Default::default(),
            closed: Default::default(),
        })
    }

    pub fn stream(&self) -> FakeBotStream {
        FakeBotStream {
            remaining: self.frames.load(Ordering::SeqCst),
            broken: self.fail_frames.load(Ordering::SeqCst),
            published: self.published.clone(),
            closed: self.closed.clone(),
        }
    }
}

#[async_trait]
impl BotBackend for FakeBot {
    async fn prepare(&self, request: BotRequest) -> Result<Box<dyn BotStream>, BotError> {
        self.requests.lock().push(request);

        if self.fail_prepare.load(Ordering::SeqCst) {
            return Err(BotError::Source("source unavailable".to_string()));
        }

        Ok(Box::new(self.stream()))
    }
}

#[async_trait]
impl BotStream for FakeBotStream {
    fn frame_rate(&self) -> Option<f32> {
        Some(25.)
    }

    async fn next_frame(&mut self) -> Result<Option<Frame>, BotError> {
        if self.broken {
            return Err(BotError::Source("decoder crashed".to_string()));
        }

        if self.remaining == 0 {
            return Ok(None);
        }

        self.remaining -= 1;

        Ok(Some(Frame {
            data: vec![],
            position: Duration::ZERO,
        }))
    }

    async fn publish(&mut self, _frame: Frame) -> Result<(), BotError> {
        self.published.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn close(self: Box<Self>) -> Result<(), BotError> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// A coordinator wired to in-memory collaborators. Queued actions are not performed,
/// they can be inspected with [Harness::next_action].
pub struct Harness {
    pub store: Arc<MemoryStore>,
    pub transport: Arc<FakeTransport>,
    pub bot: Arc<FakeBot>,
    pub coordinator: Coordinator,
    actions: Mutex<ActionReceiver>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(Config::default())
    }

    pub fn with_config(config: Config) -> Self {
        let store = Arc::new(MemoryStore::new());
        let transport = Arc::new(FakeTransport::default());
        let bot = FakeBot::new(1_000_000);

        let coordinator = Coordinator::new(config, store.clone(), transport.clone(), bot.clone());
        let actions = coordinator
            .action_receiver
            .lock()
            .take()
            .expect("actions are not taken yet");

        Self {
            store,
            transport,
            bot,
            coordinator,
            actions: Mutex::new(actions),
        }
    }

    pub fn context(&self) -> CoordinatorContext {
        self.coordinator.context.clone()
    }

    /// Inserts a room created by user 1, due now.
    pub fn room(&self, id: RoomId) -> RoomData {
        let room = room(id, 1);
        self.store.insert_room(room.clone());
        room
    }

    /// Invites a user to a room for the next day.
    pub fn invite(&self, room_id: RoomId, user_id: UserId) -> InvitationData {
        let id = room_id * 1000 + user_id;
        let invitation = invitation(id, room_id, user_id, Utc::now() + chrono::Duration::days(1));

        self.store.insert_invitation(invitation.clone());
        invitation
    }

    /// Persists a message directly, without publishing it.
    pub async fn post(&self, room_id: RoomId, user_id: UserId, text: &str) -> ChatMessageData {
        self.store
            .create_message(NewChatMessage {
                room_id,
                author_id: user_id,
                author_name: format!("user{}", user_id),
                content: text.to_string(),
                created_at: Utc::now(),
            })
            .await
            .expect("message is stored")
    }

    pub fn next_action(&self) -> Option<ControlAction> {
        self.actions.lock().try_recv().ok()
    }
}

/// A memory store that can suspend the next history read until released.
#[derive(Default)]
pub struct SuspendingStore {
    pub inner: MemoryStore,
    /// Suspend the next call to `recent_messages`.
    pub suspend: AtomicBool,
    /// Notified once a history read is suspended.
    pub suspended: Notify,
    pub release: Notify,
}

#[async_trait]
impl Store for SuspendingStore {
    async fn room(&self, room_id: RoomId) -> Result<RoomData, StoreError> {
        self.inner.room(room_id).await
    }

    async fn rooms_due(
        &self,
        from: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<Vec<RoomData>, StoreError> {
        self.inner.rooms_due(from, until).await
    }

    async fn rooms_stale(
        &self,
        started_before: DateTime<Utc>,
    ) -> Result<Vec<RoomData>, StoreError> {
        self.inner.rooms_stale(started_before).await
    }

    async fn save_session(
        &self,
        room_id: RoomId,
        session: &PlaybackSession,
    ) -> Result<(), StoreError> {
        self.inner.save_session(room_id, session).await
    }

    async fn invitations_for(
        &self,
        room_id: RoomId,
        user_id: UserId,
    ) -> Result<Vec<InvitationData>, StoreError> {
        self.inner.invitations_for(room_id, user_id).await
    }

    async fn invitation_by_token(&self, token: &str) -> Result<InvitationData, StoreError> {
        self.inner.invitation_by_token(token).await
    }

    async fn mark_invitation_used(
        &self,
        invitation_id: InvitationId,
    ) -> Result<bool, StoreError> {
        self.inner.mark_invitation_used(invitation_id).await
    }

    async fn recent_messages(
        &self,
        room_id: RoomId,
        limit: usize,
    ) -> Result<Vec<ChatMessageData>, StoreError> {
        if self.suspend.swap(false, Ordering::SeqCst) {
            self.suspended.notify_one();
            self.release.notified().await;
        }

        self.inner.recent_messages(room_id, limit).await
    }

    async fn create_message(
        &self,
        message: NewChatMessage,
    ) -> Result<ChatMessageData, StoreError> {
        self.inner.create_message(message).await
    }
}
