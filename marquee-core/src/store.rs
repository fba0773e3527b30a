use std::error::Error;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::{
    ChatMessageData, InvitationData, InvitationId, NewChatMessage, PlaybackSession, RoomData,
    RoomId, UserId,
};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{resource} with identifier {identifier} not found")]
    NotFound {
        resource: &'static str,
        identifier: String,
    },
    #[error("Internal store error: {0}")]
    Internal(Box<dyn Error + Send + Sync>),
}

/// The persistence the coordinator needs.
#[async_trait]
pub trait Store: Send + Sync {
    async fn room(&self, room_id: RoomId) -> Result<RoomData, StoreError>;

    /// Returns idle rooms with media, scheduled within `[from, until]`.
    async fn rooms_due(
        &self,
        from: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<Vec<RoomData>, StoreError>;

    /// Returns active rooms that started before `started_before`.
    async fn rooms_stale(&self, started_before: DateTime<Utc>)
        -> Result<Vec<RoomData>, StoreError>;

    /// Persists the playback session of a room, and the derived `is_active` flag.
    async fn save_session(
        &self,
        room_id: RoomId,
        session: &PlaybackSession,
    ) -> Result<(), StoreError>;

    async fn invitations_for(
        &self,
        room_id: RoomId,
        user_id: UserId,
    ) -> Result<Vec<InvitationData>, StoreError>;

    async fn invitation_by_token(&self, token: &str) -> Result<InvitationData, StoreError>;

    /// Marks an invitation as used.
    /// Returns false if it was already used, so at most one caller ever gets true.
    async fn mark_invitation_used(&self, invitation_id: InvitationId)
        -> Result<bool, StoreError>;

    /// Returns the newest `limit` messages of a room, oldest first.
    async fn recent_messages(
        &self,
        room_id: RoomId,
        limit: usize,
    ) -> Result<Vec<ChatMessageData>, StoreError>;

    async fn create_message(&self, message: NewChatMessage)
        -> Result<ChatMessageData, StoreError>;
}
