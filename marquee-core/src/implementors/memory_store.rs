use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use crate::{
    ChatMessageData, InvitationData, InvitationId, MessageId, NewChatMessage, PlaybackSession,
    PlaybackStatus, RoomData, RoomId, Store, StoreError, UserId,
};

#[derive(Default)]
struct State {
    rooms: HashMap<RoomId, RoomData>,
    invitations: Vec<InvitationData>,
    messages: Vec<ChatMessageData>,
    last_message_id: MessageId,
}

/// A [Store] that keeps everything in memory. Useful for tests and single-process setups.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_room(&self, room: RoomData) {
        self.state.lock().rooms.insert(room.id, room);
    }

    pub fn insert_invitation(&self, invitation: InvitationData) {
        self.state.lock().invitations.push(invitation);
    }

    pub fn room_data(&self, room_id: RoomId) -> Option<RoomData> {
        self.state.lock().rooms.get(&room_id).cloned()
    }

    pub fn invitation(&self, invitation_id: InvitationId) -> Option<InvitationData> {
        self.state
            .lock()
            .invitations
            .iter()
            .find(|i| i.id == invitation_id)
            .cloned()
    }

    /// Returns every message of a room, in insertion order.
    pub fn messages(&self, room_id: RoomId) -> Vec<ChatMessageData> {
        self.state
            .lock()
            .messages
            .iter()
            .filter(|m| m.room_id == room_id)
            .cloned()
            .collect()
    }

    /// Changes the session of a room in place.
    pub fn update_session<F>(&self, room_id: RoomId, f: F)
    where
        F: FnOnce(&mut PlaybackSession),
    {
        if let Some(room) = self.state.lock().rooms.get_mut(&room_id) {
            f(&mut room.session);
            room.is_active = room.session.status == PlaybackStatus::Active;
        }
    }
}

fn room_not_found(room_id: RoomId) -> StoreError {
    StoreError::NotFound {
        resource: "room",
        identifier: room_id.to_string(),
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn room(&self, room_id: RoomId) -> Result<RoomData, StoreError> {
        self.room_data(room_id).ok_or_else(|| room_not_found(room_id))
    }

    async fn rooms_due(
        &self,
        from: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<Vec<RoomData>, StoreError> {
        let state = self.state.lock();

        let mut rooms: Vec<_> = state
            .rooms
            .values()
            .filter(|r| r.scheduled_at >= from && r.scheduled_at <= until)
            .filter(|r| r.session.status == PlaybackStatus::Idle && r.media.is_some())
            .cloned()
            .collect();

        rooms.sort_by_key(|r| r.id);
        Ok(rooms)
    }

    async fn rooms_stale(
        &self,
        started_before: DateTime<Utc>,
    ) -> Result<Vec<RoomData>, StoreError> {
        let state = self.state.lock();

        let mut rooms: Vec<_> = state
            .rooms
            .values()
            .filter(|r| r.session.status == PlaybackStatus::Active)
            .filter(|r| r.session.started_at.is_some_and(|s| s < started_before))
            .cloned()
            .collect();

        rooms.sort_by_key(|r| r.id);
        Ok(rooms)
    }

    async fn save_session(
        &self,
        room_id: RoomId,
        session: &PlaybackSession,
    ) -> Result<(), StoreError> {
        let mut state = self.state.lock();
        let room = state
            .rooms
            .get_mut(&room_id)
            .ok_or_else(|| room_not_found(room_id))?;

        room.session = session.clone();
        room.is_active = session.status == PlaybackStatus::Active;

        Ok(())
    }

    async fn invitations_for(
        &self,
        room_id: RoomId,
        user_id: UserId,
    ) -> Result<Vec<InvitationData>, StoreError> {
        Ok(self
            .state
            .lock()
            .invitations
            .iter()
            .filter(|i| i.room_id == room_id && i.invitee_id == user_id)
            .cloned()
            .collect())
    }

    async fn invitation_by_token(&self, token: &str) -> Result<InvitationData, StoreError> {
        self.state
            .lock()
            .invitations
            .iter()
            .find(|i| i.token == token)
            .cloned()
            .ok_or_else(|| StoreError::NotFound {
                resource: "invitation",
                identifier: token.to_string(),
            })
    }

    async fn mark_invitation_used(
        &self,
        invitation_id: InvitationId,
    ) -> Result<bool, StoreError> {
        let mut state = self.state.lock();
        let invitation = state
            .invitations
            .iter_mut()
            .find(|i| i.id == invitation_id)
            .ok_or_else(|| StoreError::NotFound {
                resource: "invitation",
                identifier: invitation_id.to_string(),
            })?;

        if invitation.used {
            return Ok(false);
        }

        invitation.used = true;
        Ok(true)
    }

    async fn recent_messages(
        &self,
        room_id: RoomId,
        limit: usize,
    ) -> Result<Vec<ChatMessageData>, StoreError> {
        let mut messages = self.messages(room_id);
        messages.sort_by_key(|m| (m.created_at, m.id));

        let skip = messages.len().saturating_sub(limit);
        Ok(messages.split_off(skip))
    }

    async fn create_message(
        &self,
        message: NewChatMessage,
    ) -> Result<ChatMessageData, StoreError> {
        let mut state = self.state.lock();

        if !state.rooms.contains_key(&message.room_id) {
            return Err(room_not_found(message.room_id));
        }

        state.last_message_id += 1;

        let created = ChatMessageData {
            id: state.last_message_id,
            room_id: message.room_id,
            author_id: message.author_id,
            author_name: message.author_name,
            content: message.content,
            created_at: message.created_at,
        };

        state.messages.push(created.clone());
        Ok(created)
    }
}
