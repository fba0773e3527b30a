//! An in-memory [Database] for tests.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use marquee_core::{
    implementors::MemoryStore, ChatMessageData, InvitationData, InvitationId, MediaData, MediaId,
    NewChatMessage, PlaybackSession, PrimaryKey, RoomData, RoomId, Store, StoreError, UserId,
};
use parking_lot::Mutex;

use crate::{
    Database, DatabaseError, DatabaseResult, NewInvitation, NewMedia, NewRoom, NewSession,
    NewUser, Result, SessionData, UserData,
};

#[derive(Default)]
struct Accounts {
    users: Vec<UserData>,
    sessions: Vec<SessionData>,
    media: Vec<MediaData>,
    rooms: Vec<RoomId>,
    last_id: PrimaryKey,
}

impl Accounts {
    fn next_id(&mut self) -> PrimaryKey {
        self.last_id += 1;
        self.last_id
    }
}

#[derive(Default)]
pub struct MemoryDatabase {
    pub store: MemoryStore,
    accounts: Mutex<Accounts>,
}

fn not_found(resource: &'static str, identifier: &'static str) -> DatabaseError {
    DatabaseError::NotFound {
        resource,
        identifier,
    }
}

impl MemoryDatabase {
    fn room_data(&self, room_id: RoomId) -> Result<RoomData> {
        self.store
            .room_data(room_id)
            .ok_or_else(|| not_found("room", "id"))
    }
}

#[async_trait]
impl Store for MemoryDatabase {
    async fn room(&self, room_id: RoomId) -> std::result::Result<RoomData, StoreError> {
        self.store.room(room_id).await
    }

    async fn rooms_due(
        &self,
        from: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> std::result::Result<Vec<RoomData>, StoreError> {
        self.store.rooms_due(from, until).await
    }

    async fn rooms_stale(
        &self,
        started_before: DateTime<Utc>,
    ) -> std::result::Result<Vec<RoomData>, StoreError> {
        self.store.rooms_stale(started_before).await
    }

    async fn save_session(
        &self,
        room_id: RoomId,
        session: &PlaybackSession,
    ) -> std::result::Result<(), StoreError> {
        self.store.save_session(room_id, session).await
    }

    async fn invitations_for(
        &self,
        room_id: RoomId,
        user_id: UserId,
    ) -> std::result::Result<Vec<InvitationData>, StoreError> {
        self.store.invitations_for(room_id, user_id).await
    }

    async fn invitation_by_token(
        &self,
        token: &str,
    ) -> std::result::Result<InvitationData, StoreError> {
        self.store.invitation_by_token(token).await
    }

    async fn mark_invitation_used(
        &self,
        invitation_id: InvitationId,
    ) -> std::result::Result<bool, StoreError> {
        self.store.mark_invitation_used(invitation_id).await
    }

    async fn recent_messages(
        &self,
        room_id: RoomId,
        limit: usize,
    ) -> std::result::Result<Vec<ChatMessageData>, StoreError> {
        self.store.recent_messages(room_id, limit).await
    }

    async fn create_message(
        &self,
        message: NewChatMessage,
    ) -> std::result::Result<ChatMessageData, StoreError> {
        self.store.create_message(message).await
    }
}

#[async_trait]
impl Database for MemoryDatabase {
    async fn user_by_id(&self, user_id: UserId) -> Result<UserData> {
        let accounts = self.accounts.lock();

        accounts
            .users
            .iter()
            .find(|u| u.id == user_id)
            .cloned()
            .ok_or_else(|| not_found("user", "id"))
    }

    async fn user_by_username(&self, username: &str) -> Result<UserData> {
        let accounts = self.accounts.lock();

        accounts
            .users
            .iter()
            .find(|u| u.username == username)
            .cloned()
            .ok_or_else(|| not_found("user", "username"))
    }

    async fn user_by_email(&self, email: &str) -> Result<UserData> {
        let accounts = self.accounts.lock();

        accounts
            .users
            .iter()
            .find(|u| u.email.eq_ignore_ascii_case(email))
            .cloned()
            .ok_or_else(|| not_found("user", "email"))
    }

    async fn create_user(&self, new_user: NewUser) -> Result<UserData> {
        self.user_by_username(&new_user.username)
            .await
            .conflict_or_ok("user", "username", &new_user.username)?;

        let mut accounts = self.accounts.lock();
        let user = UserData {
            id: accounts.next_id(),
            username: new_user.username,
            email: new_user.email,
            password: new_user.password,
            display_name: new_user.display_name,
        };

        accounts.users.push(user.clone());
        Ok(user)
    }

    async fn session_by_token(&self, token: &str) -> Result<SessionData> {
        let accounts = self.accounts.lock();

        accounts
            .sessions
            .iter()
            .find(|s| s.token == token && s.expires_at > Utc::now())
            .cloned()
            .ok_or_else(|| not_found("session", "token"))
    }

    async fn create_session(&self, new_session: NewSession) -> Result<SessionData> {
        let user = self.user_by_id(new_session.user_id).await?;

        let mut accounts = self.accounts.lock();
        let session = SessionData {
            id: accounts.next_id(),
            token: new_session.token,
            user,
            expires_at: new_session.expires_at,
        };

        accounts.sessions.push(session.clone());
        Ok(session)
    }

    async fn delete_session_by_token(&self, token: &str) -> Result<()> {
        let mut accounts = self.accounts.lock();
        let before = accounts.sessions.len();

        accounts.sessions.retain(|s| s.token != token);

        if accounts.sessions.len() == before {
            return Err(not_found("session", "token"));
        }

        Ok(())
    }

    async fn clear_expired_sessions(&self) -> Result<()> {
        let now = Utc::now();
        self.accounts.lock().sessions.retain(|s| s.expires_at > now);

        Ok(())
    }

    async fn create_room(&self, new_room: NewRoom) -> Result<RoomData> {
        self.user_by_id(new_room.creator_id).await?;

        let media = match new_room.media_id {
            Some(media_id) => Some(self.media_by_id(media_id).await?),
            None => None,
        };

        let room = {
            let mut accounts = self.accounts.lock();
            let id = accounts.next_id();
            accounts.rooms.push(id);

            RoomData {
                id,
                name: new_room.name,
                creator_id: new_room.creator_id,
                transport_room: String::new(),
                scheduled_at: new_room.scheduled_at,
                duration_minutes: new_room.duration_minutes,
                media,
                is_active: false,
                session: Default::default(),
            }
        };

        self.store.insert_room(room.clone());
        Ok(room)
    }

    async fn set_transport_room(&self, room_id: RoomId, transport_room: &str) -> Result<()> {
        let mut room = self.room_data(room_id)?;
        room.transport_room = transport_room.to_string();

        self.store.insert_room(room);
        Ok(())
    }

    async fn select_media(&self, room_id: RoomId, media_id: Option<MediaId>) -> Result<()> {
        let media = match media_id {
            Some(media_id) => Some(self.media_by_id(media_id).await?),
            None => None,
        };

        let mut room = self.room_data(room_id)?;
        room.media = media;

        self.store.insert_room(room);
        Ok(())
    }

    async fn rooms_for_user(&self, user_id: UserId) -> Result<Vec<RoomData>> {
        let room_ids = self.accounts.lock().rooms.clone();
        let mut rooms = vec![];

        for room_id in room_ids {
            let room = self.room_data(room_id)?;
            let invited = !self
                .store
                .invitations_for(room_id, user_id)
                .await
                .map_err(|e| DatabaseError::Internal(Box::new(e)))?
                .is_empty();

            if room.creator_id == user_id || invited {
                rooms.push(room);
            }
        }

        Ok(rooms)
    }

    async fn create_invitation(&self, new_invitation: NewInvitation) -> Result<InvitationData> {
        if self
            .store
            .invitation_by_token(&new_invitation.token)
            .await
            .is_ok()
        {
            return Err(DatabaseError::Conflict {
                resource: "invitation",
                field: "token",
                value: new_invitation.token,
            });
        }

        let invitation = InvitationData {
            id: self.accounts.lock().next_id(),
            room_id: new_invitation.room_id,
            invitee_id: new_invitation.invitee_id,
            email: new_invitation.email,
            token: new_invitation.token,
            expires_at: new_invitation.expires_at,
            used: false,
        };

        self.store.insert_invitation(invitation.clone());
        Ok(invitation)
    }

    async fn media_by_id(&self, media_id: MediaId) -> Result<MediaData> {
        let accounts = self.accounts.lock();

        accounts
            .media
            .iter()
            .find(|m| m.id == media_id)
            .cloned()
            .ok_or_else(|| not_found("media", "id"))
    }

    async fn create_media(&self, new_media: NewMedia) -> Result<MediaData> {
        let mut accounts = self.accounts.lock();
        let media = MediaData {
            id: accounts.next_id(),
            title: new_media.title,
            file_path: new_media.file_path,
            hls_path: None,
            conversion: Default::default(),
        };

        accounts.media.push(media.clone());
        Ok(media)
    }
}
