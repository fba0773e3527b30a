use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::info;
use marquee_core::{
    ChatMessageData, ConversionStatus, IngressHandle, IngressKind, InvitationData, InvitationId,
    MediaData, MediaId, NewChatMessage, PlaybackSession, PlaybackStatus, RoomData, RoomId, Store,
    StoreError, UserId,
};
use sqlx::{
    migrate::MigrateError, postgres::PgPoolOptions, query, query_as, Error as SqlxError, FromRow,
    PgPool,
};

use crate::{
    Database, DatabaseError, DatabaseResult, IntoDatabaseError, NewInvitation, NewMedia, NewRoom,
    NewSession, NewUser, Result, SessionData, UserData,
};

/// A postgres database implementation for marquee
pub struct PgDatabase {
    pool: PgPool,
}

const ROOM_SELECT: &str = "
    SELECT
        rooms.*,
        media.title AS media_title,
        media.file_path AS media_file_path,
        media.hls_path AS media_hls_path,
        media.conversion_status AS media_conversion_status
    FROM rooms
        LEFT JOIN media ON rooms.media_id = media.id";

#[derive(FromRow)]
struct RoomRow {
    id: RoomId,
    name: String,
    creator_id: UserId,
    transport_room: String,
    scheduled_at: DateTime<Utc>,
    duration_minutes: i32,
    media_id: Option<MediaId>,
    is_active: bool,
    status: String,
    ingress_kind: Option<String>,
    ingress_id: Option<String>,
    ingress_url: Option<String>,
    started_at: Option<DateTime<Utc>>,
    attempt: i32,
    failure: Option<String>,
    media_title: Option<String>,
    media_file_path: Option<String>,
    media_hls_path: Option<String>,
    media_conversion_status: Option<String>,
}

#[derive(FromRow)]
struct MediaRow {
    id: MediaId,
    title: String,
    file_path: String,
    hls_path: Option<String>,
    conversion_status: String,
}

#[derive(FromRow)]
struct InvitationRow {
    id: InvitationId,
    room_id: RoomId,
    invitee_id: UserId,
    email: String,
    token: String,
    expires_at: DateTime<Utc>,
    used: bool,
}

#[derive(FromRow)]
struct MessageRow {
    id: i32,
    room_id: RoomId,
    author_id: UserId,
    author_name: String,
    content: String,
    created_at: DateTime<Utc>,
}

#[derive(FromRow)]
struct SessionRow {
    id: i32,
    token: String,
    expires_at: DateTime<Utc>,
    user_id: UserId,
    username: String,
    email: String,
    password: String,
    display_name: String,
}

fn corrupt(message: String) -> DatabaseError {
    DatabaseError::Internal(message.into())
}

fn parse_conversion(value: &str) -> Result<ConversionStatus> {
    value.parse().map_err(corrupt)
}

impl RoomRow {
    fn into_data(self) -> Result<RoomData> {
        let ingress = match (self.ingress_kind, self.ingress_id) {
            (Some(kind), Some(id)) => Some(IngressHandle {
                kind: kind.parse::<IngressKind>().map_err(corrupt)?,
                id,
                url: self.ingress_url,
            }),
            _ => None,
        };

        let media = match (self.media_id, self.media_title, self.media_file_path) {
            (Some(id), Some(title), Some(file_path)) => Some(MediaData {
                id,
                title,
                file_path,
                hls_path: self.media_hls_path,
                conversion: match self.media_conversion_status {
                    Some(status) => parse_conversion(&status)?,
                    None => ConversionStatus::default(),
                },
            }),
            _ => None,
        };

        Ok(RoomData {
            id: self.id,
            name: self.name,
            creator_id: self.creator_id,
            transport_room: self.transport_room,
            scheduled_at: self.scheduled_at,
            duration_minutes: self.duration_minutes,
            media,
            is_active: self.is_active,
            session: PlaybackSession {
                status: self.status.parse::<PlaybackStatus>().map_err(corrupt)?,
                ingress,
                started_at: self.started_at,
                attempt: u32::try_from(self.attempt).unwrap_or_default(),
                failure: self.failure,
            },
        })
    }
}

impl MediaRow {
    fn into_data(self) -> Result<MediaData> {
        Ok(MediaData {
            id: self.id,
            title: self.title,
            file_path: self.file_path,
            hls_path: self.hls_path,
            conversion: parse_conversion(&self.conversion_status)?,
        })
    }
}

impl From<InvitationRow> for InvitationData {
    fn from(row: InvitationRow) -> Self {
        Self {
            id: row.id,
            room_id: row.room_id,
            invitee_id: row.invitee_id,
            email: row.email,
            token: row.token,
            expires_at: row.expires_at,
            used: row.used,
        }
    }
}

impl From<MessageRow> for ChatMessageData {
    fn from(row: MessageRow) -> Self {
        Self {
            id: row.id,
            room_id: row.room_id,
            author_id: row.author_id,
            author_name: row.author_name,
            content: row.content,
            created_at: row.created_at,
        }
    }
}

impl From<SessionRow> for SessionData {
    fn from(row: SessionRow) -> Self {
        Self {
            id: row.id,
            token: row.token,
            expires_at: row.expires_at,
            user: UserData {
                id: row.user_id,
                username: row.username,
                email: row.email,
                password: row.password,
                display_name: row.display_name,
            },
        }
    }
}

impl PgDatabase {
    pub async fn new(url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(url)
            .await
            .map_err(|e| e.any())?;

        Ok(Self { pool })
    }

    /// Applies the migrations that have not been applied yet.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e: MigrateError| DatabaseError::Internal(Box::new(e)))?;

        info!("Database is up to date");
        Ok(())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn rooms_where(&self, filter: &str, bind: impl RoomBinds) -> Result<Vec<RoomData>> {
        let sql = format!("{} WHERE {} ORDER BY rooms.scheduled_at, rooms.id", ROOM_SELECT, filter);

        bind.apply(query_as::<_, RoomRow>(&sql))
            .fetch_all(&self.pool)
            .await
            .map_err(|e| e.any())?
            .into_iter()
            .map(RoomRow::into_data)
            .collect()
    }

    async fn room_by_id(&self, room_id: RoomId) -> Result<RoomData> {
        let sql = format!("{} WHERE rooms.id = $1", ROOM_SELECT);

        query_as::<_, RoomRow>(&sql)
            .bind(room_id)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| e.not_found_or("room", "id"))?
            .into_data()
    }

    async fn invitation_with_token(&self, token: &str) -> Result<InvitationData> {
        query_as::<_, InvitationRow>("SELECT * FROM invitations WHERE token = $1")
            .bind(token)
            .fetch_one(&self.pool)
            .await
            .map(InvitationData::from)
            .map_err(|e| e.not_found_or("invitation", "token"))
    }
}

type RoomQuery<'q> = sqlx::query::QueryAs<'q, sqlx::Postgres, RoomRow, sqlx::postgres::PgArguments>;

/// The parameters of a room query.
trait RoomBinds {
    fn apply<'q>(self, query: RoomQuery<'q>) -> RoomQuery<'q>;
}

impl RoomBinds for (DateTime<Utc>, DateTime<Utc>) {
    fn apply<'q>(self, query: RoomQuery<'q>) -> RoomQuery<'q> {
        query.bind(self.0).bind(self.1)
    }
}

impl RoomBinds for DateTime<Utc> {
    fn apply<'q>(self, query: RoomQuery<'q>) -> RoomQuery<'q> {
        query.bind(self)
    }
}

impl RoomBinds for UserId {
    fn apply<'q>(self, query: RoomQuery<'q>) -> RoomQuery<'q> {
        query.bind(self)
    }
}

#[async_trait]
impl Store for PgDatabase {
    async fn room(&self, room_id: RoomId) -> std::result::Result<RoomData, StoreError> {
        Ok(self.room_by_id(room_id).await?)
    }

    async fn rooms_due(
        &self,
        from: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> std::result::Result<Vec<RoomData>, StoreError> {
        let rooms = self
            .rooms_where(
                "rooms.status = 'idle'
                    AND rooms.media_id IS NOT NULL
                    AND rooms.scheduled_at BETWEEN $1 AND $2",
                (from, until),
            )
            .await?;

        Ok(rooms)
    }

    async fn rooms_stale(
        &self,
        started_before: DateTime<Utc>,
    ) -> std::result::Result<Vec<RoomData>, StoreError> {
        let rooms = self
            .rooms_where(
                "rooms.status = 'active' AND rooms.started_at < $1",
                started_before,
            )
            .await?;

        Ok(rooms)
    }

    async fn save_session(
        &self,
        room_id: RoomId,
        session: &PlaybackSession,
    ) -> std::result::Result<(), StoreError> {
        let result = query(
            "UPDATE rooms SET
                status = $2,
                ingress_kind = $3,
                ingress_id = $4,
                ingress_url = $5,
                started_at = $6,
                attempt = $7,
                failure = $8,
                is_active = $9
            WHERE id = $1",
        )
        .bind(room_id)
        .bind(session.status.as_str())
        .bind(session.ingress.as_ref().map(|i| i.kind.as_str()))
        .bind(session.ingress.as_ref().map(|i| i.id.clone()))
        .bind(session.ingress.as_ref().and_then(|i| i.url.clone()))
        .bind(session.started_at)
        .bind(i32::try_from(session.attempt).unwrap_or(i32::MAX))
        .bind(session.failure.clone())
        .bind(session.status == PlaybackStatus::Active)
        .execute(&self.pool)
        .await
        .map_err(|e| e.any())?;

        if result.rows_affected() == 0 {
            return Err(DatabaseError::NotFound {
                resource: "room",
                identifier: "id",
            }
            .into());
        }

        Ok(())
    }

    async fn invitations_for(
        &self,
        room_id: RoomId,
        user_id: UserId,
    ) -> std::result::Result<Vec<InvitationData>, StoreError> {
        let invitations =
            query_as::<_, InvitationRow>(
                "SELECT * FROM invitations WHERE room_id = $1 AND invitee_id = $2 ORDER BY id",
            )
            .bind(room_id)
            .bind(user_id)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| e.any())?;

        Ok(invitations.into_iter().map(InvitationData::from).collect())
    }

    async fn invitation_by_token(
        &self,
        token: &str,
    ) -> std::result::Result<InvitationData, StoreError> {
        Ok(self.invitation_with_token(token).await?)
    }

    async fn mark_invitation_used(
        &self,
        invitation_id: InvitationId,
    ) -> std::result::Result<bool, StoreError> {
        // The condition on used makes concurrent consumers race on the row lock
        let result = query("UPDATE invitations SET used = true WHERE id = $1 AND used = false")
            .bind(invitation_id)
            .execute(&self.pool)
            .await
            .map_err(|e| e.any())?;

        Ok(result.rows_affected() == 1)
    }

    async fn recent_messages(
        &self,
        room_id: RoomId,
        limit: usize,
    ) -> std::result::Result<Vec<ChatMessageData>, StoreError> {
        let messages = query_as::<_, MessageRow>(
            "SELECT * FROM (
                SELECT * FROM chat_messages
                WHERE room_id = $1
                ORDER BY created_at DESC, id DESC
                LIMIT $2
            ) AS recent
            ORDER BY created_at, id",
        )
        .bind(room_id)
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| e.any())?;

        Ok(messages.into_iter().map(ChatMessageData::from).collect())
    }

    async fn create_message(
        &self,
        message: NewChatMessage,
    ) -> std::result::Result<ChatMessageData, StoreError> {
        let row = query_as::<_, MessageRow>(
            "INSERT INTO chat_messages (room_id, author_id, author_name, content, created_at)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING *",
        )
        .bind(message.room_id)
        .bind(message.author_id)
        .bind(message.author_name)
        .bind(message.content)
        .bind(message.created_at)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| e.any())?;

        Ok(row.into())
    }
}

#[async_trait]
impl Database for PgDatabase {
    async fn user_by_id(&self, user_id: UserId) -> Result<UserData> {
        query_as::<_, UserData>("SELECT * FROM users WHERE id = $1")
            .bind(user_id)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| e.not_found_or("user", "id"))
    }

    async fn user_by_username(&self, username: &str) -> Result<UserData> {
        query_as::<_, UserData>("SELECT * FROM users WHERE username = $1")
            .bind(username)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| e.not_found_or("user", "username"))
    }

    async fn user_by_email(&self, email: &str) -> Result<UserData> {
        query_as::<_, UserData>("SELECT * FROM users WHERE lower(email) = lower($1)")
            .bind(email)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| e.not_found_or("user", "email"))
    }

    async fn create_user(&self, new_user: NewUser) -> Result<UserData> {
        self.user_by_username(&new_user.username)
            .await
            .conflict_or_ok("user", "username", &new_user.username)?;

        self.user_by_email(&new_user.email)
            .await
            .conflict_or_ok("user", "email", &new_user.email)?;

        query_as::<_, UserData>(
            "INSERT INTO users (username, email, password, display_name)
            VALUES ($1, $2, $3, $4)
            RETURNING *",
        )
        .bind(new_user.username)
        .bind(new_user.email)
        .bind(new_user.password)
        .bind(new_user.display_name)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| e.any())
    }

    async fn session_by_token(&self, token: &str) -> Result<SessionData> {
        query_as::<_, SessionRow>(
            "SELECT
                sessions.id,
                sessions.token,
                sessions.expires_at,
                users.id AS user_id,
                users.username,
                users.email,
                users.password,
                users.display_name
            FROM sessions
                INNER JOIN users ON sessions.user_id = users.id
            WHERE sessions.token = $1 AND sessions.expires_at > now()",
        )
        .bind(token)
        .fetch_one(&self.pool)
        .await
        .map(SessionData::from)
        .map_err(|e| e.not_found_or("session", "token"))
    }

    async fn create_session(&self, new_session: NewSession) -> Result<SessionData> {
        query("INSERT INTO sessions (token, user_id, expires_at) VALUES ($1, $2, $3)")
            .bind(&new_session.token)
            .bind(new_session.user_id)
            .bind(new_session.expires_at)
            .execute(&self.pool)
            .await
            .map_err(|e| e.any())?;

        self.session_by_token(&new_session.token).await
    }

    async fn delete_session_by_token(&self, token: &str) -> Result<()> {
        let result = query("DELETE FROM sessions WHERE token = $1")
            .bind(token)
            .execute(&self.pool)
            .await
            .map_err(|e| e.any())?;

        if result.rows_affected() == 0 {
            return Err(DatabaseError::NotFound {
                resource: "session",
                identifier: "token",
            });
        }

        Ok(())
    }

    async fn clear_expired_sessions(&self) -> Result<()> {
        query("DELETE FROM sessions WHERE now() > expires_at")
            .execute(&self.pool)
            .await
            .map_err(|e| e.any())
            .map(|_| ())
    }

    async fn create_room(&self, new_room: NewRoom) -> Result<RoomData> {
        // Ensure the creator and the media exist
        self.user_by_id(new_room.creator_id).await?;
        if let Some(media_id) = new_room.media_id {
            self.media_by_id(media_id).await?;
        }

        let (room_id,) = query_as::<_, (RoomId,)>(
            "INSERT INTO rooms (name, creator_id, scheduled_at, duration_minutes, media_id)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING id",
        )
        .bind(new_room.name)
        .bind(new_room.creator_id)
        .bind(new_room.scheduled_at)
        .bind(new_room.duration_minutes)
        .bind(new_room.media_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| e.any())?;

        self.room_by_id(room_id).await
    }

    async fn set_transport_room(&self, room_id: RoomId, transport_room: &str) -> Result<()> {
        let result = query("UPDATE rooms SET transport_room = $2 WHERE id = $1")
            .bind(room_id)
            .bind(transport_room)
            .execute(&self.pool)
            .await
            .map_err(|e| e.any())?;

        if result.rows_affected() == 0 {
            return Err(DatabaseError::NotFound {
                resource: "room",
                identifier: "id",
            });
        }

        Ok(())
    }

    async fn select_media(&self, room_id: RoomId, media_id: Option<MediaId>) -> Result<()> {
        if let Some(media_id) = media_id {
            self.media_by_id(media_id).await?;
        }

        let result = query("UPDATE rooms SET media_id = $2 WHERE id = $1")
            .bind(room_id)
            .bind(media_id)
            .execute(&self.pool)
            .await
            .map_err(|e| e.any())?;

        if result.rows_affected() == 0 {
            return Err(DatabaseError::NotFound {
                resource: "room",
                identifier: "id",
            });
        }

        Ok(())
    }

    async fn rooms_for_user(&self, user_id: UserId) -> Result<Vec<RoomData>> {
        self.rooms_where(
            "rooms.creator_id = $1
                OR rooms.id IN (SELECT room_id FROM invitations WHERE invitee_id = $1)",
            user_id,
        )
        .await
    }

    async fn create_invitation(&self, new_invitation: NewInvitation) -> Result<InvitationData> {
        self.invitation_with_token(&new_invitation.token)
            .await
            .conflict_or_ok("invitation", "token", &new_invitation.token)?;

        query_as::<_, InvitationRow>(
            "INSERT INTO invitations (room_id, invitee_id, email, token, expires_at)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING *",
        )
        .bind(new_invitation.room_id)
        .bind(new_invitation.invitee_id)
        .bind(new_invitation.email)
        .bind(new_invitation.token)
        .bind(new_invitation.expires_at)
        .fetch_one(&self.pool)
        .await
        .map(InvitationData::from)
        .map_err(|e| e.any())
    }

    async fn media_by_id(&self, media_id: MediaId) -> Result<MediaData> {
        query_as::<_, MediaRow>(
            "SELECT id, title, file_path, hls_path, conversion_status FROM media WHERE id = $1",
        )
        .bind(media_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| e.not_found_or("media", "id"))?
        .into_data()
    }

    async fn create_media(&self, new_media: NewMedia) -> Result<MediaData> {
        query_as::<_, MediaRow>(
            "INSERT INTO media (title, file_path, uploaded_by)
            VALUES ($1, $2, $3)
            RETURNING id, title, file_path, hls_path, conversion_status",
        )
        .bind(new_media.title)
        .bind(new_media.file_path)
        .bind(new_media.uploaded_by)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| e.any())?
        .into_data()
    }
}

impl IntoDatabaseError for SqlxError {
    fn any(self) -> DatabaseError {
        DatabaseError::Internal(Box::new(self))
    }

    fn not_found_or(self, resource: &'static str, identifier: &'static str) -> DatabaseError {
        match self {
            SqlxError::RowNotFound => DatabaseError::NotFound {
                resource,
                identifier,
            },
            e => Self::any(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row() -> RoomRow {
        RoomRow {
            id: 3,
            name: "Friday night".to_string(),
            creator_id: 1,
            transport_room: "friday-night-3".to_string(),
            scheduled_at: Utc::now(),
            duration_minutes: 90,
            media_id: Some(7),
            is_active: true,
            status: "active".to_string(),
            ingress_kind: Some("ingress".to_string()),
            ingress_id: Some("IN_abc".to_string()),
            ingress_url: None,
            started_at: Some(Utc::now()),
            attempt: 2,
            failure: None,
            media_title: Some("Metropolis".to_string()),
            media_file_path: Some("movies/metropolis.mp4".to_string()),
            media_hls_path: None,
            media_conversion_status: Some("processing".to_string()),
        }
    }

    #[test]
    fn test_room_rows_become_rooms() {
        let room = row().into_data().unwrap();

        assert_eq!(room.session.status, PlaybackStatus::Active);
        assert_eq!(room.session.attempt, 2);
        assert_eq!(
            room.session.ingress,
            Some(IngressHandle {
                kind: IngressKind::Ingress,
                id: "IN_abc".to_string(),
                url: None,
            })
        );

        let media = room.media.unwrap();
        assert_eq!(media.title, "Metropolis");
        assert_eq!(media.conversion, ConversionStatus::Processing);
    }

    #[test]
    fn test_rooms_without_media_or_ingress() {
        let room = RoomRow {
            media_id: None,
            media_title: None,
            media_file_path: None,
            media_conversion_status: None,
            ingress_kind: None,
            ingress_id: None,
            status: "idle".to_string(),
            ..row()
        }
        .into_data()
        .unwrap();

        assert!(room.media.is_none());
        assert!(room.session.ingress.is_none());
        assert_eq!(room.session.status, PlaybackStatus::Idle);
    }

    #[test]
    fn test_corrupt_rows_are_rejected() {
        let result = RoomRow {
            status: "paused".to_string(),
            ..row()
        }
        .into_data();

        assert!(matches!(result, Err(DatabaseError::Internal(_))));
    }
}
