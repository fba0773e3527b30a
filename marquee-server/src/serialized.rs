//! All schemas that are exposed from endpoints are defined here
//! along with the From<T> impls

use chrono::{DateTime, Utc};
use marquee_collab::{SessionData, UserData};
use marquee_core::{ChatMessageData, InvitationData, MediaData, PlaybackSession, RoomData};
use serde::Serialize;
use utoipa::ToSchema;

#[derive(Debug, Serialize, ToSchema)]
pub struct User {
    id: i32,
    username: String,
    email: String,
    display_name: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct LoginResult {
    token: String,
    expires_at: DateTime<Utc>,
    user: User,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct Room {
    id: i32,
    name: String,
    creator_id: i32,
    /// Name of the room on the media transport
    transport_room: String,
    scheduled_at: DateTime<Utc>,
    duration_minutes: i32,
    media: Option<Media>,
    /// True while the movie is being streamed
    is_active: bool,
    /// True once the scheduled slot is over
    is_expired: bool,
    playback: Playback,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct Playback {
    /// One of idle, starting, active, stopping, stopped or failed
    status: String,
    /// ingress or bot, if something is streaming
    ingress_kind: Option<String>,
    started_at: Option<DateTime<Utc>>,
    attempt: u32,
    failure: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct Media {
    id: i32,
    title: String,
    file_path: String,
    hls_path: Option<String>,
    /// One of pending, processing, completed or failed
    conversion_status: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct Invitation {
    id: i32,
    room_id: i32,
    invitee_id: i32,
    email: String,
    token: String,
    expires_at: DateTime<Utc>,
    used: bool,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ChatMessage {
    id: i32,
    room_id: i32,
    author_id: i32,
    author_name: String,
    content: String,
    created_at: DateTime<Utc>,
}

/// A token granting access to the room on the media transport
#[derive(Debug, Serialize, ToSchema)]
pub struct AccessToken {
    pub room: String,
    pub token: String,
}

/// The rooms a scan queued work for
#[derive(Debug, Serialize, ToSchema)]
pub struct ScanResult {
    pub queued: Vec<i32>,
}

/// Helper trait to convert any type into a serialized version
pub trait ToSerialized<T>
where
    T: Serialize,
{
    fn to_serialized(&self) -> T;
}

impl<I, O> ToSerialized<Vec<O>> for Vec<I>
where
    I: ToSerialized<O>,
    O: Serialize,
{
    fn to_serialized(&self) -> Vec<O> {
        self.iter().map(|x| x.to_serialized()).collect()
    }
}

impl ToSerialized<User> for UserData {
    fn to_serialized(&self) -> User {
        User {
            id: self.id,
            username: self.username.clone(),
            email: self.email.clone(),
            display_name: self.display_name.clone(),
        }
    }
}

impl ToSerialized<LoginResult> for SessionData {
    fn to_serialized(&self) -> LoginResult {
        LoginResult {
            token: self.token.clone(),
            expires_at: self.expires_at,
            user: self.user.to_serialized(),
        }
    }
}

impl ToSerialized<Room> for RoomData {
    fn to_serialized(&self) -> Room {
        Room {
            id: self.id,
            name: self.name.clone(),
            creator_id: self.creator_id,
            transport_room: self.transport_room.clone(),
            scheduled_at: self.scheduled_at,
            duration_minutes: self.duration_minutes,
            media: self.media.as_ref().map(|m| m.to_serialized()),
            is_active: self.is_active,
            is_expired: self.is_expired(Utc::now()),
            playback: self.session.to_serialized(),
        }
    }
}

impl ToSerialized<Playback> for PlaybackSession {
    fn to_serialized(&self) -> Playback {
        Playback {
            status: self.status.to_string(),
            ingress_kind: self.ingress.as_ref().map(|i| i.kind.as_str().to_string()),
            started_at: self.started_at,
            attempt: self.attempt,
            failure: self.failure.clone(),
        }
    }
}

impl ToSerialized<Media> for MediaData {
    fn to_serialized(&self) -> Media {
        Media {
            id: self.id,
            title: self.title.clone(),
            file_path: self.file_path.clone(),
            hls_path: self.hls_path.clone(),
            conversion_status: self.conversion.as_str().to_string(),
        }
    }
}

impl ToSerialized<Invitation> for InvitationData {
    fn to_serialized(&self) -> Invitation {
        Invitation {
            id: self.id,
            room_id: self.room_id,
            invitee_id: self.invitee_id,
            email: self.email.clone(),
            token: self.token.clone(),
            expires_at: self.expires_at,
            used: self.used,
        }
    }
}

impl ToSerialized<ChatMessage> for ChatMessageData {
    fn to_serialized(&self) -> ChatMessage {
        ChatMessage {
            id: self.id,
            room_id: self.room_id,
            author_id: self.author_id,
            author_name: self.author_name.clone(),
            content: self.content.clone(),
            created_at: self.created_at,
        }
    }
}
