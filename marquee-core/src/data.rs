use std::{fmt::Display, str::FromStr};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::{DisplayIdentity, PlaybackSession};

/// The type used for primary keys of persisted entities.
pub type PrimaryKey = i32;

pub type RoomId = PrimaryKey;
pub type UserId = PrimaryKey;
pub type MediaId = PrimaryKey;
pub type InvitationId = PrimaryKey;
pub type MessageId = PrimaryKey;

/// An authenticated user, as handed to the coordinator by the identity provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub user_id: UserId,
    pub username: String,
    pub email: String,
}

impl Identity {
    /// Returns the name this identity is presented with in chat and on the transport.
    pub fn display_name(&self, display: DisplayIdentity) -> &str {
        match display {
            DisplayIdentity::Email => &self.email,
            DisplayIdentity::Username => &self.username,
        }
    }
}

/// The state of the external transcoding job for a piece of media.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConversionStatus {
    #[default]
    Pending,
    Processing,
    Completed,
    Failed,
}

impl ConversionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl FromStr for ConversionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "processing" => Ok(Self::Processing),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            other => Err(format!("Unknown conversion status {}", other)),
        }
    }
}

/// A movie that can be selected for a room.
#[derive(Debug, Clone, PartialEq)]
pub struct MediaData {
    pub id: MediaId,
    pub title: String,
    /// Path of the uploaded file, relative to the media root.
    pub file_path: String,
    /// Path of the adaptive-streaming manifest, written by the transcoding job.
    pub hls_path: Option<String>,
    pub conversion: ConversionStatus,
}

impl MediaData {
    const HLS_PREFIX: &'static str = "movies/";

    /// Resolves the URL the media can be pulled from.
    ///
    /// The transcoded manifest is preferred, the raw file is used when there is none
    /// or when the transcoding job failed.
    pub fn playable_url(&self, base_url: &str) -> String {
        let base = base_url.trim_end_matches('/');

        match &self.hls_path {
            Some(hls_path) if self.conversion != ConversionStatus::Failed => {
                let relative = match hls_path.split_once("media/movies/") {
                    Some((_, rest)) => rest,
                    None => hls_path.trim_start_matches('/'),
                };

                format!("{}/{}{}", base, Self::HLS_PREFIX, relative)
            }
            _ => format!("{}/{}", base, self.file_path.trim_start_matches('/')),
        }
    }
}

/// A watch-party room
#[derive(Debug, Clone)]
pub struct RoomData {
    pub id: RoomId,
    pub name: String,
    pub creator_id: UserId,
    /// Name of the room on the media transport.
    pub transport_room: String,
    pub scheduled_at: DateTime<Utc>,
    pub duration_minutes: i32,
    pub media: Option<MediaData>,
    /// True while a movie is being streamed into the room.
    pub is_active: bool,
    pub session: PlaybackSession,
}

impl RoomData {
    pub fn duration(&self) -> Duration {
        Duration::minutes(self.duration_minutes.into())
    }

    /// Returns true once the scheduled slot of the room is over.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.scheduled_at + self.duration()
    }

    /// How long a session of this room may run. The configured duration,
    /// but never longer than `max_age`.
    pub fn session_limit(&self, max_age: Duration) -> Duration {
        if self.duration_minutes > 0 {
            self.duration().min(max_age)
        } else {
            max_age
        }
    }

    pub fn movie_title(&self) -> String {
        self.media
            .as_ref()
            .map(|m| m.title.clone())
            .unwrap_or_else(|| "Unknown".to_string())
    }
}

impl Display for RoomData {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} (#{})", self.name, self.id)
    }
}

/// An invitation of a user to a room
#[derive(Debug, Clone, PartialEq)]
pub struct InvitationData {
    pub id: InvitationId,
    pub room_id: RoomId,
    pub invitee_id: UserId,
    pub email: String,
    /// Single-use token sent to the invitee.
    pub token: String,
    pub expires_at: DateTime<Utc>,
    pub used: bool,
}

impl InvitationData {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at < now
    }
}

/// A persisted chat message
#[derive(Debug, Clone, PartialEq)]
pub struct ChatMessageData {
    pub id: MessageId,
    pub room_id: RoomId,
    pub author_id: UserId,
    pub author_name: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewChatMessage {
    pub room_id: RoomId,
    pub author_id: UserId,
    pub author_name: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
}
