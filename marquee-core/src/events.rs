use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};

use crate::{ChatMessageData, MessageId, RoomId, UserId};

pub type ActionSender = UnboundedSender<ControlAction>;
pub type ActionReceiver = UnboundedReceiver<ControlAction>;

/// Describes the events published to the members of a room.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum RoomEvent {
    /// A chat message was posted, by a member or by the coordinator itself.
    #[serde(rename = "chat.message")]
    ChatMessage {
        /// The id of the persisted message. Announcements are not persisted.
        message_id: Option<MessageId>,
        author: String,
        author_id: Option<UserId>,
        message: String,
        timestamp: DateTime<Utc>,
    },
    /// The movie is now being streamed into the room.
    #[serde(rename = "movie.started")]
    MovieStarted {
        message: String,
        movie_title: String,
        started_at: Option<DateTime<Utc>>,
    },
    /// The stream was torn down.
    #[serde(rename = "movie.stopped")]
    MovieStopped {
        message: String,
        movie_title: String,
        stopped_at: DateTime<Utc>,
        reason: StopReason,
    },
    /// Starting or stopping the stream failed.
    #[serde(rename = "movie.failed")]
    MovieFailed {
        movie_title: String,
        reason: String,
        attempt: u32,
    },
    /// An invited user entered the room.
    #[serde(rename = "waitingroom.join")]
    WaitingRoomJoin { user_id: UserId, username: String },
    /// The creator admitted a user. Only delivered to that user.
    #[serde(rename = "waitingroom.approved")]
    WaitingRoomApproved { user_id: UserId, token: String },
}

impl RoomEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ChatMessage { .. } => "chat.message",
            Self::MovieStarted { .. } => "movie.started",
            Self::MovieStopped { .. } => "movie.stopped",
            Self::MovieFailed { .. } => "movie.failed",
            Self::WaitingRoomJoin { .. } => "waitingroom.join",
            Self::WaitingRoomApproved { .. } => "waitingroom.approved",
        }
    }

    /// Returns the only user this event may be delivered to, if it is not for everyone.
    pub fn recipient(&self) -> Option<UserId> {
        match self {
            Self::WaitingRoomApproved { user_id, .. } => Some(*user_id),
            _ => None,
        }
    }
}

impl From<&ChatMessageData> for RoomEvent {
    fn from(message: &ChatMessageData) -> Self {
        Self::ChatMessage {
            message_id: Some(message.id),
            author: message.author_name.clone(),
            author_id: Some(message.author_id),
            message: message.content.clone(),
            timestamp: message.created_at,
        }
    }
}

/// What is sent down a connection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub room_id: RoomId,
    /// Position of the event in the room's publish order.
    /// Replayed history has no sequence.
    pub sequence: Option<u64>,
    pub event: RoomEvent,
}

/// Messages a member can send over its connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ClientMessage {
    Chat { message: String },
    Approve { user_id: UserId },
    Start,
    Stop,
}

/// Why a stream was stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StopReason {
    /// Someone asked for it.
    Requested,
    /// It ran longer than the maximum session age.
    Expired,
    /// The fallback bot ran out of frames.
    Finished,
    /// The fallback bot broke down mid-stream.
    Failed,
}

/// Describes work for the controller, queued by the scheduler and by users.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlAction {
    Start { room_id: RoomId },
    Stop { room_id: RoomId, reason: StopReason },
}

/// Identifies queued work, so the same work is never queued twice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActionKey {
    Start(RoomId),
    Stop(RoomId),
}

impl ControlAction {
    pub fn room_id(&self) -> RoomId {
        match self {
            Self::Start { room_id } | Self::Stop { room_id, .. } => *room_id,
        }
    }

    pub fn key(&self) -> ActionKey {
        match self {
            Self::Start { room_id } => ActionKey::Start(*room_id),
            Self::Stop { room_id, .. } => ActionKey::Stop(*room_id),
        }
    }
}
