use thiserror::Error;

use crate::{PlaybackStatus, StoreError, TransitionError, TransportError};

/// Why an ingestion attempt failed
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("Room has no playable media")]
    NoPlayableMedia,
    #[error("Ingress creation failed and fallback is disabled: {0}")]
    Transport(#[source] TransportError),
    #[error("Ingress creation failed ({ingress}), fallback failed too ({fallback})")]
    Fallback { ingress: String, fallback: String },
    #[error("Could not release ingress: {0}")]
    Release(String),
}

#[derive(Debug, Error)]
pub enum CoordinatorError {
    #[error("Access denied")]
    AccessDenied,
    #[error("Room not found")]
    RoomNotFound,
    #[error("Playback is already running")]
    AlreadyRunning,
    #[error("Cannot {action} while playback is {from}")]
    InvalidTransition {
        from: PlaybackStatus,
        action: &'static str,
    },
    #[error("Room has no selected media")]
    NoMediaSelected,
    #[error("Invitation not found")]
    InvitationNotFound,
    #[error("Invitation was already used")]
    InvitationConsumed,
    #[error("User is not connected to the room")]
    NotConnected,
    #[error("Message is empty")]
    EmptyMessage,
    #[error(transparent)]
    Ingest(#[from] IngestError),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Store(StoreError),
}

impl CoordinatorError {
    /// The websocket close code for errors that end a connection.
    pub fn close_code(&self) -> Option<u16> {
        match self {
            Self::AccessDenied => Some(4003),
            Self::RoomNotFound => Some(4004),
            _ => None,
        }
    }
}

impl From<TransitionError> for CoordinatorError {
    fn from(value: TransitionError) -> Self {
        match value {
            TransitionError::AlreadyRunning => Self::AlreadyRunning,
            TransitionError::NoMedia => Self::NoMediaSelected,
            TransitionError::Invalid { from, action } => Self::InvalidTransition { from, action },
        }
    }
}

impl From<StoreError> for CoordinatorError {
    fn from(value: StoreError) -> Self {
        match value {
            StoreError::NotFound {
                resource: "room", ..
            } => Self::RoomNotFound,
            StoreError::NotFound {
                resource: "invitation",
                ..
            } => Self::InvitationNotFound,
            other => Self::Store(other),
        }
    }
}
