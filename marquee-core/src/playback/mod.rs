//! The playback state machine of a room.
//!
//! A [PlaybackSession] only describes the state and which transitions are legal.
//! Serializing transitions of the same room is the job of the [crate::Controller].

use std::{fmt::Display, str::FromStr};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlaybackStatus {
    /// Nothing has been streamed yet.
    #[default]
    Idle,
    /// An ingress is being created.
    Starting,
    /// The movie is being streamed into the room.
    Active,
    /// The ingress is being torn down.
    Stopping,
    /// The ingress was torn down. A new start may be requested.
    Stopped,
    /// Starting or stopping failed. A new start may be requested.
    Failed,
}

impl PlaybackStatus {
    pub const ALL: [PlaybackStatus; 6] = [
        Self::Idle,
        Self::Starting,
        Self::Active,
        Self::Stopping,
        Self::Stopped,
        Self::Failed,
    ];

    /// Returns true if an external resource may exist for this status.
    pub fn is_running(&self) -> bool {
        matches!(self, Self::Starting | Self::Active | Self::Stopping)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Starting => "starting",
            Self::Active => "active",
            Self::Stopping => "stopping",
            Self::Stopped => "stopped",
            Self::Failed => "failed",
        }
    }
}

impl Display for PlaybackStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PlaybackStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| format!("Unknown playback status {}", s))
    }
}

/// What kind of resource is streaming the movie into a room
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IngressKind {
    /// An ingress created on the media transport, pulling from the media URL.
    Ingress,
    /// The local fallback bot, pushing frames as a participant.
    Bot,
}

impl IngressKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ingress => "ingress",
            Self::Bot => "bot",
        }
    }
}

impl FromStr for IngressKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ingress" => Ok(Self::Ingress),
            "bot" => Ok(Self::Bot),
            other => Err(format!("Unknown ingress kind {}", other)),
        }
    }
}

/// A handle to the resource streaming into a room
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngressHandle {
    pub kind: IngressKind,
    /// The ingress id on the transport, or the worker id of the bot.
    pub id: String,
    pub url: Option<String>,
}

impl Display for IngressHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.kind.as_str(), self.id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransitionError {
    #[error("Playback is already running")]
    AlreadyRunning,
    #[error("Room has no selected media")]
    NoMedia,
    #[error("Cannot {action} while playback is {from}")]
    Invalid {
        from: PlaybackStatus,
        action: &'static str,
    },
}

/// The playback state attached to a room
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PlaybackSession {
    pub status: PlaybackStatus,
    pub ingress: Option<IngressHandle>,
    pub started_at: Option<DateTime<Utc>>,
    /// Incremented for every accepted start request.
    pub attempt: u32,
    /// The reason of the last failure, if the status is [PlaybackStatus::Failed].
    pub failure: Option<String>,
}

impl PlaybackSession {
    /// Checks if a start may be requested, without transitioning.
    pub fn check_start(&self, has_media: bool) -> Result<(), TransitionError> {
        match self.status {
            PlaybackStatus::Starting | PlaybackStatus::Active => {
                Err(TransitionError::AlreadyRunning)
            }
            PlaybackStatus::Idle | PlaybackStatus::Stopped | PlaybackStatus::Failed => {
                if has_media {
                    Ok(())
                } else {
                    Err(TransitionError::NoMedia)
                }
            }
            from => Err(TransitionError::Invalid {
                from,
                action: "start",
            }),
        }
    }

    /// `Idle | Stopped | Failed -> Starting`. Returns the new attempt number.
    pub fn request_start(&mut self, has_media: bool) -> Result<u32, TransitionError> {
        self.check_start(has_media)?;

        self.status = PlaybackStatus::Starting;
        self.ingress = None;
        self.started_at = None;
        self.failure = None;
        self.attempt += 1;

        Ok(self.attempt)
    }

    /// `Starting -> Active`
    pub fn ingress_created(
        &mut self,
        handle: IngressHandle,
        now: DateTime<Utc>,
    ) -> Result<(), TransitionError> {
        self.expect(PlaybackStatus::Starting, "activate")?;

        self.status = PlaybackStatus::Active;
        self.ingress = Some(handle);
        self.started_at = Some(now);

        Ok(())
    }

    /// `Starting | Stopping -> Failed`
    pub fn ingress_failed(&mut self, reason: impl Into<String>) -> Result<(), TransitionError> {
        match self.status {
            PlaybackStatus::Starting | PlaybackStatus::Stopping => {
                self.status = PlaybackStatus::Failed;
                self.ingress = None;
                self.failure = Some(reason.into());

                Ok(())
            }
            from => Err(TransitionError::Invalid {
                from,
                action: "fail",
            }),
        }
    }

    /// `Active -> Stopping`. Returns the handle that must be released.
    pub fn request_stop(&mut self) -> Result<Option<IngressHandle>, TransitionError> {
        match self.status {
            PlaybackStatus::Active => {
                self.status = PlaybackStatus::Stopping;
                Ok(self.ingress.clone())
            }
            // Already on its way down
            PlaybackStatus::Stopping => Ok(self.ingress.clone()),
            from => Err(TransitionError::Invalid {
                from,
                action: "stop",
            }),
        }
    }

    /// Returns true if the session has been running for longer than `max_age`.
    pub fn is_expired(&self, now: DateTime<Utc>, max_age: Duration) -> bool {
        self.status.is_running()
            && self
                .started_at
                .map(|started_at| now - started_at > max_age)
                .unwrap_or(false)
    }

    /// Forces an expired session into `Stopping`, regardless of its running state.
    /// Returns the handle that must be released, or `None` if the session is not expired.
    pub fn expire(
        &mut self,
        now: DateTime<Utc>,
        max_age: Duration,
    ) -> Option<Option<IngressHandle>> {
        if !self.is_expired(now, max_age) {
            return None;
        }

        self.status = PlaybackStatus::Stopping;
        Some(self.ingress.clone())
    }

    /// `Stopping -> Stopped`. Clears the session.
    pub fn ingress_stopped(&mut self) -> Result<(), TransitionError> {
        self.expect(PlaybackStatus::Stopping, "finish stopping")?;

        self.status = PlaybackStatus::Stopped;
        self.ingress = None;
        self.started_at = None;

        Ok(())
    }

    /// `Stopped | Failed | Starting -> Idle`, so the scheduler may pick the room up again.
    ///
    /// `Starting` is accepted because a process that dies mid-start leaves it behind.
    /// The caller must make sure no start is actually in flight.
    pub fn reset(&mut self) -> Result<(), TransitionError> {
        match self.status {
            PlaybackStatus::Stopped | PlaybackStatus::Failed | PlaybackStatus::Starting => {
                self.status = PlaybackStatus::Idle;
                self.ingress = None;
                self.started_at = None;
                self.failure = None;

                Ok(())
            }
            PlaybackStatus::Idle => Ok(()),
            from => Err(TransitionError::Invalid {
                from,
                action: "reset",
            }),
        }
    }

    fn expect(&self, status: PlaybackStatus, action: &'static str) -> Result<(), TransitionError> {
        if self.status == status {
            Ok(())
        } else {
            Err(TransitionError::Invalid {
                from: self.status,
                action,
            })
        }
    }
}
