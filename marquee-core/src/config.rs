use std::time::Duration as StdDuration;

use chrono::Duration;
use serde::{Deserialize, Serialize};

/// Which attribute of an identity is shown to other participants.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DisplayIdentity {
    Email,
    #[default]
    Username,
}

/// The configuration of the coordinator
#[derive(Debug, Clone)]
pub struct Config {
    /// How often the scheduler scans for due and stale rooms
    pub scheduler_interval_in_seconds: u64,
    /// How long after its scheduled time a room is still considered due
    pub grace_window_in_seconds: i64,
    /// How long an ingestion may stay active before it is forcibly stopped
    pub max_session_age_in_seconds: i64,
    /// How many chat messages a newly joined connection receives
    pub history_limit: usize,
    /// How many undelivered events a connection may lag behind before it is dropped
    pub connection_buffer_size: usize,
    /// The output frame rate of the fallback bot, if the source does not dictate one
    pub bot_frame_rate: f32,
    /// Base URL that media paths are resolved against
    pub media_base_url: String,
    /// Whether participants are presented by email or username
    pub display_identity: DisplayIdentity,
    /// The transport identity of the fallback bot
    pub bot_identity: String,
    /// The author name used for bot announcements in chat
    pub bot_display_name: String,
    /// Whether a failed ingress creation falls back to the local bot
    pub fallback_enabled: bool,
}

impl Config {
    pub fn scheduler_interval(&self) -> StdDuration {
        StdDuration::from_secs(self.scheduler_interval_in_seconds)
    }

    pub fn grace_window(&self) -> Duration {
        Duration::seconds(self.grace_window_in_seconds)
    }

    pub fn max_session_age(&self) -> Duration {
        Duration::seconds(self.max_session_age_in_seconds)
    }

    /// Returns the time between two bot frames for the given frame rate.
    /// Falls back to the configured rate if the given one is unusable.
    pub fn frame_interval(&self, frame_rate: Option<f32>) -> StdDuration {
        let rate = frame_rate
            .filter(|r| r.is_finite() && *r > 0.)
            .unwrap_or(self.bot_frame_rate)
            .max(1.);

        StdDuration::from_secs_f32(1. / rate)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            scheduler_interval_in_seconds: 60,
            grace_window_in_seconds: 60,
            // Three hours is longer than almost any movie
            max_session_age_in_seconds: 3 * 60 * 60,
            history_limit: 50,
            connection_buffer_size: 64,
            bot_frame_rate: 30.,
            media_base_url: "http://localhost:8000/media/".to_string(),
            display_identity: DisplayIdentity::Username,
            bot_identity: "movie-bot".to_string(),
            bot_display_name: "Movie Bot".to_string(),
            fallback_enabled: true,
        }
    }
}
