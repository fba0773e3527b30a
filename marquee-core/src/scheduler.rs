use chrono::{DateTime, Duration, Utc};
use log::{error, info};
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::{
    ControlAction, CoordinatorContext, CoordinatorError, PlaybackStatus, RoomData, RoomId,
    StopReason,
};

/// Returns true if a room should be started now.
pub fn is_due(room: &RoomData, now: DateTime<Utc>, grace_window: Duration) -> bool {
    room.scheduled_at <= now
        && now < room.scheduled_at + grace_window
        && room.session.status == PlaybackStatus::Idle
        && room.media.is_some()
}

/// Returns true if a room has been streaming for longer than its duration,
/// or longer than `max_age`.
pub fn is_stale(room: &RoomData, now: DateTime<Utc>, max_age: Duration) -> bool {
    room.session.status == PlaybackStatus::Active
        && room.session.ingress.is_some()
        && room.session.is_expired(now, room.session_limit(max_age))
}

/// Periodically queues starts for rooms that are due, and stops for sessions that went stale.
///
/// The scheduler only reads and queues. The controller re-checks every room before acting.
pub struct Scheduler {
    context: CoordinatorContext,
}

impl Scheduler {
    pub fn new(context: &CoordinatorContext) -> Self {
        Self {
            context: context.clone(),
        }
    }

    /// Queues a start for every due room. Returns the rooms that were queued.
    pub async fn check_due_rooms(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<RoomId>, CoordinatorError> {
        let grace_window = self.context.config.grace_window();
        let rooms = self
            .context
            .store
            .rooms_due(now - grace_window, now)
            .await?;

        let queued: Vec<_> = rooms
            .iter()
            .filter(|room| is_due(room, now, grace_window))
            .filter(|room| self.context.enqueue(ControlAction::Start { room_id: room.id }))
            .map(|room| {
                info!("Room {} is due, queued start of {}", room, room.movie_title());
                room.id
            })
            .collect();

        Ok(queued)
    }

    /// Queues a stop for every stale session. Returns the rooms that were queued.
    pub async fn cleanup_stale(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<RoomId>, CoordinatorError> {
        let max_age = self.context.config.max_session_age();
        // Rooms may have durations shorter than the maximum age
        let rooms = self.context.store.rooms_stale(now).await?;

        let queued: Vec<_> = rooms
            .iter()
            .filter(|room| is_stale(room, now, max_age))
            .filter(|room| {
                self.context.enqueue(ControlAction::Stop {
                    room_id: room.id,
                    reason: StopReason::Expired,
                })
            })
            .map(|room| {
                info!("Session in room {} is stale, queued stop", room);
                room.id
            })
            .collect();

        Ok(queued)
    }

    /// Runs both scans. Failures are logged, so the next tick still happens.
    pub async fn tick(&self, now: DateTime<Utc>) {
        if let Err(err) = self.check_due_rooms(now).await {
            error!("Scanning for due rooms failed: {}", err);
        }

        if let Err(err) = self.cleanup_stale(now).await {
            error!("Scanning for stale sessions failed: {}", err);
        }
    }

    /// Ticks on the configured interval until cancelled.
    pub async fn run(&self, cancel: CancellationToken) {
        let mut ticks = interval(self.context.config.scheduler_interval());
        ticks.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!(
            "Scheduler running every {} seconds",
            self.context.config.scheduler_interval_in_seconds
        );

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = ticks.tick() => self.tick(Utc::now()).await,
            }
        }

        info!("Scheduler stopped");
    }
}
