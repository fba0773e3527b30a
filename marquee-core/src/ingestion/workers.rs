use std::{sync::Arc, time::Duration};

use dashmap::DashMap;
use log::{debug, info, warn};
use tokio::{
    task::JoinHandle,
    time::{interval, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;

use crate::{
    BotBackend, BotError, BotRequest, BotStream, ControlAction, CoordinatorContext, Grants, Id,
    IngressHandle, IngressKind, Labeled, RoomData, RoomEvent, RoomId, StopReason,
};

pub type BotWorkerId = Id<BotWorker>;

/// A running fallback bot
pub struct BotWorker {
    room_id: RoomId,
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// How a worker loop ended
#[derive(Debug, Clone, PartialEq, Eq)]
enum WorkerExit {
    Cancelled,
    Finished,
    Failed(String),
}

impl Labeled for BotWorker {
    const LABEL: &'static str = "bot";
}

/// Supervises the fallback bots, each streaming frames into a room on its own task.
pub struct BotWorkers {
    backend: Arc<dyn BotBackend>,
    workers: DashMap<String, BotWorker>,
}

impl BotWorkers {
    pub fn new(backend: Arc<dyn BotBackend>) -> Self {
        Self {
            backend,
            workers: Default::default(),
        }
    }

    /// Connects a bot to the room and starts streaming `source_url` into it.
    pub async fn spawn(
        &self,
        context: &CoordinatorContext,
        room: &RoomData,
        source_url: String,
    ) -> Result<IngressHandle, BotError> {
        let config = &context.config;

        let token = context
            .transport
            .issue_access_token(&config.bot_identity, &room.transport_room, Grants::publisher())
            .map_err(|e| BotError::Connect(e.to_string()))?;

        let stream = self
            .backend
            .prepare(BotRequest {
                room_name: room.transport_room.clone(),
                identity: config.bot_identity.clone(),
                token,
                source_url,
            })
            .await?;

        let frame_interval = config.frame_interval(stream.frame_rate());
        let worker_id = BotWorkerId::new().to_string();
        let cancel = CancellationToken::new();

        let handle = {
            let context = context.clone();
            let cancel = cancel.clone();
            let worker_id = worker_id.clone();
            let room_id = room.id;
            let movie_title = room.movie_title();
            let attempt = room.session.attempt;

            tokio::spawn(async move {
                let exit = run_worker(stream, frame_interval, cancel).await;

                match exit {
                    WorkerExit::Cancelled => {
                        debug!("Bot worker {} in room {} was cancelled", worker_id, room_id);
                    }
                    WorkerExit::Finished => {
                        info!("Bot worker {} in room {} reached the end", worker_id, room_id);
                        context.enqueue(ControlAction::Stop {
                            room_id,
                            reason: StopReason::Finished,
                        });
                    }
                    WorkerExit::Failed(reason) => {
                        warn!(
                            "Bot worker {} in room {} failed: {}",
                            worker_id, room_id, reason
                        );

                        context
                            .publish(
                                room_id,
                                RoomEvent::MovieFailed {
                                    movie_title,
                                    reason,
                                    attempt,
                                },
                            )
                            .await;

                        context.enqueue(ControlAction::Stop {
                            room_id,
                            reason: StopReason::Failed,
                        });
                    }
                }
            })
        };

        info!(
            "Spawned bot worker {} in room {}, pacing at {:?} per frame",
            worker_id, room, frame_interval
        );

        self.workers.insert(
            worker_id.clone(),
            BotWorker {
                room_id: room.id,
                cancel,
                handle,
            },
        );

        Ok(IngressHandle {
            kind: IngressKind::Bot,
            id: worker_id,
            url: None,
        })
    }

    /// Cancels a worker and waits until it has disconnected.
    /// Returns false if no such worker is running.
    pub async fn cancel(&self, worker_id: &str) -> bool {
        let Some((_, worker)) = self.workers.remove(worker_id) else {
            return false;
        };

        worker.cancel.cancel();

        if let Err(err) = worker.handle.await {
            warn!(
                "Bot worker {} in room {} did not shut down cleanly: {}",
                worker_id, worker.room_id, err
            );
        }

        true
    }

    /// Returns the ids of the workers streaming into a room.
    pub fn running_in(&self, room_id: RoomId) -> Vec<String> {
        self.workers
            .iter()
            .filter(|w| w.room_id == room_id)
            .map(|w| w.key().clone())
            .collect()
    }

    /// Cancels every worker.
    pub async fn shutdown(&self) {
        let ids: Vec<_> = self.workers.iter().map(|w| w.key().clone()).collect();

        for id in ids {
            self.cancel(&id).await;
        }
    }
}

/// Streams frames at a fixed pace until the source ends, publishing fails, or it is cancelled.
/// The stream is always closed before returning.
async fn run_worker(
    mut stream: Box<dyn BotStream>,
    frame_interval: Duration,
    cancel: CancellationToken,
) -> WorkerExit {
    let mut pacing = interval(frame_interval);
    pacing.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let exit = loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break WorkerExit::Cancelled,
            _ = pacing.tick() => {}
        }

        match stream.next_frame().await {
            Ok(Some(frame)) => {
                if let Err(err) = stream.publish(frame).await {
                    break WorkerExit::Failed(err.to_string());
                }
            }
            Ok(None) => break WorkerExit::Finished,
            Err(err) => break WorkerExit::Failed(err.to_string()),
        }
    };

    if let Err(err) = stream.close().await {
        warn!("Bot could not disconnect cleanly: {}", err);
    }

    exit
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;

    use super::*;
    use crate::testing::{identity, FakeBot, Harness};

    #[tokio::test(start_paused = true)]
    async fn test_worker_is_paced_and_cancellable() {
        let bot = FakeBot::new(1000);
        let stream = bot.stream();
        let cancel = CancellationToken::new();

        let worker = tokio::spawn(run_worker(
            Box::new(stream),
            Duration::from_millis(100),
            cancel.clone(),
        ));

        // The first tick is immediate, then one every 100ms
        tokio::time::sleep(Duration::from_millis(450)).await;
        assert_eq!(bot.published.load(Ordering::SeqCst), 5);

        cancel.cancel();
        assert_eq!(worker.await.unwrap(), WorkerExit::Cancelled);
        assert!(bot.closed.load(Ordering::SeqCst));
        assert_eq!(bot.published.load(Ordering::SeqCst), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_worker_finishes_at_end_of_source() {
        let bot = FakeBot::new(3);

        let exit = run_worker(
            Box::new(bot.stream()),
            Duration::from_millis(40),
            CancellationToken::new(),
        )
        .await;

        assert_eq!(exit, WorkerExit::Finished);
        assert_eq!(bot.published.load(Ordering::SeqCst), 3);
        assert!(bot.closed.load(Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn test_finished_worker_requests_stop() {
        let harness = Harness::new();
        let room = harness.room(1);
        harness.bot.frames.store(2, Ordering::SeqCst);

        let workers = BotWorkers::new(harness.bot.clone());
        let handle = workers
            .spawn(&harness.context(), &room, "http://media/movie.mp4".to_string())
            .await
            .unwrap();

        assert_eq!(handle.kind, IngressKind::Bot);
        assert_eq!(workers.running_in(1), vec![handle.id.clone()]);

        tokio::time::sleep(Duration::from_secs(1)).await;

        assert_eq!(
            harness.next_action(),
            Some(ControlAction::Stop {
                room_id: 1,
                reason: StopReason::Finished
            })
        );

        // Cancelling a finished worker still cleans it up
        assert!(workers.cancel(&handle.id).await);
        assert!(!workers.cancel(&handle.id).await);
        assert!(workers.running_in(1).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_broken_worker_reports_failure() {
        let harness = Harness::new();
        let room = harness.room(1);
        let mut events = harness.coordinator.join(1, identity(1)).await.unwrap();

        harness.bot.fail_frames.store(true, Ordering::SeqCst);

        let workers = BotWorkers::new(harness.bot.clone());
        workers
            .spawn(&harness.context(), &room, "http://media/movie.mp4".to_string())
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_secs(1)).await;

        let envelope = events.recv().await.unwrap();
        match &envelope.event {
            RoomEvent::MovieFailed { reason, .. } => assert!(reason.contains("decoder crashed")),
            other => panic!("Unexpected event {:?}", other),
        }

        assert_eq!(
            harness.next_action(),
            Some(ControlAction::Stop {
                room_id: 1,
                reason: StopReason::Failed
            })
        );
        assert!(harness.bot.closed.load(Ordering::SeqCst));
    }
}
