//! The ingestion controller drives the playback state machine of rooms,
//! by creating and tearing down the ingress that streams a movie into a room.

use std::sync::Arc;

use chrono::Utc;
use log::{debug, error, info, warn};

use crate::{
    ActionKey, BotBackend, Chat, ControlAction, CoordinatorContext, CoordinatorError,
    IngestError, IngressHandle, IngressKind, KeyedTokens, PlaybackStatus, RoomData, RoomEvent,
    RoomId, StopReason, TransportError,
};

mod workers;

pub use workers::*;

/// Serializes and performs the start and stop transitions of every room.
pub struct Controller {
    context: CoordinatorContext,
    chat: Arc<Chat>,
    /// One token per room. A start or stop only happens while holding it.
    tokens: KeyedTokens<RoomId>,
    workers: BotWorkers,
}

impl Controller {
    pub fn new(context: &CoordinatorContext, chat: Arc<Chat>, bot: Arc<dyn BotBackend>) -> Self {
        Self {
            context: context.clone(),
            chat,
            tokens: Default::default(),
            workers: BotWorkers::new(bot),
        }
    }

    /// Checks that a start is possible right now and queues it.
    pub async fn request_start(&self, room_id: RoomId) -> Result<(), CoordinatorError> {
        let room = self.context.store.room(room_id).await?;
        room.session.check_start(room.media.is_some())?;

        if self.tokens.is_held(room_id) || self.context.is_pending(ActionKey::Start(room_id)) {
            return Err(CoordinatorError::AlreadyRunning);
        }

        if !self.context.enqueue(ControlAction::Start { room_id }) {
            return Err(CoordinatorError::AlreadyRunning);
        }

        Ok(())
    }

    /// Queues a stop, if there is anything to stop. Returns true if a stop was queued.
    pub async fn request_stop(&self, room_id: RoomId) -> Result<bool, CoordinatorError> {
        let room = self.context.store.room(room_id).await?;

        if !room.session.status.is_running() {
            debug!("Room {} is {}, not queueing a stop", room, room.session.status);
            return Ok(false);
        }

        Ok(self.context.enqueue(ControlAction::Stop {
            room_id,
            reason: StopReason::Requested,
        }))
    }

    /// Performs a queued action.
    pub async fn handle(&self, action: ControlAction) {
        let result = match action {
            ControlAction::Start { room_id } => self.start_ingestion(room_id).await.map(|_| ()),
            ControlAction::Stop { room_id, reason } => {
                self.stop_ingestion(room_id, reason).await
            }
        };

        self.context.complete(action.key());

        match result {
            Ok(()) => {}
            Err(
                err @ (CoordinatorError::AlreadyRunning
                | CoordinatorError::InvalidTransition { .. }
                | CoordinatorError::NoMediaSelected),
            ) => {
                info!("Skipping {:?}: {}", action, err);
            }
            Err(err) => {
                error!("Failed to perform {:?}: {}", action, err);
            }
        }
    }

    /// Streams the selected media of a room into its transport room.
    ///
    /// Tries the transport's ingress first, and the fallback bot if that fails.
    /// When both fail the session ends up [PlaybackStatus::Failed] and stays there until
    /// it is started or reset again.
    pub async fn start_ingestion(
        &self,
        room_id: RoomId,
    ) -> Result<IngressHandle, CoordinatorError> {
        let Some(_token) = self.tokens.try_acquire(room_id) else {
            return Err(CoordinatorError::AlreadyRunning);
        };

        let store = &self.context.store;

        // The room may have changed since this was requested
        let mut room = store.room(room_id).await?;
        let attempt = room.session.request_start(room.media.is_some())?;
        store.save_session(room_id, &room.session).await?;

        info!(
            "Starting ingestion of {} in room {}, attempt {}",
            room.movie_title(),
            room,
            attempt
        );

        let handle = match self.ingest(&room).await {
            Ok(handle) => handle,
            Err(err) => {
                error!("Ingestion in room {} failed: {}", room, err);

                room.session.ingress_failed(err.to_string())?;
                store.save_session(room_id, &room.session).await?;

                self.context
                    .publish(
                        room_id,
                        RoomEvent::MovieFailed {
                            movie_title: room.movie_title(),
                            reason: err.to_string(),
                            attempt,
                        },
                    )
                    .await;

                return Err(err.into());
            }
        };

        room.session.ingress_created(handle.clone(), Utc::now())?;

        if let Err(err) = store.save_session(room_id, &room.session).await {
            // Nothing would ever stop an ingress the store does not know about
            error!(
                "Could not persist ingress {} of room {}, releasing it: {}",
                handle, room, err
            );

            if let Err(release) = self.release(&handle).await {
                error!("Could not release ingress {}: {}", handle, release);
            }

            return Err(err.into());
        }

        info!("Ingestion in room {} is live via {}", room, handle);

        self.context
            .publish(
                room_id,
                RoomEvent::MovieStarted {
                    message: "Movie has started!".to_string(),
                    movie_title: room.movie_title(),
                    started_at: room.session.started_at,
                },
            )
            .await;

        self.chat
            .announce(
                room_id,
                format!(
                    "{} has joined! \"{}\" is now starting. Enjoy the show!",
                    self.context.config.bot_display_name,
                    room.movie_title()
                ),
            )
            .await;

        Ok(handle)
    }

    /// Tears down the ingress of a room.
    ///
    /// Stopping a room that is not streaming succeeds without doing anything.
    pub async fn stop_ingestion(
        &self,
        room_id: RoomId,
        reason: StopReason,
    ) -> Result<(), CoordinatorError> {
        let _token = self.tokens.acquire(room_id).await;

        let store = &self.context.store;
        let mut room = store.room(room_id).await?;

        let handle = match reason {
            StopReason::Expired => {
                let limit = room.session_limit(self.context.config.max_session_age());

                match room.session.expire(Utc::now(), limit) {
                    Some(handle) => handle,
                    None => {
                        info!("Ingestion in room {} is no longer expired", room);
                        return Ok(());
                    }
                }
            }
            _ => match room.session.status {
                PlaybackStatus::Active | PlaybackStatus::Stopping => room.session.request_stop()?,
                status => {
                    warn!("Ingestion in room {} is {}, nothing to stop", room, status);
                    return Ok(());
                }
            },
        };

        store.save_session(room_id, &room.session).await?;

        let released = match &handle {
            Some(handle) => self.release(handle).await,
            None => Ok(()),
        };

        match released {
            Ok(()) => {
                room.session.ingress_stopped()?;
                store.save_session(room_id, &room.session).await?;

                info!("Ingestion in room {} stopped ({:?})", room, reason);

                self.context
                    .publish(
                        room_id,
                        RoomEvent::MovieStopped {
                            message: "Movie has stopped!".to_string(),
                            movie_title: room.movie_title(),
                            stopped_at: Utc::now(),
                            reason,
                        },
                    )
                    .await;

                Ok(())
            }
            Err(err) => {
                error!("Stopping ingestion in room {} failed: {}", room, err);

                room.session.ingress_failed(err.to_string())?;
                store.save_session(room_id, &room.session).await?;

                self.context
                    .publish(
                        room_id,
                        RoomEvent::MovieFailed {
                            movie_title: room.movie_title(),
                            reason: err.to_string(),
                            attempt: room.session.attempt,
                        },
                    )
                    .await;

                Err(err.into())
            }
        }
    }

    /// Returns a failed or stopped room to idle, so the scheduler considers it again.
    pub async fn reset(&self, room_id: RoomId) -> Result<(), CoordinatorError> {
        let Some(_token) = self.tokens.try_acquire(room_id) else {
            return Err(CoordinatorError::AlreadyRunning);
        };

        let mut room = self.context.store.room(room_id).await?;
        room.session.reset()?;
        self.context.store.save_session(room_id, &room.session).await?;

        info!("Playback of room {} was reset", room);
        Ok(())
    }

    /// Cancels every fallback bot.
    pub async fn shutdown(&self) {
        self.workers.shutdown().await;
    }

    async fn ingest(&self, room: &RoomData) -> Result<IngressHandle, IngestError> {
        let config = &self.context.config;

        let media = room.media.as_ref().ok_or(IngestError::NoPlayableMedia)?;
        let source_url = media.playable_url(&config.media_base_url);

        debug!("Creating ingress for room {} from {}", room, source_url);

        match self
            .context
            .transport
            .create_ingress(&room.transport_room, &source_url)
            .await
        {
            Ok(info) => Ok(IngressHandle {
                kind: IngressKind::Ingress,
                id: info.ingress_id,
                url: info.url,
            }),
            Err(err) if !config.fallback_enabled => Err(IngestError::Transport(err)),
            Err(err) => {
                warn!(
                    "Ingress creation for room {} failed, falling back to bot: {}",
                    room, err
                );

                self.workers
                    .spawn(&self.context, room, source_url)
                    .await
                    .map_err(|fallback| IngestError::Fallback {
                        ingress: err.to_string(),
                        fallback: fallback.to_string(),
                    })
            }
        }
    }

    async fn release(&self, handle: &IngressHandle) -> Result<(), IngestError> {
        match handle.kind {
            IngressKind::Ingress => {
                match self.context.transport.stop_ingress(&handle.id).await {
                    Ok(()) => Ok(()),
                    Err(TransportError::NotFound(id)) => {
                        warn!("Ingress {} was already gone", id);
                        Ok(())
                    }
                    Err(err) => Err(IngestError::Release(err.to_string())),
                }
            }
            IngressKind::Bot => {
                if !self.workers.cancel(&handle.id).await {
                    warn!("Bot worker {} was not running", handle.id);
                }

                Ok(())
            }
        }
    }
}
