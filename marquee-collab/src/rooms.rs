use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use lazy_static::lazy_static;
use log::info;
use marquee_core::{Identity, InvitationData, MediaId, RoomData, RoomId, StoreError};
use regex::Regex;
use thiserror::Error;

use crate::{util::random_string, Database, DatabaseError, NewInvitation, NewRoom};

lazy_static! {
    static ref NOT_SLUG: Regex = Regex::new(r"[^a-z0-9]+").expect("slug pattern is valid");
}

/// Creates rooms, invites users to them, and selects what they watch.
pub struct RoomManager<Db> {
    database: Arc<Db>,
}

#[derive(Debug, Error)]
pub enum RoomError {
    #[error("Room not found")]
    RoomNotFound,
    #[error("Only the creator of the room can do this")]
    NotCreator,
    #[error("No emails provided")]
    NoEmails,
    #[error("No user with email {0}")]
    UnknownInvitee(String),
    #[error("Cannot change the movie while it is playing")]
    PlaybackRunning,
    #[error(transparent)]
    Db(#[from] DatabaseError),
}

impl From<StoreError> for RoomError {
    fn from(value: StoreError) -> Self {
        match value {
            StoreError::NotFound {
                resource: "room", ..
            } => Self::RoomNotFound,
            other => Self::Db(DatabaseError::Internal(Box::new(other))),
        }
    }
}

#[derive(Debug)]
pub struct CreateRoom {
    pub name: String,
    pub scheduled_at: DateTime<Utc>,
    pub duration_minutes: i32,
    pub media_id: Option<MediaId>,
}

/// Derives the name of a room on the media transport from its display name and id.
pub fn transport_room_name(name: &str, room_id: RoomId) -> String {
    const MAX_SLUG_LENGTH: usize = 48;

    let lowercase = name.to_lowercase();
    let slug = NOT_SLUG.replace_all(&lowercase, "-");
    let slug: String = slug.trim_matches('-').chars().take(MAX_SLUG_LENGTH).collect();
    let slug = slug.trim_end_matches('-');

    if slug.is_empty() {
        format!("room-{}", room_id)
    } else {
        format!("{}-{}", slug, room_id)
    }
}

impl<Db> RoomManager<Db>
where
    Db: Database,
{
    const INVITATION_LIFETIME_IN_DAYS: i64 = 7;
    const TOKEN_LENGTH: usize = 32;

    pub fn new(database: &Arc<Db>) -> Self {
        Self {
            database: database.clone(),
        }
    }

    /// Creates a new room, owned by the given identity.
    pub async fn create_room(
        &self,
        creator: &Identity,
        new_room: CreateRoom,
    ) -> Result<RoomData, RoomError> {
        let mut room = self
            .database
            .create_room(NewRoom {
                name: new_room.name,
                creator_id: creator.user_id,
                scheduled_at: new_room.scheduled_at,
                duration_minutes: new_room.duration_minutes,
                media_id: new_room.media_id,
            })
            .await?;

        // The name depends on the id, so it can only be set once the row exists
        let transport_room = transport_room_name(&room.name, room.id);
        self.database
            .set_transport_room(room.id, &transport_room)
            .await?;
        room.transport_room = transport_room;

        info!("User {} created room {}", creator.user_id, room);
        Ok(room)
    }

    /// Invites users by email. Every invitee gets a single-use token.
    pub async fn invite(
        &self,
        inviter: &Identity,
        room_id: RoomId,
        emails: &[String],
    ) -> Result<Vec<InvitationData>, RoomError> {
        let room = self.owned_room(inviter, room_id).await?;

        if emails.is_empty() {
            return Err(RoomError::NoEmails);
        }

        let mut invitees = vec![];
        for email in emails {
            let user = self
                .database
                .user_by_email(email)
                .await
                .map_err(|e| match e {
                    DatabaseError::NotFound { .. } => RoomError::UnknownInvitee(email.clone()),
                    err => RoomError::Db(err),
                })?;

            if user.id != room.creator_id && !invitees.iter().any(|(id, _)| *id == user.id) {
                invitees.push((user.id, user.email));
            }
        }

        let expires_at = Utc::now() + Duration::days(Self::INVITATION_LIFETIME_IN_DAYS);
        let mut invitations = vec![];

        for (invitee_id, email) in invitees {
            let invitation = self
                .database
                .create_invitation(NewInvitation {
                    room_id,
                    invitee_id,
                    email,
                    token: random_string(Self::TOKEN_LENGTH),
                    expires_at,
                })
                .await?;

            info!("Invited user {} to room {}", invitee_id, room);
            invitations.push(invitation);
        }

        Ok(invitations)
    }

    /// Selects the movie of a room. Not allowed while it is being streamed.
    pub async fn select_media(
        &self,
        identity: &Identity,
        room_id: RoomId,
        media_id: Option<MediaId>,
    ) -> Result<RoomData, RoomError> {
        let room = self.owned_room(identity, room_id).await?;

        if room.session.status.is_running() {
            return Err(RoomError::PlaybackRunning);
        }

        self.database.select_media(room_id, media_id).await?;
        Ok(self.database.room(room_id).await?)
    }

    /// Returns the rooms the identity created or was invited to.
    pub async fn rooms_for(&self, identity: &Identity) -> Result<Vec<RoomData>, RoomError> {
        Ok(self.database.rooms_for_user(identity.user_id).await?)
    }

    async fn owned_room(&self, identity: &Identity, room_id: RoomId) -> Result<RoomData, RoomError> {
        let room = self.database.room(room_id).await?;

        if room.creator_id != identity.user_id {
            return Err(RoomError::NotCreator);
        }

        Ok(room)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{testing::MemoryDatabase, NewMedia, NewUser, UserData};
    use marquee_core::{PlaybackStatus, Store};

    #[test]
    fn test_transport_room_names() {
        assert_eq!(transport_room_name("Friday Night!", 3), "friday-night-3");
        assert_eq!(transport_room_name("  Ünïcode  Kino ", 12), "n-code-kino-12");
        assert_eq!(transport_room_name("???", 5), "room-5");

        let long = transport_room_name(&"a".repeat(100), 1);
        assert_eq!(long, format!("{}-1", "a".repeat(48)));
    }

    async fn user(database: &MemoryDatabase, name: &str) -> UserData {
        database
            .create_user(NewUser {
                username: name.to_string(),
                email: format!("{}@example.com", name),
                password: "hash".to_string(),
                display_name: name.to_string(),
            })
            .await
            .unwrap()
    }

    async fn setup() -> (Arc<MemoryDatabase>, RoomManager<MemoryDatabase>, Identity, RoomData) {
        let database = Arc::new(MemoryDatabase::default());
        let manager = RoomManager::new(&database);
        let creator = user(&database, "fritz").await.identity();

        let room = manager
            .create_room(
                &creator,
                CreateRoom {
                    name: "Friday night".to_string(),
                    scheduled_at: Utc::now(),
                    duration_minutes: 90,
                    media_id: None,
                },
            )
            .await
            .unwrap();

        (database, manager, creator, room)
    }

    #[tokio::test]
    async fn test_created_rooms_have_a_transport_room() {
        let (database, _, creator, room) = setup().await;

        assert_eq!(room.creator_id, creator.user_id);
        assert_eq!(room.transport_room, format!("friday-night-{}", room.id));
        assert_eq!(
            database.room(room.id).await.unwrap().transport_room,
            room.transport_room
        );
    }

    #[tokio::test]
    async fn test_invitations() {
        let (database, manager, creator, room) = setup().await;
        let thea = user(&database, "thea").await.identity();

        let emails = vec![
            "thea@example.com".to_string(),
            "THEA@example.com".to_string(),
            "fritz@example.com".to_string(),
        ];
        let invitations = manager.invite(&creator, room.id, &emails).await.unwrap();

        // Duplicates and the creator are skipped
        assert_eq!(invitations.len(), 1);
        assert_eq!(invitations[0].invitee_id, thea.user_id);
        assert_eq!(invitations[0].token.len(), 32);
        assert!(!invitations[0].used);
        assert!(invitations[0].expires_at > Utc::now() + Duration::days(6));

        let rooms = manager.rooms_for(&thea).await.unwrap();
        assert_eq!(rooms.len(), 1);
        assert_eq!(rooms[0].id, room.id);

        assert!(matches!(
            manager.invite(&thea, room.id, &emails).await,
            Err(RoomError::NotCreator)
        ));
        assert!(matches!(
            manager.invite(&creator, room.id, &[]).await,
            Err(RoomError::NoEmails)
        ));
        assert!(matches!(
            manager
                .invite(&creator, room.id, &["nobody@example.com".to_string()])
                .await,
            Err(RoomError::UnknownInvitee(_))
        ));
        assert!(matches!(
            manager.invite(&creator, 999, &emails).await,
            Err(RoomError::RoomNotFound)
        ));
    }

    #[tokio::test]
    async fn test_media_selection() {
        let (database, manager, creator, room) = setup().await;
        let media = database
            .create_media(NewMedia {
                title: "Metropolis".to_string(),
                file_path: "movies/metropolis.mp4".to_string(),
                uploaded_by: Some(creator.user_id),
            })
            .await
            .unwrap();

        let updated = manager
            .select_media(&creator, room.id, Some(media.id))
            .await
            .unwrap();
        assert_eq!(updated.media, Some(media));

        database.store.update_session(room.id, |session| {
            session.status = PlaybackStatus::Active;
        });

        assert!(matches!(
            manager.select_media(&creator, room.id, None).await,
            Err(RoomError::PlaybackRunning)
        ));
    }
}
