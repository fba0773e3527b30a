use async_trait::async_trait;
use chrono::{DateTime, Utc};
use marquee_core::{
    InvitationData, MediaData, MediaId, PrimaryKey, RoomData, RoomId, Store, StoreError, UserId,
};
use thiserror::Error;

mod data;
pub use data::*;

mod pg;
pub use pg::*;

pub type Result<T> = std::result::Result<T, DatabaseError>;

#[derive(Debug, Error)]
pub enum DatabaseError {
    /// An unknown or internal error happened with the database
    #[error(transparent)]
    Internal(Box<dyn std::error::Error + Send + Sync>),
    /// A resource already exists
    #[error("{resource} with {field} of value {value} already exists")]
    Conflict {
        /// The resource in question
        resource: &'static str,
        /// The field that is conflicting
        field: &'static str,
        /// The conflicting value
        value: String,
    },
    /// A resource in the database doesn't exist
    #[error("{resource}:{identifier} doesn't exist")]
    NotFound {
        resource: &'static str,
        identifier: &'static str,
    },
}

/// Helper trait to reduce boilerplate
pub trait IntoDatabaseError {
    fn not_found_or(self, resource: &'static str, identifier: &'static str) -> DatabaseError;
    fn any(self) -> DatabaseError;
}

/// Helper trait to reduce boilerplate
pub trait DatabaseResult {
    /// Turns the Result into a conflict error if it's Ok()
    fn conflict_or_ok(self, resource: &'static str, field: &'static str, value: &str)
        -> Result<()>;
}

impl<T> DatabaseResult for Result<T> {
    fn conflict_or_ok(
        self,
        resource: &'static str,
        field: &'static str,
        value: &str,
    ) -> Result<()> {
        match self {
            Ok(_) => Err(DatabaseError::Conflict {
                resource,
                field,
                value: value.to_string(),
            }),
            Err(DatabaseError::NotFound { .. }) => Ok(()),
            Err(e) => Err(e),
        }
    }
}

impl From<DatabaseError> for StoreError {
    fn from(value: DatabaseError) -> Self {
        match value {
            DatabaseError::NotFound {
                resource,
                identifier,
            } => StoreError::NotFound {
                resource,
                identifier: identifier.to_string(),
            },
            DatabaseError::Internal(err) => StoreError::Internal(err),
            conflict => StoreError::Internal(Box::new(conflict)),
        }
    }
}

/// Represents a type that can fetch marquee data from a database.
///
/// Everything the coordinator itself needs is part of [Store], this adds what
/// accounts and room management need on top.
#[async_trait]
pub trait Database: Store {
    async fn user_by_id(&self, user_id: UserId) -> Result<UserData>;
    async fn user_by_username(&self, username: &str) -> Result<UserData>;
    async fn user_by_email(&self, email: &str) -> Result<UserData>;
    async fn create_user(&self, new_user: NewUser) -> Result<UserData>;

    /// Returns an unexpired session.
    async fn session_by_token(&self, token: &str) -> Result<SessionData>;
    async fn create_session(&self, new_session: NewSession) -> Result<SessionData>;
    async fn delete_session_by_token(&self, token: &str) -> Result<()>;
    async fn clear_expired_sessions(&self) -> Result<()>;

    async fn create_room(&self, new_room: NewRoom) -> Result<RoomData>;
    async fn set_transport_room(&self, room_id: RoomId, transport_room: &str) -> Result<()>;
    async fn select_media(&self, room_id: RoomId, media_id: Option<MediaId>) -> Result<()>;
    /// Returns the rooms a user created or was invited to.
    async fn rooms_for_user(&self, user_id: UserId) -> Result<Vec<RoomData>>;

    async fn create_invitation(&self, new_invitation: NewInvitation) -> Result<InvitationData>;

    async fn media_by_id(&self, media_id: MediaId) -> Result<MediaData>;
    async fn create_media(&self, new_media: NewMedia) -> Result<MediaData>;
}

#[derive(Debug)]
pub struct NewUser {
    pub username: String,
    pub email: String,
    pub password: String,
    pub display_name: String,
}

#[derive(Debug)]
pub struct NewSession {
    pub token: String,
    pub user_id: UserId,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug)]
pub struct NewRoom {
    pub name: String,
    /// The owner of the new room
    pub creator_id: UserId,
    pub scheduled_at: DateTime<Utc>,
    pub duration_minutes: i32,
    pub media_id: Option<MediaId>,
}

#[derive(Debug)]
pub struct NewInvitation {
    pub room_id: RoomId,
    pub invitee_id: UserId,
    pub email: String,
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug)]
pub struct NewMedia {
    pub title: String,
    pub file_path: String,
    pub uploaded_by: Option<PrimaryKey>,
}
