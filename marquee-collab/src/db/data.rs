use chrono::{DateTime, Utc};
use marquee_core::{Identity, PrimaryKey, UserId};
use sqlx::FromRow;

/// A marquee account
#[derive(Debug, Clone, FromRow)]
pub struct UserData {
    pub id: UserId,
    pub username: String,
    pub email: String,
    /// The argon2 hash of the password
    pub password: String,
    pub display_name: String,
}

impl UserData {
    /// The identity the coordinator knows this user by.
    pub fn identity(&self) -> Identity {
        Identity {
            user_id: self.id,
            username: self.username.clone(),
            email: self.email.clone(),
        }
    }
}

/// Login session data for authentication
#[derive(Debug, Clone)]
pub struct SessionData {
    pub id: PrimaryKey,
    /// The session token, or key if you will
    pub token: String,
    /// The user that is logged in
    pub user: UserData,
    pub expires_at: DateTime<Utc>,
}
