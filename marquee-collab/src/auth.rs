use argon2::{
    password_hash::{Encoding, SaltString},
    Argon2, PasswordHash, PasswordHasher, PasswordVerifier,
};
use chrono::{Duration, Utc};
use log::{info, warn};
use marquee_core::Identity;
use rand::rngs::OsRng;
use std::sync::Arc;
use thiserror::Error;

use crate::{util::random_string, Database, DatabaseError, NewSession, NewUser, SessionData, UserData};

/// The identity provider: accounts, password logins and bearer sessions.
pub struct Auth<Db> {
    db: Arc<Db>,
    argon: Argon2<'static>,
}

#[derive(Debug, Error)]
pub enum AuthError {
    /// Username or password is incorrect
    #[error("Invalid credentials")]
    InvalidCredentials,
    /// The session does not exist or has expired
    #[error("Invalid session")]
    InvalidSession,
    /// Something else went wrong with the database
    #[error(transparent)]
    Db(DatabaseError),
    #[error("HashError: {0}")]
    HashError(String),
}

impl<Db> Auth<Db>
where
    Db: Database,
{
    const SESSION_DURATION_IN_DAYS: i64 = 7;
    const TOKEN_LENGTH: usize = 32;

    pub fn new(db: &Arc<Db>) -> Self {
        Self {
            db: db.clone(),
            argon: Argon2::default(),
        }
    }

    /// Logs in a user, returning a new session
    pub async fn login(&self, credentials: Credentials) -> Result<SessionData, AuthError> {
        self.clear_expired().await;

        let user = self
            .db
            .user_by_username(&credentials.username)
            .await
            .map_err(|e| match e {
                DatabaseError::NotFound { .. } => AuthError::InvalidCredentials,
                err => AuthError::Db(err),
            })?;

        self.verify(&user, &credentials.password)?;

        let session = self
            .db
            .create_session(NewSession {
                token: random_string(Self::TOKEN_LENGTH),
                user_id: user.id,
                expires_at: Utc::now() + Duration::days(Self::SESSION_DURATION_IN_DAYS),
            })
            .await
            .map_err(AuthError::Db)?;

        info!("User {} logged in", user.username);
        Ok(session)
    }

    /// Deletes the associated session, if it exists
    pub async fn logout(&self, token: &str) -> Result<(), DatabaseError> {
        self.db.delete_session_by_token(token).await
    }

    /// Creates a user with a hashed password
    pub async fn register(&self, new_user: NewPlainUser) -> Result<UserData, AuthError> {
        let salt = SaltString::generate(&mut OsRng);
        let hashed_password = self
            .argon
            .hash_password(new_user.password.as_bytes(), &salt)
            .map_err(|e| AuthError::HashError(e.to_string()))?
            .to_string();

        let user = self
            .db
            .create_user(NewUser {
                username: new_user.username,
                email: new_user.email,
                password: hashed_password,
                display_name: new_user.display_name,
            })
            .await
            .map_err(AuthError::Db)?;

        info!("Registered user {} (#{})", user.username, user.id);
        Ok(user)
    }

    /// Returns a session if it exists
    pub async fn session(&self, token: &str) -> Result<SessionData, DatabaseError> {
        self.db.session_by_token(token).await
    }

    /// Resolves a bearer token to the identity the coordinator works with.
    pub async fn identity(&self, token: &str) -> Result<Identity, AuthError> {
        match self.db.session_by_token(token).await {
            Ok(session) => Ok(session.user.identity()),
            Err(DatabaseError::NotFound { .. }) => Err(AuthError::InvalidSession),
            Err(err) => Err(AuthError::Db(err)),
        }
    }

    fn verify(&self, user: &UserData, password: &str) -> Result<(), AuthError> {
        let stored_password = PasswordHash::parse(&user.password, Encoding::default())
            .map_err(|e| AuthError::HashError(e.to_string()))?;

        self.argon
            .verify_password(password.as_bytes(), &stored_password)
            .map_err(|_| AuthError::InvalidCredentials)
    }

    async fn clear_expired(&self) {
        if let Err(err) = self.db.clear_expired_sessions().await {
            warn!("Could not clear expired sessions: {}", err);
        }
    }
}

#[derive(Debug)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

#[derive(Debug)]
pub struct NewPlainUser {
    pub username: String,
    pub email: String,
    pub password: String,
    pub display_name: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MemoryDatabase;

    fn auth() -> Auth<MemoryDatabase> {
        Auth::new(&Arc::new(MemoryDatabase::default()))
    }

    fn fritz() -> NewPlainUser {
        NewPlainUser {
            username: "fritz".to_string(),
            email: "fritz@example.com".to_string(),
            password: "metropolis".to_string(),
            display_name: "Fritz".to_string(),
        }
    }

    #[tokio::test]
    async fn test_passwords_are_hashed() {
        let auth = auth();
        let user = auth.register(fritz()).await.unwrap();

        assert_ne!(user.password, "metropolis");
        assert!(user.password.starts_with("$argon2"));
    }

    #[tokio::test]
    async fn test_login_and_identity() {
        let auth = auth();
        let user = auth.register(fritz()).await.unwrap();

        let session = auth
            .login(Credentials {
                username: "fritz".to_string(),
                password: "metropolis".to_string(),
            })
            .await
            .unwrap();

        assert_eq!(session.token.len(), 32);

        let identity = auth.identity(&session.token).await.unwrap();
        assert_eq!(identity, user.identity());

        auth.logout(&session.token).await.unwrap();
        assert!(matches!(
            auth.identity(&session.token).await,
            Err(AuthError::InvalidSession)
        ));
    }

    #[tokio::test]
    async fn test_wrong_credentials() {
        let auth = auth();
        auth.register(fritz()).await.unwrap();

        for (username, password) in [("fritz", "nosferatu"), ("thea", "metropolis")] {
            let result = auth
                .login(Credentials {
                    username: username.to_string(),
                    password: password.to_string(),
                })
                .await;

            assert!(matches!(result, Err(AuthError::InvalidCredentials)));
        }
    }

    #[tokio::test]
    async fn test_usernames_are_unique() {
        let auth = auth();
        auth.register(fritz()).await.unwrap();

        assert!(matches!(
            auth.register(fritz()).await,
            Err(AuthError::Db(DatabaseError::Conflict { .. }))
        ));
    }
}
