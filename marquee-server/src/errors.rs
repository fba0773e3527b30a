use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use log::error;
use marquee_collab::{AuthError, DatabaseError, RoomError};
use marquee_core::{CoordinatorError, StoreError};
use thiserror::Error;

pub type ServerResult<T> = Result<T, ServerError>;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("{resource}:{identifier} not found")]
    NotFound {
        resource: &'static str,
        identifier: String,
    },
    #[error("{resource} with {field} of value {value} already exists")]
    Conflict {
        resource: &'static str,
        field: &'static str,
        value: String,
    },
    #[error("Invalid credentials")]
    InvalidCredentials,
    #[error("Session does not exist")]
    Unauthorized,
    #[error("{0}")]
    Forbidden(String),
    /// The request is valid, but conflicts with the state of the room
    #[error("{0}")]
    Rejected(String),
    #[error("{0}")]
    BadRequest(String),
    #[error("Unknown internal error: {0}")]
    Unknown(String),
}

impl ServerError {
    pub(crate) fn as_status_code(&self) -> StatusCode {
        match self {
            Self::NotFound { .. } => StatusCode::NOT_FOUND,
            Self::Conflict { .. } | Self::Rejected(_) => StatusCode::CONFLICT,
            Self::InvalidCredentials | Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::Unknown(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn unknown(err: impl ToString) -> Self {
        let message = err.to_string();
        error!("Request failed: {}", message);

        Self::Unknown(message)
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        (self.as_status_code(), self.to_string()).into_response()
    }
}

impl From<AuthError> for ServerError {
    fn from(value: AuthError) -> Self {
        match value {
            AuthError::InvalidCredentials => Self::InvalidCredentials,
            AuthError::InvalidSession => Self::Unauthorized,
            AuthError::Db(err) => err.into(),
            e => Self::unknown(e),
        }
    }
}

impl From<DatabaseError> for ServerError {
    fn from(value: DatabaseError) -> Self {
        match value {
            DatabaseError::NotFound {
                resource,
                identifier,
            } => Self::NotFound {
                resource,
                identifier: identifier.to_string(),
            },
            DatabaseError::Conflict {
                resource,
                field,
                value,
            } => Self::Conflict {
                resource,
                field,
                value,
            },
            e => Self::unknown(e),
        }
    }
}

impl From<CoordinatorError> for ServerError {
    fn from(value: CoordinatorError) -> Self {
        use CoordinatorError::*;

        match value {
            AccessDenied => Self::Forbidden(value.to_string()),
            RoomNotFound => Self::NotFound {
                resource: "room",
                identifier: "id".to_string(),
            },
            InvitationNotFound => Self::NotFound {
                resource: "invitation",
                identifier: "token".to_string(),
            },
            AlreadyRunning | InvalidTransition { .. } | NoMediaSelected | InvitationConsumed => {
                Self::Rejected(value.to_string())
            }
            EmptyMessage | NotConnected => Self::BadRequest(value.to_string()),
            e => Self::unknown(e),
        }
    }
}

impl From<StoreError> for ServerError {
    fn from(value: StoreError) -> Self {
        CoordinatorError::from(value).into()
    }
}

impl From<RoomError> for ServerError {
    fn from(value: RoomError) -> Self {
        match value {
            RoomError::RoomNotFound => Self::NotFound {
                resource: "room",
                identifier: "id".to_string(),
            },
            RoomError::NotCreator => Self::Forbidden(value.to_string()),
            RoomError::NoEmails | RoomError::UnknownInvitee(_) => {
                Self::BadRequest(value.to_string())
            }
            RoomError::PlaybackRunning => Self::Rejected(value.to_string()),
            RoomError::Db(err) => err.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use marquee_core::PlaybackStatus;

    use super::*;

    fn status(error: impl Into<ServerError>) -> StatusCode {
        error.into().as_status_code()
    }

    #[test]
    fn test_coordinator_errors() {
        assert_eq!(status(CoordinatorError::AccessDenied), StatusCode::FORBIDDEN);
        assert_eq!(status(CoordinatorError::RoomNotFound), StatusCode::NOT_FOUND);
        assert_eq!(status(CoordinatorError::AlreadyRunning), StatusCode::CONFLICT);
        assert_eq!(
            status(CoordinatorError::InvalidTransition {
                from: PlaybackStatus::Stopping,
                action: "start"
            }),
            StatusCode::CONFLICT
        );
        assert_eq!(
            status(CoordinatorError::InvitationConsumed),
            StatusCode::CONFLICT
        );
        assert_eq!(
            status(CoordinatorError::EmptyMessage),
            StatusCode::BAD_REQUEST
        );
    }

    #[test]
    fn test_collab_errors() {
        assert_eq!(status(AuthError::InvalidSession), StatusCode::UNAUTHORIZED);
        assert_eq!(
            status(AuthError::InvalidCredentials),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status(DatabaseError::Conflict {
                resource: "user",
                field: "username",
                value: "fritz".to_string()
            }),
            StatusCode::CONFLICT
        );
        assert_eq!(
            status(StoreError::NotFound {
                resource: "room",
                identifier: "3".to_string()
            }),
            StatusCode::NOT_FOUND
        );
        assert_eq!(status(RoomError::NotCreator), StatusCode::FORBIDDEN);
        assert_eq!(
            status(RoomError::UnknownInvitee("a@b.c".to_string())),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status(RoomError::Db(DatabaseError::NotFound {
                resource: "media",
                identifier: "id"
            })),
            StatusCode::NOT_FOUND
        );
    }
}
