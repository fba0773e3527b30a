use chrono::{Duration, Utc};
use jsonwebtoken::{encode, EncodingKey, Header};
use marquee_core::{Grants, TransportError};
use serde::{Deserialize, Serialize};

/// Claims of the short-lived token the server authenticates API requests with
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerClaims {
    pub iss: String,
    pub sub: String,
    pub exp: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub room: Option<String>,
}

/// The room permissions embedded in a participant token
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoGrant {
    pub room: String,
    pub room_join: bool,
    pub can_publish: bool,
    pub can_subscribe: bool,
    pub can_publish_data: bool,
}

/// Claims of a token a participant connects to a transport room with
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParticipantClaims {
    pub iss: String,
    pub sub: String,
    pub name: String,
    pub nbf: i64,
    pub exp: i64,
    pub video: VideoGrant,
}

impl ServerClaims {
    const LIFETIME_IN_SECONDS: i64 = 60;

    pub fn new(api_key: &str, room: Option<&str>) -> Self {
        Self {
            iss: api_key.to_string(),
            sub: "server".to_string(),
            exp: (Utc::now() + Duration::seconds(Self::LIFETIME_IN_SECONDS)).timestamp(),
            room: room.map(str::to_string),
        }
    }
}

impl ParticipantClaims {
    pub fn new(
        api_key: &str,
        identity: &str,
        room: &str,
        grants: Grants,
        lifetime: Duration,
    ) -> Self {
        let now = Utc::now();

        Self {
            iss: api_key.to_string(),
            sub: identity.to_string(),
            name: identity.to_string(),
            nbf: now.timestamp(),
            exp: (now + lifetime).timestamp(),
            video: VideoGrant {
                room: room.to_string(),
                room_join: grants.room_join,
                can_publish: grants.can_publish,
                can_subscribe: grants.can_subscribe,
                can_publish_data: grants.can_publish_data,
            },
        }
    }
}

/// Signs claims with HS256.
pub fn sign<C>(claims: &C, secret: &str) -> Result<String, TransportError>
where
    C: Serialize,
{
    encode(
        &Header::default(),
        claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .map_err(|e| TransportError::Credentials(e.to_string()))
}
