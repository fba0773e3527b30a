//! The seams to the real-time media transport.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Ingress {0} does not exist")]
    NotFound(String),
    #[error("Transport rejected the credentials")]
    Unauthorized,
    #[error("Could not sign credentials: {0}")]
    Credentials(String),
    #[error("Request to transport failed: {0}")]
    Request(String),
    #[error("Transport responded with {status}: {body}")]
    Response { status: u16, body: String },
}

/// An ingress created on the transport
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngressInfo {
    pub ingress_id: String,
    pub url: Option<String>,
}

/// What a participant holding an access token may do
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Grants {
    pub room_join: bool,
    pub can_publish: bool,
    pub can_subscribe: bool,
    pub can_publish_data: bool,
}

impl Grants {
    /// A participant that watches and chats.
    pub fn participant() -> Self {
        Self {
            room_join: true,
            can_publish: true,
            can_subscribe: true,
            can_publish_data: true,
        }
    }

    /// A participant that only pushes media, like the fallback bot.
    pub fn publisher() -> Self {
        Self {
            room_join: true,
            can_publish: true,
            can_subscribe: false,
            can_publish_data: false,
        }
    }
}

/// The real-time media transport rooms are streamed on.
#[async_trait]
pub trait MediaTransport: Send + Sync {
    /// Creates an ingress that pulls `source_url` into the transport room.
    async fn create_ingress(
        &self,
        room_name: &str,
        source_url: &str,
    ) -> Result<IngressInfo, TransportError>;

    /// Deletes an ingress. Fails with [TransportError::NotFound] if it is already gone.
    async fn stop_ingress(&self, ingress_id: &str) -> Result<(), TransportError>;

    /// Issues a token that lets `identity` connect to the transport room.
    fn issue_access_token(
        &self,
        identity: &str,
        room_name: &str,
        grants: Grants,
    ) -> Result<String, TransportError>;
}

#[derive(Debug, Error)]
pub enum BotError {
    #[error("Could not open source: {0}")]
    Source(String),
    #[error("Could not connect to the transport: {0}")]
    Connect(String),
    #[error("Could not publish frame: {0}")]
    Publish(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// One decoded video frame
#[derive(Debug, Clone)]
pub struct Frame {
    pub data: Vec<u8>,
    /// Position of the frame in the source.
    pub position: Duration,
}

/// What the fallback bot needs to start streaming into a room
#[derive(Debug, Clone)]
pub struct BotRequest {
    pub room_name: String,
    pub identity: String,
    pub token: String,
    pub source_url: String,
}

/// Produces connected frame streams for the fallback bot.
#[async_trait]
pub trait BotBackend: Send + Sync {
    /// Opens the source and connects to the transport room.
    async fn prepare(&self, request: BotRequest) -> Result<Box<dyn BotStream>, BotError>;
}

/// A source of frames, connected to a transport room.
#[async_trait]
pub trait BotStream: Send {
    /// The native frame rate of the source, if known.
    fn frame_rate(&self) -> Option<f32>;

    /// Returns the next frame, or `None` at the end of the source.
    async fn next_frame(&mut self) -> Result<Option<Frame>, BotError>;

    async fn publish(&mut self, frame: Frame) -> Result<(), BotError>;

    /// Disconnects from the transport and releases the source.
    async fn close(self: Box<Self>) -> Result<(), BotError>;
}
