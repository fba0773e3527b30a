//! The websocket members of a room are connected with.
//!
//! Every event published to the room is sent down as an [marquee_core::EventEnvelope].
//! Messages sent up are parsed as [ClientMessage]s, rejected ones are answered
//! with an [ErrorFrame] while the connection stays open.

use axum::{
    extract::{
        ws::{close_code, CloseFrame, Message, WebSocket, WebSocketUpgrade},
        Path, State,
    },
    response::IntoResponse,
    routing::get,
};
use futures_util::{SinkExt, StreamExt};
use log::{debug, error, info};
use marquee_core::{ClientMessage, Connection, Coordinator, CoordinatorError, Identity, RoomId};
use serde::Serialize;

use crate::{auth::Session, context::ServerContext, errors::ServerError, Router};

/// Sent when a message was rejected
#[derive(Debug, PartialEq, Serialize)]
#[serde(tag = "type", rename = "error")]
struct ErrorFrame {
    code: u16,
    message: String,
}

impl From<CoordinatorError> for ErrorFrame {
    fn from(value: CoordinatorError) -> Self {
        let error = ServerError::from(value);

        Self {
            code: error.as_status_code().as_u16(),
            message: error.to_string(),
        }
    }
}

#[utoipa::path(
    get,
    path = "/v1/rooms/{id}/gateway",
    tag = "rooms",
    security(
        ("BearerAuth" = [])
    ),
    responses(
        (status = 101, description = "Upgraded to a websocket. Closed with 4003 if access is denied, 4004 if the room does not exist")
    )
)]
async fn gateway(
    ws: WebSocketUpgrade,
    session: Session,
    State(context): State<ServerContext>,
    Path(room_id): Path<RoomId>,
) -> impl IntoResponse {
    let identity = session.identity();

    ws.on_upgrade(move |socket| handle_socket(socket, context, room_id, identity))
}

async fn handle_socket(
    socket: WebSocket,
    context: ServerContext,
    room_id: RoomId,
    identity: Identity,
) {
    let coordinator = context.collab.coordinator.clone();
    let (mut sender, mut receiver) = socket.split();

    let mut events = match coordinator.join(room_id, identity).await {
        Ok(events) => events,
        Err(err) => {
            let code = err.close_code().unwrap_or(close_code::ERROR);
            debug!("Closing gateway to room {} with {}: {}", room_id, code, err);

            let _ = sender
                .send(Message::Close(Some(CloseFrame {
                    code,
                    reason: err.to_string().into(),
                })))
                .await;

            return;
        }
    };

    let connection = events.connection().clone();

    loop {
        tokio::select! {
            envelope = events.recv() => {
                // The registry drops connections that fall too far behind
                let Some(envelope) = envelope else {
                    info!("Connection {} fell behind, closing", connection.id);

                    let _ = sender
                        .send(Message::Close(Some(CloseFrame {
                            code: close_code::AGAIN,
                            reason: "Too many undelivered events".into(),
                        })))
                        .await;

                    break;
                };

                let json = match serde_json::to_string(envelope.as_ref()) {
                    Ok(json) => json,
                    Err(err) => {
                        error!("Could not serialize event: {}", err);
                        continue;
                    }
                };

                if sender.send(Message::Text(json)).await.is_err() {
                    break;
                }
            }
            message = receiver.next() => {
                match message {
                    Some(Ok(Message::Text(text))) => {
                        let Some(frame) = handle_text(&coordinator, &connection, &text).await else {
                            continue;
                        };

                        let json = match serde_json::to_string(&frame) {
                            Ok(json) => json,
                            Err(_) => continue,
                        };

                        if sender.send(Message::Text(json)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                    Some(Ok(_)) => {}
                }
            }
        }
    }

    // Dropping the event stream leaves the room
    drop(events);
    debug!("Connection {} to room {} ended", connection.id, room_id);
}

/// Performs a message sent by a member. Returns a frame to answer with if it was rejected.
async fn handle_text(
    coordinator: &Coordinator,
    connection: &Connection,
    text: &str,
) -> Option<ErrorFrame> {
    let message = match serde_json::from_str::<ClientMessage>(text) {
        Ok(message) => message,
        Err(err) => {
            return Some(ErrorFrame {
                code: 400,
                message: format!("Invalid message: {}", err),
            })
        }
    };

    coordinator
        .handle_message(connection, message)
        .await
        .err()
        .map(ErrorFrame::from)
}

pub fn router() -> Router {
    Router::new().route("/:id/gateway", get(gateway))
}
