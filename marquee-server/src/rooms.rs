use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post, put},
    Json,
};
use marquee_collab::{CreateRoom, Database};
use marquee_core::{Authorization, RoomData, Store};

use crate::{
    auth::Session,
    context::ServerContext,
    errors::{ServerError, ServerResult},
    schemas::{InviteSchema, NewRoomSchema, RedeemSchema, SelectMediaSchema, ValidatedJson},
    serialized::{AccessToken, ChatMessage, Invitation, Room, ToSerialized},
    Router,
};

/// Loads a room, if the session may enter it.
async fn authorized_room(
    context: &ServerContext,
    session: &Session,
    room_id: i32,
) -> ServerResult<RoomData> {
    let coordinator = &context.collab.coordinator;
    let room = context.collab.database.room(room_id).await?;

    match coordinator.access.authorize(&session.identity(), &room).await? {
        Authorization::Denied => Err(ServerError::Forbidden("Access denied".to_string())),
        _ => Ok(room),
    }
}

/// Loads a room, if the session may control its playback.
async fn controlled_room(
    context: &ServerContext,
    session: &Session,
    room_id: i32,
) -> ServerResult<RoomData> {
    let room = context.collab.database.room(room_id).await?;

    context
        .collab
        .coordinator
        .access
        .ensure_control(&session.identity(), &room)?;

    Ok(room)
}

#[utoipa::path(
    get,
    path = "/v1/rooms",
    tag = "rooms",
    security(
        ("BearerAuth" = [])
    ),
    responses(
        (status = 200, description = "Rooms the user created or was invited to", body = Vec<Room>)
    )
)]
async fn list_rooms(
    session: Session,
    State(context): State<ServerContext>,
) -> ServerResult<Json<Vec<Room>>> {
    let rooms = context.collab.rooms.rooms_for(&session.identity()).await?;

    Ok(Json(rooms.to_serialized()))
}

#[utoipa::path(
    post,
    path = "/v1/rooms",
    tag = "rooms",
    request_body = NewRoomSchema,
    security(
        ("BearerAuth" = [])
    ),
    responses(
        (status = 200, body = Room)
    )
)]
async fn create_room(
    session: Session,
    State(context): State<ServerContext>,
    ValidatedJson(body): ValidatedJson<NewRoomSchema>,
) -> ServerResult<Json<Room>> {
    let room = context
        .collab
        .rooms
        .create_room(
            &session.identity(),
            CreateRoom {
                name: body.name,
                scheduled_at: body.scheduled_at,
                duration_minutes: body.duration_minutes,
                media_id: body.media_id,
            },
        )
        .await?;

    Ok(Json(room.to_serialized()))
}

#[utoipa::path(
    get,
    path = "/v1/rooms/{id}",
    tag = "rooms",
    security(
        ("BearerAuth" = [])
    ),
    responses(
        (status = 200, body = Room),
        (status = 403, description = "User is neither creator nor invited")
    )
)]
async fn room(
    session: Session,
    State(context): State<ServerContext>,
    Path(room_id): Path<i32>,
) -> ServerResult<Json<Room>> {
    let room = authorized_room(&context, &session, room_id).await?;

    Ok(Json(room.to_serialized()))
}

#[utoipa::path(
    post,
    path = "/v1/rooms/{id}/invitations",
    tag = "rooms",
    request_body = InviteSchema,
    security(
        ("BearerAuth" = [])
    ),
    responses(
        (status = 200, description = "One invitation per new invitee", body = Vec<Invitation>)
    )
)]
async fn invite(
    session: Session,
    State(context): State<ServerContext>,
    Path(room_id): Path<i32>,
    ValidatedJson(body): ValidatedJson<InviteSchema>,
) -> ServerResult<Json<Vec<Invitation>>> {
    let invitations = context
        .collab
        .rooms
        .invite(&session.identity(), room_id, &body.emails)
        .await?;

    Ok(Json(invitations.to_serialized()))
}

#[utoipa::path(
    put,
    path = "/v1/rooms/{id}/media",
    tag = "rooms",
    request_body = SelectMediaSchema,
    security(
        ("BearerAuth" = [])
    ),
    responses(
        (status = 200, body = Room),
        (status = 409, description = "The movie is playing")
    )
)]
async fn select_media(
    session: Session,
    State(context): State<ServerContext>,
    Path(room_id): Path<i32>,
    ValidatedJson(body): ValidatedJson<SelectMediaSchema>,
) -> ServerResult<Json<Room>> {
    if let Some(media_id) = body.media_id {
        context.collab.database.media_by_id(media_id).await?;
    }

    let room = context
        .collab
        .rooms
        .select_media(&session.identity(), room_id, body.media_id)
        .await?;

    Ok(Json(room.to_serialized()))
}

#[utoipa::path(
    post,
    path = "/v1/rooms/{id}/playback/start",
    tag = "playback",
    security(
        ("BearerAuth" = [])
    ),
    responses(
        (status = 202, description = "Start was queued"),
        (status = 409, description = "Playback is running, or the room has no media")
    )
)]
async fn start_playback(
    session: Session,
    State(context): State<ServerContext>,
    Path(room_id): Path<i32>,
) -> ServerResult<StatusCode> {
    let room = controlled_room(&context, &session, room_id).await?;
    context.collab.coordinator.controller.request_start(room.id).await?;

    Ok(StatusCode::ACCEPTED)
}

#[utoipa::path(
    post,
    path = "/v1/rooms/{id}/playback/stop",
    tag = "playback",
    security(
        ("BearerAuth" = [])
    ),
    responses(
        (status = 202, description = "Stop was queued"),
        (status = 200, description = "Nothing is playing")
    )
)]
async fn stop_playback(
    session: Session,
    State(context): State<ServerContext>,
    Path(room_id): Path<i32>,
) -> ServerResult<StatusCode> {
    let room = controlled_room(&context, &session, room_id).await?;
    let queued = context.collab.coordinator.controller.request_stop(room.id).await?;

    Ok(if queued {
        StatusCode::ACCEPTED
    } else {
        StatusCode::OK
    })
}

#[utoipa::path(
    post,
    path = "/v1/rooms/{id}/playback/reset",
    tag = "playback",
    security(
        ("BearerAuth" = [])
    ),
    responses(
        (status = 200, body = Room),
        (status = 409, description = "Playback is running")
    )
)]
async fn reset_playback(
    session: Session,
    State(context): State<ServerContext>,
    Path(room_id): Path<i32>,
) -> ServerResult<Json<Room>> {
    let room = controlled_room(&context, &session, room_id).await?;
    context.collab.coordinator.controller.reset(room.id).await?;

    let room = context.collab.database.room(room.id).await?;
    Ok(Json(room.to_serialized()))
}

#[utoipa::path(
    get,
    path = "/v1/rooms/{id}/token",
    tag = "rooms",
    security(
        ("BearerAuth" = [])
    ),
    responses(
        (status = 200, body = AccessToken),
        (status = 403, description = "User is neither creator nor invited")
    )
)]
async fn access_token(
    session: Session,
    State(context): State<ServerContext>,
    Path(room_id): Path<i32>,
) -> ServerResult<Json<AccessToken>> {
    let room = authorized_room(&context, &session, room_id).await?;
    let token = context
        .collab
        .coordinator
        .access
        .access_token(&session.identity(), room.id)
        .await?;

    Ok(Json(AccessToken {
        room: room.transport_room,
        token,
    }))
}

#[utoipa::path(
    get,
    path = "/v1/rooms/{id}/messages",
    tag = "rooms",
    security(
        ("BearerAuth" = [])
    ),
    responses(
        (status = 200, description = "The most recent messages, oldest first", body = Vec<ChatMessage>)
    )
)]
async fn messages(
    session: Session,
    State(context): State<ServerContext>,
    Path(room_id): Path<i32>,
) -> ServerResult<Json<Vec<ChatMessage>>> {
    let room = authorized_room(&context, &session, room_id).await?;
    let limit = context.collab.coordinator.config().history_limit;
    let messages = context.collab.database.recent_messages(room.id, limit).await?;

    Ok(Json(messages.to_serialized()))
}

#[utoipa::path(
    post,
    path = "/v1/invitations/redeem",
    tag = "rooms",
    request_body = RedeemSchema,
    security(
        ("BearerAuth" = [])
    ),
    responses(
        (status = 200, body = Invitation),
        (status = 404, description = "No invitation has this token"),
        (status = 409, description = "Invitation was already redeemed")
    )
)]
async fn redeem_invitation(
    session: Session,
    State(context): State<ServerContext>,
    ValidatedJson(body): ValidatedJson<RedeemSchema>,
) -> ServerResult<Json<Invitation>> {
    let invitation = context
        .collab
        .coordinator
        .access
        .redeem(&session.identity(), &body.token)
        .await?;

    Ok(Json(invitation.to_serialized()))
}

pub fn router() -> Router {
    Router::new()
        .route("/", get(list_rooms).post(create_room))
        .route("/:id", get(room))
        .route("/:id/invitations", post(invite))
        .route("/:id/media", put(select_media))
        .route("/:id/playback/start", post(start_playback))
        .route("/:id/playback/stop", post(stop_playback))
        .route("/:id/playback/reset", post(reset_playback))
        .route("/:id/token", get(access_token))
        .route("/:id/messages", get(messages))
}

pub fn invitations_router() -> Router {
    Router::new().route("/redeem", post(redeem_invitation))
}
