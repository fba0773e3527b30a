use std::borrow::BorrowMut;

use axum::{response::IntoResponse, Json};
use utoipa::{
    openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme},
    Modify, OpenApi,
};

use crate::{auth, gateway, media, rooms, scheduler, schemas, serialized};

#[derive(OpenApi)]
#[openapi(
    paths(
        auth::register,
        auth::login,
        auth::logout,
        auth::user,
        rooms::list_rooms,
        rooms::create_room,
        rooms::room,
        rooms::invite,
        rooms::select_media,
        rooms::start_playback,
        rooms::stop_playback,
        rooms::reset_playback,
        rooms::access_token,
        rooms::messages,
        rooms::redeem_invitation,
        gateway::gateway,
        media::create_media,
        media::media,
        scheduler::check_due_rooms,
        scheduler::cleanup_stale,
    ),
    components(schemas(
        schemas::LoginSchema,
        schemas::RegisterSchema,
        schemas::NewRoomSchema,
        schemas::InviteSchema,
        schemas::SelectMediaSchema,
        schemas::NewMediaSchema,
        schemas::RedeemSchema,
        serialized::User,
        serialized::LoginResult,
        serialized::Room,
        serialized::Playback,
        serialized::Media,
        serialized::Invitation,
        serialized::ChatMessage,
        serialized::AccessToken,
        serialized::ScanResult,
    )),
    modifiers(&Security),
    info(
        description = "marquee-server exposes endpoints to schedule watch parties and join their rooms"
    )
)]
pub struct ApiDoc;

struct Security;

impl Modify for Security {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.borrow_mut() {
            let scheme = HttpBuilder::new()
                .scheme(HttpAuthScheme::Bearer)
                .bearer_format("Bearer <token>")
                .build();

            components.add_security_scheme("BearerAuth", SecurityScheme::Http(scheme))
        }
    }
}

pub async fn docs() -> impl IntoResponse {
    Json(ApiDoc::openapi())
}
