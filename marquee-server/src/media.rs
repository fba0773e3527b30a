use axum::{
    extract::{Path, State},
    routing::{get, post},
    Json,
};
use marquee_collab::{Database, NewMedia};

use crate::{
    auth::Session,
    context::ServerContext,
    errors::ServerResult,
    schemas::{NewMediaSchema, ValidatedJson},
    serialized::{Media, ToSerialized},
    Router,
};

#[utoipa::path(
    post,
    path = "/v1/media",
    tag = "media",
    request_body = NewMediaSchema,
    security(
        ("BearerAuth" = [])
    ),
    responses(
        (status = 200, description = "Media was registered and awaits conversion", body = Media)
    )
)]
async fn create_media(
    session: Session,
    State(context): State<ServerContext>,
    ValidatedJson(body): ValidatedJson<NewMediaSchema>,
) -> ServerResult<Json<Media>> {
    let media = context
        .collab
        .database
        .create_media(NewMedia {
            title: body.title,
            file_path: body.file_path,
            uploaded_by: Some(session.identity().user_id),
        })
        .await?;

    Ok(Json(media.to_serialized()))
}

#[utoipa::path(
    get,
    path = "/v1/media/{id}",
    tag = "media",
    security(
        ("BearerAuth" = [])
    ),
    responses(
        (status = 200, body = Media)
    )
)]
async fn media(
    _session: Session,
    State(context): State<ServerContext>,
    Path(media_id): Path<i32>,
) -> ServerResult<Json<Media>> {
    let media = context.collab.database.media_by_id(media_id).await?;

    Ok(Json(media.to_serialized()))
}

pub fn router() -> Router {
    Router::new()
        .route("/", post(create_media))
        .route("/:id", get(media))
}
