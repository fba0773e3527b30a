use axum::{extract::State, routing::post, Json};
use chrono::Utc;

use crate::{
    auth::Session,
    context::ServerContext,
    errors::ServerResult,
    serialized::ScanResult,
    Router,
};

#[utoipa::path(
    post,
    path = "/v1/scheduler/due",
    tag = "scheduler",
    security(
        ("BearerAuth" = [])
    ),
    responses(
        (status = 200, description = "Rooms that were due and had a start queued", body = ScanResult)
    )
)]
async fn check_due_rooms(
    _session: Session,
    State(context): State<ServerContext>,
) -> ServerResult<Json<ScanResult>> {
    let queued = context
        .collab
        .coordinator
        .scheduler
        .check_due_rooms(Utc::now())
        .await?;

    Ok(Json(ScanResult { queued }))
}

#[utoipa::path(
    post,
    path = "/v1/scheduler/stale",
    tag = "scheduler",
    security(
        ("BearerAuth" = [])
    ),
    responses(
        (status = 200, description = "Rooms whose stale session had a stop queued", body = ScanResult)
    )
)]
async fn cleanup_stale(
    _session: Session,
    State(context): State<ServerContext>,
) -> ServerResult<Json<ScanResult>> {
    let queued = context
        .collab
        .coordinator
        .scheduler
        .cleanup_stale(Utc::now())
        .await?;

    Ok(Json(ScanResult { queued }))
}

pub fn router() -> Router {
    Router::new()
        .route("/due", post(check_due_rooms))
        .route("/stale", post(cleanup_stale))
}
