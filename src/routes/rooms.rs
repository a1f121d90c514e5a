use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
};
use axum_valid::Valid;
use uuid::Uuid;

use crate::{
    dto::room::{CreateRoomRequest, RoomSnapshot, StandingsResponse},
    error::AppError,
    services::room_service,
    state::SharedState,
};

/// Routes handling the room lifecycle.
pub fn router() -> Router<SharedState> {
    Router::new()
        .route("/rooms", post(create_room))
        .route("/rooms/{id}", get(get_room))
        .route("/rooms/{id}/standings", get(get_standings))
}

/// Open a new battle room in the lobby with the host seated.
#[utoipa::path(
    post,
    path = "/rooms",
    tag = "rooms",
    request_body = CreateRoomRequest,
    responses(
        (status = 201, description = "Room created", body = RoomSnapshot),
        (status = 400, description = "Invalid room configuration"),
        (status = 404, description = "Unknown question set")
    )
)]
pub async fn create_room(
    State(state): State<SharedState>,
    Valid(Json(payload)): Valid<Json<CreateRoomRequest>>,
) -> Result<(StatusCode, Json<RoomSnapshot>), AppError> {
    let snapshot = room_service::create_room(&state, payload).await?;
    Ok((StatusCode::CREATED, Json(snapshot)))
}

/// Snapshot of a room; the answer of an open question is never included.
#[utoipa::path(
    get,
    path = "/rooms/{id}",
    tag = "rooms",
    params(("id" = Uuid, Path, description = "Room identifier")),
    responses(
        (status = 200, description = "Room snapshot", body = RoomSnapshot),
        (status = 404, description = "Room not found")
    )
)]
pub async fn get_room(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
) -> Result<Json<RoomSnapshot>, AppError> {
    let snapshot = room_service::snapshot(&state, id).await?;
    Ok(Json(snapshot))
}

/// Final standings of a completed room.
#[utoipa::path(
    get,
    path = "/rooms/{id}/standings",
    tag = "rooms",
    params(("id" = Uuid, Path, description = "Room identifier")),
    responses(
        (status = 200, description = "Final standings", body = StandingsResponse),
        (status = 404, description = "Room not found"),
        (status = 409, description = "Battle not complete")
    )
)]
pub async fn get_standings(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
) -> Result<Json<StandingsResponse>, AppError> {
    let standings = room_service::standings(&state, id).await?;
    Ok(Json(standings))
}
