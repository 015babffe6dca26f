use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::{header, HeaderMap},
    routing::{get, post},
    Json, Router,
};
use tracing::info;

use crate::{
    dto::room::{ShutdownAck, ShutdownRequest},
    error::{AgentError, ErrorCode},
    sdk::ShutdownReason,
    state::SharedState,
    store::models::{epoch_secs, RoomState, RoomStatus},
    store::StateStore,
};

/// Routes exposing room state and the server-side shutdown callback.
pub fn router() -> Router<SharedState> {
    Router::new()
        .route("/rooms/{room_id}", get(room_state))
        .route("/rooms/{room_id}/shutdown", post(shutdown_room))
}

#[utoipa::path(
    get,
    path = "/rooms/{room_id}",
    tag = "rooms",
    params(("room_id" = String, Path, description = "Room identifier")),
    responses(
        (status = 200, description = "Room state", body = RoomState),
        (status = 404, description = "Room unknown or expired")
    )
)]
/// Current state of a room.
pub async fn room_state(
    State(state): State<SharedState>,
    Path(room_id): Path<String>,
) -> Result<Json<RoomState>, AgentError> {
    match state.store().get_room_state(room_id).await? {
        Some(room) => Ok(Json(room)),
        None => Err(AgentError::new(ErrorCode::RoomNotFound, "room not found")),
    }
}

#[utoipa::path(
    post,
    path = "/rooms/{room_id}/shutdown",
    tag = "rooms",
    params(("room_id" = String, Path, description = "Room identifier")),
    request_body = ShutdownRequest,
    responses(
        (status = 200, description = "Room fulfilled", body = ShutdownAck),
        (status = 400, description = "Invalid reason or room not ACTIVED"),
        (status = 401, description = "Missing or invalid bearer token"),
        (status = 404, description = "Room unknown or expired")
    )
)]
/// Shutdown callback from the game server: closes an ACTIVED room as
/// FULFILLED, recording the reason and any end-of-game details.
pub async fn shutdown_room(
    State(state): State<SharedState>,
    Path(room_id): Path<String>,
    headers: HeaderMap,
    payload: Result<Json<ShutdownRequest>, JsonRejection>,
) -> Result<Json<ShutdownAck>, AgentError> {
    authorize_bearer(&headers, &state.config().auth.bearer_token)?;

    let Json(request) = payload
        .map_err(|err| AgentError::invalid_request(format!("invalid shutdown request: {err}")))?;
    let reason: ShutdownReason = request.reason.parse().map_err(|_| {
        AgentError::invalid_request(format!(
            "invalid reason: {}. Valid reasons: no_clients, client_disconnected, afk_timeout, game_cycle_completed, signal_received",
            request.reason
        ))
    })?;

    let Some(mut room) = state.store().get_room_state(room_id.clone()).await? else {
        return Err(AgentError::new(ErrorCode::RoomNotFound, "room not found"));
    };
    if room.status != RoomStatus::Actived {
        return Err(AgentError::invalid_request(format!(
            "room status is {}, not {}",
            room.status,
            RoomStatus::Actived
        )));
    }

    let at = request.at.unwrap_or_else(epoch_secs);
    room.mark_fulfilled(reason.as_str(), at)
        .map_err(|err| AgentError::new(ErrorCode::InternalError, err.to_string()))?;
    if let Some(details) = request.details {
        room.winner = details.winner;
        room.scores = details.scores;
    }
    state.store().save_room_state(room).await?;
    info!(%room_id, %reason, "room fulfilled");

    Ok(Json(ShutdownAck::ok()))
}

/// Require `Authorization: Bearer <token>` to match the process-wide secret.
fn authorize_bearer(headers: &HeaderMap, token: &str) -> Result<(), AgentError> {
    let Some(value) = headers.get(header::AUTHORIZATION) else {
        return Err(AgentError::unauthorized("missing authorization header"));
    };
    let provided = value
        .to_str()
        .map_err(|_| AgentError::unauthorized("invalid authorization header"))?;
    if provided != format!("Bearer {token}") {
        return Err(AgentError::unauthorized("invalid authorization token"));
    }
    Ok(())
}
