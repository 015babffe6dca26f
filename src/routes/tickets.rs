use axum::{
    extract::{rejection::JsonRejection, Path, State},
    routing::{get, post},
    Json, Router,
};
use tracing::warn;

use crate::{
    dto::ticket::{
        CancelTicketResponse, SubmitTicketRequest, SubmitTicketResponse, TicketStatusResponse,
    },
    error::{AgentError, ErrorCode},
    services::matchmaker,
    state::SharedState,
    store::StoreError,
};

/// Routes handling the join-ticket lifecycle.
pub fn router() -> Router<SharedState> {
    Router::new()
        .route("/tickets", post(submit_ticket))
        .route("/tickets/{id}", get(ticket_status))
        .route("/tickets/{id}/cancel", post(cancel_ticket))
}

#[utoipa::path(
    post,
    path = "/tickets",
    tag = "tickets",
    request_body = SubmitTicketRequest,
    responses(
        (status = 200, description = "Ticket opened, or REJECTED for a duplicate player", body = SubmitTicketResponse),
        (status = 400, description = "Missing player id")
    )
)]
/// Open a join ticket and kick off a best-effort matching attempt.
pub async fn submit_ticket(
    State(state): State<SharedState>,
    payload: Result<Json<SubmitTicketRequest>, JsonRejection>,
) -> Result<Json<SubmitTicketResponse>, AgentError> {
    let Ok(Json(request)) = payload else {
        return Err(AgentError::new(
            ErrorCode::MissingPlayerId,
            "player_id required",
        ));
    };
    let Some(player_id) = request.player_id() else {
        return Err(AgentError::new(
            ErrorCode::MissingPlayerId,
            "player_id required",
        ));
    };

    match matchmaker::submit_join_ticket(&state, player_id).await {
        Ok(ticket) => {
            let matcher_state = state.clone();
            tokio::spawn(async move {
                if let Err(err) = matchmaker::try_match(&matcher_state).await {
                    warn!(error = %err, "background match attempt failed");
                }
            });
            Ok(Json(SubmitTicketResponse::opened(&ticket)))
        }
        Err(StoreError::DuplicateTicket { .. }) => Ok(Json(SubmitTicketResponse::rejected())),
        Err(err) => Err(err.into()),
    }
}

#[utoipa::path(
    get,
    path = "/tickets/{id}",
    tag = "tickets",
    params(("id" = String, Path, description = "Ticket identifier")),
    responses(
        (status = 200, description = "Ticket status", body = TicketStatusResponse),
        (status = 404, description = "Ticket unknown or expired")
    )
)]
/// Current status of a ticket.
pub async fn ticket_status(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<Json<TicketStatusResponse>, AgentError> {
    match matchmaker::get_ticket(&state, &id).await? {
        Some(ticket) => Ok(Json(ticket.into())),
        None => Err(AgentError::new(ErrorCode::TicketNotFound, "ticket not found")),
    }
}

#[utoipa::path(
    post,
    path = "/tickets/{id}/cancel",
    tag = "tickets",
    params(("id" = String, Path, description = "Ticket identifier")),
    responses(
        (status = 200, description = "Ticket canceled", body = CancelTicketResponse),
        (status = 400, description = "Ticket is no longer OPENED"),
        (status = 404, description = "Ticket unknown or expired")
    )
)]
/// Cancel an OPENED ticket.
pub async fn cancel_ticket(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<Json<CancelTicketResponse>, AgentError> {
    matchmaker::cancel_ticket(&state, &id).await?;
    Ok(Json(CancelTicketResponse::canceled()))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::config::AppConfig;
    use crate::orchestrator::stub::StubOrchestrator;
    use crate::state::AppState;
    use crate::store::memory::MemoryStateStore;
    use crate::store::models::TicketStatus;

    fn test_state() -> SharedState {
        let config = AppConfig::from_env();
        let store = MemoryStateStore::new(config.store_tuning());
        AppState::new(
            config,
            Arc::new(store),
            Arc::new(StubOrchestrator::new()),
        )
    }

    fn request(player_id: &str) -> Result<Json<SubmitTicketRequest>, JsonRejection> {
        Ok(Json(SubmitTicketRequest {
            player_id: player_id.into(),
        }))
    }

    #[tokio::test]
    async fn duplicate_submission_answers_rejected() {
        let state = test_state();

        let first = submit_ticket(State(state.clone()), request("p1"))
            .await
            .unwrap();
        assert_eq!(first.status, TicketStatus::Opened);
        assert!(first.ticket_id.is_some());

        let second = submit_ticket(State(state.clone()), request("p1"))
            .await
            .unwrap();
        assert_eq!(second.status, TicketStatus::Rejected);
        assert!(second.ticket_id.is_none());
    }

    #[tokio::test]
    async fn blank_player_id_is_a_validation_error() {
        let state = test_state();
        let err = submit_ticket(State(state), request("  "))
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::MissingPlayerId);
    }

    #[tokio::test]
    async fn unknown_ticket_reads_not_found() {
        let state = test_state();
        let err = ticket_status(State(state), Path("nope".to_string()))
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::TicketNotFound);
    }
}
