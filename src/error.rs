use axum::{http::StatusCode, response::IntoResponse, Json};
use serde::Serialize;
use thiserror::Error;

use crate::orchestrator::OrchestratorError;
use crate::store::StoreError;

/// Closed set of agent-facing error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    MissingPlayerId,
    MissingRoomId,
    InvalidRequest,
    TicketNotFound,
    RoomNotFound,
    RoomNotReady,
    TicketRejected,
    TicketCancelFailed,
    Unauthorized,
    InternalError,
    RedisError,
    NomadError,
    GatewayError,
    NoRunningAllocation,
    AllocationTimeout,
}

impl ErrorCode {
    fn status(self) -> StatusCode {
        match self {
            ErrorCode::MissingPlayerId
            | ErrorCode::MissingRoomId
            | ErrorCode::InvalidRequest
            | ErrorCode::TicketRejected
            | ErrorCode::TicketCancelFailed => StatusCode::BAD_REQUEST,
            ErrorCode::Unauthorized => StatusCode::UNAUTHORIZED,
            ErrorCode::TicketNotFound
            | ErrorCode::RoomNotFound
            | ErrorCode::RoomNotReady
            | ErrorCode::NoRunningAllocation => StatusCode::NOT_FOUND,
            ErrorCode::InternalError
            | ErrorCode::RedisError
            | ErrorCode::NomadError
            | ErrorCode::AllocationTimeout => StatusCode::INTERNAL_SERVER_ERROR,
            ErrorCode::GatewayError => StatusCode::BAD_GATEWAY,
        }
    }
}

/// Error surfaced by a route handler, rendered as `{error_code, error}`.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct AgentError {
    pub code: ErrorCode,
    pub message: String,
}

impl AgentError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidRequest, message)
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Unauthorized, message)
    }
}

impl From<StoreError> for AgentError {
    fn from(err: StoreError) -> Self {
        match &err {
            StoreError::DuplicateTicket { .. } => {
                AgentError::new(ErrorCode::TicketRejected, err.to_string())
            }
            StoreError::TicketNotFound { .. } => {
                AgentError::new(ErrorCode::TicketNotFound, err.to_string())
            }
            StoreError::NotCancellable { .. } => {
                AgentError::new(ErrorCode::TicketCancelFailed, err.to_string())
            }
            StoreError::Backend { .. } | StoreError::Codec { .. } => {
                AgentError::new(ErrorCode::RedisError, err.to_string())
            }
        }
    }
}

impl From<OrchestratorError> for AgentError {
    fn from(err: OrchestratorError) -> Self {
        AgentError::new(ErrorCode::NomadError, err.to_string())
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error_code: ErrorCode,
    error: String,
}

impl IntoResponse for AgentError {
    fn into_response(self) -> axum::response::Response {
        let status = self.code.status();
        let payload = Json(ErrorBody {
            error_code: self.code,
            error: self.message,
        });
        (status, payload).into_response()
    }
}
