//! Request/response bodies of the ticket routes.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::store::models::{Ticket, TicketStatus};

/// Body of `POST /tickets`.
#[derive(Debug, Deserialize, ToSchema)]
pub struct SubmitTicketRequest {
    #[serde(default)]
    pub player_id: String,
}

impl SubmitTicketRequest {
    /// The trimmed player id, or `None` when the field is blank.
    pub fn player_id(&self) -> Option<&str> {
        let trimmed = self.player_id.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed)
        }
    }
}

/// Reply to `POST /tickets`: the opened ticket, or a bare REJECTED status
/// for duplicate submissions.
#[derive(Debug, Serialize, ToSchema)]
pub struct SubmitTicketResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ticket_id: Option<String>,
    pub status: TicketStatus,
}

impl SubmitTicketResponse {
    pub fn opened(ticket: &Ticket) -> Self {
        Self {
            ticket_id: Some(ticket.ticket_id.clone()),
            status: ticket.status,
        }
    }

    pub fn rejected() -> Self {
        Self {
            ticket_id: None,
            status: TicketStatus::Rejected,
        }
    }
}

/// Reply to `GET /tickets/{id}`.
#[derive(Debug, Serialize, ToSchema)]
pub struct TicketStatusResponse {
    pub status: TicketStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub room_id: Option<String>,
}

impl From<Ticket> for TicketStatusResponse {
    fn from(ticket: Ticket) -> Self {
        Self {
            status: ticket.status,
            room_id: ticket.room_id,
        }
    }
}

/// Reply to `POST /tickets/{id}/cancel`.
#[derive(Debug, Serialize, ToSchema)]
pub struct CancelTicketResponse {
    pub status: TicketStatus,
}

impl CancelTicketResponse {
    pub fn canceled() -> Self {
        Self {
            status: TicketStatus::Canceled,
        }
    }
}
