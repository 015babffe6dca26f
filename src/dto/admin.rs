//! Payloads of the admin overview endpoint.

use serde::Serialize;
use utoipa::ToSchema;

use crate::store::models::{RoomState, Ticket};

/// Point-in-time snapshot of the matchmaking state, bucketed by status.
#[derive(Debug, Default, Serialize, ToSchema)]
pub struct AdminOverviewResponse {
    pub open_tickets: Vec<Ticket>,
    pub opened_rooms: Vec<RoomState>,
    pub actived_rooms: Vec<RoomState>,
    pub fulfilled_rooms: Vec<RoomState>,
    pub dead_rooms: Vec<RoomState>,
}
