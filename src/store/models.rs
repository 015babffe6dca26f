//! Ticket and room records persisted in the state store, together with the
//! room status machine every writer must go through.

use std::collections::HashMap;
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;
use uuid::Uuid;

/// Room failure reason written when allocation never reached `running`.
pub const FAIL_ALLOC_TIMEOUT: &str = "alloc_timeout";
/// Room failure reason written when a running server disappeared.
pub const FAIL_SERVER_CRASH: &str = "server_crash";
/// Room failure reason written when a matched player already owns a live room.
pub const FAIL_DUPLICATE_PLAYER: &str = "duplicate_player_active";

/// Current wall-clock time as unix seconds, the timestamp unit used on the wire.
pub fn epoch_secs() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs() as i64)
        .unwrap_or_default()
}

/// Lifecycle of a join ticket.
///
/// Expiry is purely record-TTL driven, so there is no expired variant: an
/// expired ticket simply reads as not found.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "UPPERCASE")]
pub enum TicketStatus {
    /// Waiting in the FIFO queue for a partner.
    Opened,
    /// Paired into a room; `room_id` is set.
    Matched,
    /// Explicitly canceled by the player.
    Canceled,
    /// Refused at submission time (duplicate player).
    Rejected,
}

/// A player's outstanding join request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Ticket {
    pub ticket_id: String,
    pub player_id: String,
    pub status: TicketStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub room_id: Option<String>,
    #[serde(rename = "enqueue_at_unix")]
    pub enqueue_at: i64,
}

impl Ticket {
    /// Fresh OPENED ticket for `player_id` with a generated id.
    pub fn opened(player_id: String) -> Self {
        Self {
            ticket_id: Uuid::new_v4().to_string(),
            player_id,
            status: TicketStatus::Opened,
            room_id: None,
            enqueue_at: epoch_secs(),
        }
    }
}

/// Lifecycle of a room. FULFILLED and DEAD are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "UPPERCASE")]
pub enum RoomStatus {
    /// Matched, waiting for the scheduler to place the server.
    Opened,
    /// Server addressable and ready for heartbeats.
    Actived,
    /// Closed gracefully through the shutdown callback.
    Fulfilled,
    /// Closed by any failure path.
    Dead,
}

impl RoomStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, RoomStatus::Fulfilled | RoomStatus::Dead)
    }

    /// Whether `self -> next` is an allowed edge of the status graph.
    pub fn can_transition(self, next: RoomStatus) -> bool {
        matches!(
            (self, next),
            (RoomStatus::Opened, RoomStatus::Actived)
                | (RoomStatus::Opened, RoomStatus::Dead)
                | (RoomStatus::Actived, RoomStatus::Fulfilled)
                | (RoomStatus::Actived, RoomStatus::Dead)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RoomStatus::Opened => "OPENED",
            RoomStatus::Actived => "ACTIVED",
            RoomStatus::Fulfilled => "FULFILLED",
            RoomStatus::Dead => "DEAD",
        }
    }
}

impl fmt::Display for RoomStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when a writer attempts a status edge outside the graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("invalid room transition: {from} -> {to}")]
pub struct InvalidTransition {
    pub from: RoomStatus,
    pub to: RoomStatus,
}

/// A matched pair of players plus the lifecycle of their dedicated server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct RoomState {
    pub room_id: String,
    pub status: RoomStatus,
    pub players: Vec<String>,
    #[serde(rename = "created_at_unix")]
    pub created_at: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allocation_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_ip: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fail_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub winner: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scores: Option<HashMap<String, i64>>,
    #[serde(
        rename = "fulfilled_at_unix",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub fulfilled_at: Option<i64>,
    #[serde(
        rename = "dead_at_unix",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub dead_at: Option<i64>,
    #[serde(
        rename = "graceful_at_unix",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub graceful_at: Option<i64>,
}

impl RoomState {
    /// Fresh OPENED room for a matched pair, players in match order.
    pub fn opened(room_id: String, players: Vec<String>) -> Self {
        Self {
            room_id,
            status: RoomStatus::Opened,
            players,
            created_at: epoch_secs(),
            allocation_id: None,
            server_ip: None,
            port: None,
            fail_reason: None,
            end_reason: None,
            winner: None,
            scores: None,
            fulfilled_at: None,
            dead_at: None,
            graceful_at: None,
        }
    }

    /// Move to `to`, rejecting edges outside the status graph.
    pub fn transition(&mut self, to: RoomStatus) -> Result<(), InvalidTransition> {
        if !self.status.can_transition(to) {
            return Err(InvalidTransition {
                from: self.status,
                to,
            });
        }
        self.status = to;
        Ok(())
    }

    /// OPENED -> ACTIVED once the server is addressable.
    pub fn mark_actived(
        &mut self,
        allocation_id: String,
        server_ip: String,
        port: u16,
    ) -> Result<(), InvalidTransition> {
        self.transition(RoomStatus::Actived)?;
        self.allocation_id = Some(allocation_id);
        self.server_ip = Some(server_ip);
        self.port = Some(port);
        Ok(())
    }

    /// Any failure path: record the reason and the time of death.
    pub fn mark_dead(&mut self, fail_reason: &str) -> Result<(), InvalidTransition> {
        self.transition(RoomStatus::Dead)?;
        self.fail_reason = Some(fail_reason.to_string());
        self.dead_at = Some(epoch_secs());
        Ok(())
    }

    /// ACTIVED -> FULFILLED on a graceful shutdown callback.
    pub fn mark_fulfilled(&mut self, end_reason: &str, at: i64) -> Result<(), InvalidTransition> {
        self.transition(RoomStatus::Fulfilled)?;
        self.end_reason = Some(end_reason.to_string());
        self.fulfilled_at = Some(at);
        self.graceful_at = Some(at);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn room() -> RoomState {
        RoomState::opened("r1".into(), vec!["p1".into(), "p2".into()])
    }

    #[test]
    fn opened_room_reaches_actived_then_fulfilled() {
        let mut state = room();
        state
            .mark_actived("alloc-1".into(), "203.0.113.10".into(), 31000)
            .unwrap();
        assert_eq!(state.status, RoomStatus::Actived);
        assert_eq!(state.server_ip.as_deref(), Some("203.0.113.10"));
        assert_eq!(state.port, Some(31000));

        state.mark_fulfilled("no_clients", 1_700_000_000).unwrap();
        assert_eq!(state.status, RoomStatus::Fulfilled);
        assert_eq!(state.end_reason.as_deref(), Some("no_clients"));
        assert_eq!(state.fulfilled_at, Some(1_700_000_000));
        assert_eq!(state.graceful_at, Some(1_700_000_000));
    }

    #[test]
    fn opened_room_can_die() {
        let mut state = room();
        state.mark_dead(FAIL_ALLOC_TIMEOUT).unwrap();
        assert_eq!(state.status, RoomStatus::Dead);
        assert_eq!(state.fail_reason.as_deref(), Some(FAIL_ALLOC_TIMEOUT));
        assert!(state.dead_at.is_some());
    }

    #[test]
    fn terminal_states_reject_every_edge() {
        for terminal in [RoomStatus::Fulfilled, RoomStatus::Dead] {
            for next in [
                RoomStatus::Opened,
                RoomStatus::Actived,
                RoomStatus::Fulfilled,
                RoomStatus::Dead,
            ] {
                assert!(!terminal.can_transition(next), "{terminal} -> {next}");
            }
        }
    }

    #[test]
    fn opened_cannot_fulfill_directly() {
        let mut state = room();
        let err = state.mark_fulfilled("no_clients", 0).unwrap_err();
        assert_eq!(err.from, RoomStatus::Opened);
        assert_eq!(err.to, RoomStatus::Fulfilled);
        assert_eq!(state.status, RoomStatus::Opened);
        assert!(state.end_reason.is_none());
    }

    #[test]
    fn records_serialize_with_wire_names() {
        let mut state = room();
        state.created_at = 42;
        let value = serde_json::to_value(&state).unwrap();
        assert_eq!(value["status"], "OPENED");
        assert_eq!(value["created_at_unix"], 42);
        assert!(value.get("fail_reason").is_none());

        let ticket = Ticket {
            ticket_id: "t1".into(),
            player_id: "p1".into(),
            status: TicketStatus::Matched,
            room_id: Some("r1".into()),
            enqueue_at: 7,
        };
        let value = serde_json::to_value(&ticket).unwrap();
        assert_eq!(value["status"], "MATCHED");
        assert_eq!(value["enqueue_at_unix"], 7);
        assert_eq!(value["room_id"], "r1");
    }
}
