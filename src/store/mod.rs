//! State store port: the typed facade over the expiring key-value store that
//! holds tickets and rooms. Two backends implement it — Redis for
//! deployments, an in-process store for tests and local development.

pub mod memory;
pub mod models;
pub mod redis;

use std::error::Error;
use std::time::Duration;

use futures::future::BoxFuture;
use thiserror::Error;

use self::models::{RoomState, RoomStatus, Ticket, TicketStatus};

/// Result alias for state store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Error raised by state store backends.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The player already owns an OPENED ticket.
    #[error("duplicate ticket for player {player_id}")]
    DuplicateTicket { player_id: String },
    /// The ticket record does not exist (never created, or expired).
    #[error("ticket {ticket_id} not found")]
    TicketNotFound { ticket_id: String },
    /// Cancellation requested for a ticket that is no longer OPENED.
    #[error("cannot cancel ticket {ticket_id}: status is {status:?}")]
    NotCancellable {
        ticket_id: String,
        status: TicketStatus,
    },
    /// The underlying store failed.
    #[error("store backend error: {message}")]
    Backend {
        message: String,
        #[source]
        source: Box<dyn Error + Send + Sync>,
    },
    /// A persisted record could not be decoded.
    #[error("corrupt record under {key}")]
    Codec {
        key: String,
        #[source]
        source: serde_json::Error,
    },
}

impl StoreError {
    /// Construct a backend error from any underlying failure.
    pub fn backend(message: impl Into<String>, source: impl Error + Send + Sync + 'static) -> Self {
        StoreError::Backend {
            message: message.into(),
            source: Box::new(source),
        }
    }
}

/// TTL tunables injected into a backend at construction.
#[derive(Debug, Clone, Copy)]
pub struct StoreTuning {
    /// Lifetime of a ticket record.
    pub ticket_ttl: Duration,
    /// Lifetime of an OPENED room record (allocation must land within it).
    pub allocation_timeout: Duration,
    /// Retention of terminal (FULFILLED/DEAD) room records.
    pub terminal_ttl: Duration,
    /// Bound on the health-check round trip.
    pub ping_timeout: Duration,
}

impl StoreTuning {
    /// Record TTL for a room in `status`; ACTIVED rooms never expire.
    pub fn room_ttl(&self, status: RoomStatus) -> Option<Duration> {
        match status {
            RoomStatus::Opened => Some(self.allocation_timeout),
            RoomStatus::Actived => None,
            RoomStatus::Fulfilled | RoomStatus::Dead => Some(self.terminal_ttl),
        }
    }
}

impl Default for StoreTuning {
    fn default() -> Self {
        Self {
            ticket_ttl: Duration::from_secs(120),
            allocation_timeout: Duration::from_secs(90),
            terminal_ttl: Duration::from_secs(60),
            ping_timeout: Duration::from_secs(2),
        }
    }
}

/// Abstraction over the ticket/room state store.
///
/// Multi-key operations are transactional inside each backend; the two
/// documented non-atomic composites (`create_ticket`'s set insertion,
/// `try_match_pair`'s double pop) compensate on partial failure.
pub trait StateStore: Send + Sync {
    /// Atomically claim the player's pending slot and enqueue a fresh
    /// OPENED ticket. Fails with [`StoreError::DuplicateTicket`] when the
    /// player already has one.
    fn create_ticket(&self, player_id: String) -> BoxFuture<'static, StoreResult<Ticket>>;

    fn get_ticket(&self, ticket_id: String) -> BoxFuture<'static, StoreResult<Option<Ticket>>>;

    /// Remove an OPENED ticket from queue, record, and pending set.
    fn cancel_ticket(&self, ticket_id: String) -> BoxFuture<'static, StoreResult<()>>;

    /// Pop the two oldest OPENED tickets. `None` when fewer than two live
    /// tickets are available; a lone queued ticket is pushed back to the
    /// head, while ids whose records expired are dropped.
    fn try_match_pair(&self) -> BoxFuture<'static, StoreResult<Option<(Ticket, Ticket)>>>;

    /// Push ticket ids back to the head of the queue in their given order.
    fn requeue_opened(&self, ticket_ids: Vec<String>) -> BoxFuture<'static, StoreResult<()>>;

    /// Mark a ticket MATCHED into `room_id` and free the player's pending
    /// slot so they may queue again once this room ends.
    fn mark_matched(
        &self,
        ticket_id: String,
        room_id: String,
    ) -> BoxFuture<'static, StoreResult<()>>;

    /// Write a room record (TTL selected by status) and index it.
    fn save_room_state(&self, room: RoomState) -> BoxFuture<'static, StoreResult<()>>;

    fn get_room_state(&self, room_id: String)
        -> BoxFuture<'static, StoreResult<Option<RoomState>>>;

    fn delete_room_state(&self, room_id: String) -> BoxFuture<'static, StoreResult<()>>;

    /// All indexed room ids, including ids whose record already expired.
    fn list_rooms(&self) -> BoxFuture<'static, StoreResult<Vec<String>>>;

    /// Live OPENED tickets in queue order.
    fn list_opened_tickets(&self) -> BoxFuture<'static, StoreResult<Vec<Ticket>>>;

    /// Health check with a short bounded timeout.
    fn ping(&self) -> BoxFuture<'static, StoreResult<()>>;
}
