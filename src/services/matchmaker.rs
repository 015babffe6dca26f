//! Ticket lifecycle and FIFO pairing. `try_match` pops the two oldest
//! tickets, binds them to a fresh room, and hands the room to an allocation
//! watcher; the caller gets the OPENED room back immediately.

use tracing::{info, warn};
use uuid::Uuid;

use crate::services::allocation;
use crate::state::SharedState;
use crate::store::models::{RoomState, Ticket};
use crate::store::{StateStore, StoreResult};

/// Enqueue a join request for `player_id`.
pub async fn submit_join_ticket(state: &SharedState, player_id: &str) -> StoreResult<Ticket> {
    let ticket = state.store().create_ticket(player_id.to_string()).await?;
    info!(ticket_id = %ticket.ticket_id, player_id = %ticket.player_id, "ticket opened");
    Ok(ticket)
}

pub async fn get_ticket(state: &SharedState, ticket_id: &str) -> StoreResult<Option<Ticket>> {
    state.store().get_ticket(ticket_id.to_string()).await
}

/// Cancel an OPENED ticket.
pub async fn cancel_ticket(state: &SharedState, ticket_id: &str) -> StoreResult<()> {
    state.store().cancel_ticket(ticket_id.to_string()).await?;
    info!(%ticket_id, "ticket canceled");
    Ok(())
}

/// Pair the two oldest tickets into a room. Returns `None` when the queue
/// holds fewer than two live tickets.
pub async fn try_match(state: &SharedState) -> StoreResult<Option<RoomState>> {
    let store = state.store();
    let Some((first, second)) = store.try_match_pair().await? else {
        return Ok(None);
    };

    // Guarded even though the pending-players set should make it impossible.
    if first.player_id == second.player_id {
        warn!(player_id = %first.player_id, "popped two tickets of the same player; requeueing");
        store
            .requeue_opened(vec![first.ticket_id, second.ticket_id])
            .await?;
        return Ok(None);
    }

    let room_id = Uuid::new_v4().to_string();
    store
        .mark_matched(first.ticket_id.clone(), room_id.clone())
        .await?;
    store
        .mark_matched(second.ticket_id.clone(), room_id.clone())
        .await?;

    let room = RoomState::opened(room_id, vec![first.player_id, second.player_id]);
    store.save_room_state(room.clone()).await?;
    info!(
        room_id = %room.room_id,
        players = ?room.players,
        "matched pair into room"
    );

    allocation::spawn(state.clone(), room.clone());
    Ok(Some(room))
}
