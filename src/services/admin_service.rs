//! Read model behind the admin overview: a point-in-time snapshot of open
//! tickets and rooms bucketed by status. Not transactional; consecutive
//! snapshots may observe a room in different buckets.

use crate::dto::admin::AdminOverviewResponse;
use crate::state::SharedState;
use crate::store::models::RoomStatus;
use crate::store::{StateStore, StoreResult};

/// Build the dashboard snapshot.
pub async fn overview(state: &SharedState) -> StoreResult<AdminOverviewResponse> {
    let store = state.store();
    let open_tickets = store.list_opened_tickets().await?;

    let mut snapshot = AdminOverviewResponse {
        open_tickets,
        ..AdminOverviewResponse::default()
    };
    for room_id in store.list_rooms().await? {
        let Some(room) = store.get_room_state(room_id).await? else {
            continue;
        };
        match room.status {
            RoomStatus::Opened => snapshot.opened_rooms.push(room),
            RoomStatus::Actived => snapshot.actived_rooms.push(room),
            RoomStatus::Fulfilled => snapshot.fulfilled_rooms.push(room),
            RoomStatus::Dead => snapshot.dead_rooms.push(room),
        }
    }
    Ok(snapshot)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::config::AppConfig;
    use crate::orchestrator::stub::StubOrchestrator;
    use crate::state::AppState;
    use crate::store::memory::MemoryStateStore;
    use crate::store::models::RoomState;
    use crate::store::StateStore;

    fn test_state() -> SharedState {
        let config = AppConfig::from_env();
        let store = MemoryStateStore::new(config.store_tuning());
        AppState::new(
            config,
            Arc::new(store),
            Arc::new(StubOrchestrator::new()),
        )
    }

    #[tokio::test]
    async fn snapshot_buckets_rooms_by_status() {
        let state = test_state();
        let store = state.store();

        store.create_ticket("p9".into()).await.unwrap();

        let opened = RoomState::opened("r-open".into(), vec!["p1".into(), "p2".into()]);
        store.save_room_state(opened).await.unwrap();

        let mut actived = RoomState::opened("r-live".into(), vec!["p3".into(), "p4".into()]);
        actived
            .mark_actived("alloc-1".into(), "203.0.113.10".into(), 31000)
            .unwrap();
        store.save_room_state(actived).await.unwrap();

        let mut dead = RoomState::opened("r-dead".into(), vec!["p5".into(), "p6".into()]);
        dead.mark_dead("alloc_timeout").unwrap();
        store.save_room_state(dead).await.unwrap();

        let snapshot = overview(&state).await.unwrap();
        assert_eq!(snapshot.open_tickets.len(), 1);
        assert_eq!(snapshot.opened_rooms.len(), 1);
        assert_eq!(snapshot.actived_rooms.len(), 1);
        assert_eq!(snapshot.fulfilled_rooms.len(), 0);
        assert_eq!(snapshot.dead_rooms.len(), 1);
        assert_eq!(snapshot.opened_rooms[0].room_id, "r-open");
    }
}
