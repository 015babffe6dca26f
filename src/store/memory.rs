//! In-process backend for the state store, used by tests and local
//! development. Mirrors the Redis backend's observable semantics: queue and
//! index entries outlive their records, records expire lazily, and every
//! multi-key mutation is atomic under one lock.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, PoisonError};

use futures::future::BoxFuture;
use tokio::time::Instant;

use super::models::{RoomState, Ticket, TicketStatus};
use super::{StateStore, StoreError, StoreResult, StoreTuning};

struct Expiring<T> {
    value: T,
    expires_at: Option<Instant>,
}

impl<T> Expiring<T> {
    fn live(&self, now: Instant) -> bool {
        self.expires_at.is_none_or(|at| at > now)
    }
}

#[derive(Default)]
struct Inner {
    tickets: HashMap<String, Expiring<Ticket>>,
    opened_queue: VecDeque<String>,
    pending_players: HashMap<String, Option<Instant>>,
    rooms: HashMap<String, Expiring<RoomState>>,
    rooms_index: HashSet<String>,
}

impl Inner {
    /// Drop expired records. Queue and index entries are kept so that
    /// membership outlives the record, as it does in Redis.
    fn sweep(&mut self, now: Instant) {
        self.tickets.retain(|_, record| record.live(now));
        self.rooms.retain(|_, record| record.live(now));
        self.pending_players
            .retain(|_, expiry| expiry.is_none_or(|at| at > now));
    }
}

/// State store held entirely in process memory.
#[derive(Clone)]
pub struct MemoryStateStore {
    inner: Arc<Mutex<Inner>>,
    tuning: StoreTuning,
}

impl MemoryStateStore {
    pub fn new(tuning: StoreTuning) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner::default())),
            tuning,
        }
    }

    fn locked<R>(&self, op: impl FnOnce(&mut Inner) -> R) -> R {
        let mut guard = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        op(&mut guard)
    }
}

impl Default for MemoryStateStore {
    fn default() -> Self {
        Self::new(StoreTuning::default())
    }
}

impl StateStore for MemoryStateStore {
    fn create_ticket(&self, player_id: String) -> BoxFuture<'static, StoreResult<Ticket>> {
        let store = self.clone();
        Box::pin(async move {
            let now = Instant::now();
            let ttl = store.tuning.ticket_ttl;
            store.locked(move |inner| {
                inner.sweep(now);
                if inner.pending_players.contains_key(&player_id) {
                    return Err(StoreError::DuplicateTicket { player_id });
                }
                let ticket = Ticket::opened(player_id);
                inner
                    .pending_players
                    .insert(ticket.player_id.clone(), Some(now + ttl));
                inner.opened_queue.push_back(ticket.ticket_id.clone());
                inner.tickets.insert(
                    ticket.ticket_id.clone(),
                    Expiring {
                        value: ticket.clone(),
                        expires_at: Some(now + ttl),
                    },
                );
                Ok(ticket)
            })
        })
    }

    fn get_ticket(&self, ticket_id: String) -> BoxFuture<'static, StoreResult<Option<Ticket>>> {
        let store = self.clone();
        Box::pin(async move {
            let now = Instant::now();
            store.locked(|inner| {
                Ok(inner
                    .tickets
                    .get(&ticket_id)
                    .filter(|record| record.live(now))
                    .map(|record| record.value.clone()))
            })
        })
    }

    fn cancel_ticket(&self, ticket_id: String) -> BoxFuture<'static, StoreResult<()>> {
        let store = self.clone();
        Box::pin(async move {
            let now = Instant::now();
            store.locked(move |inner| {
                inner.sweep(now);
                let status = match inner.tickets.get(&ticket_id) {
                    Some(record) => record.value.status,
                    None => return Err(StoreError::TicketNotFound { ticket_id }),
                };
                if status != TicketStatus::Opened {
                    return Err(StoreError::NotCancellable { ticket_id, status });
                }
                if let Some(record) = inner.tickets.remove(&ticket_id) {
                    inner.opened_queue.retain(|id| *id != ticket_id);
                    inner.pending_players.remove(&record.value.player_id);
                }
                Ok(())
            })
        })
    }

    fn try_match_pair(&self) -> BoxFuture<'static, StoreResult<Option<(Ticket, Ticket)>>> {
        let store = self.clone();
        Box::pin(async move {
            let now = Instant::now();
            store.locked(|inner| {
                let Some(first_id) = inner.opened_queue.pop_front() else {
                    return Ok(None);
                };
                let Some(second_id) = inner.opened_queue.pop_front() else {
                    inner.opened_queue.push_front(first_id);
                    return Ok(None);
                };
                let first = inner
                    .tickets
                    .get(&first_id)
                    .filter(|record| record.live(now))
                    .map(|record| record.value.clone());
                let second = inner
                    .tickets
                    .get(&second_id)
                    .filter(|record| record.live(now))
                    .map(|record| record.value.clone());
                // Expired records are dropped without re-queueing the survivor.
                match (first, second) {
                    (Some(first), Some(second)) => Ok(Some((first, second))),
                    _ => Ok(None),
                }
            })
        })
    }

    fn requeue_opened(&self, ticket_ids: Vec<String>) -> BoxFuture<'static, StoreResult<()>> {
        let store = self.clone();
        Box::pin(async move {
            store.locked(|inner| {
                for ticket_id in ticket_ids.into_iter().rev() {
                    inner.opened_queue.push_front(ticket_id);
                }
                Ok(())
            })
        })
    }

    fn mark_matched(
        &self,
        ticket_id: String,
        room_id: String,
    ) -> BoxFuture<'static, StoreResult<()>> {
        let store = self.clone();
        Box::pin(async move {
            let now = Instant::now();
            let ttl = store.tuning.ticket_ttl;
            store.locked(move |inner| {
                let Some(record) = inner
                    .tickets
                    .get_mut(&ticket_id)
                    .filter(|record| record.live(now))
                else {
                    return Err(StoreError::TicketNotFound { ticket_id });
                };
                record.value.status = TicketStatus::Matched;
                record.value.room_id = Some(room_id);
                record.expires_at = Some(now + ttl);
                let player_id = record.value.player_id.clone();
                inner.pending_players.remove(&player_id);
                Ok(())
            })
        })
    }

    fn save_room_state(&self, room: RoomState) -> BoxFuture<'static, StoreResult<()>> {
        let store = self.clone();
        Box::pin(async move {
            let now = Instant::now();
            let expires_at = store.tuning.room_ttl(room.status).map(|ttl| now + ttl);
            store.locked(move |inner| {
                inner.rooms_index.insert(room.room_id.clone());
                inner.rooms.insert(
                    room.room_id.clone(),
                    Expiring {
                        value: room,
                        expires_at,
                    },
                );
                Ok(())
            })
        })
    }

    fn get_room_state(
        &self,
        room_id: String,
    ) -> BoxFuture<'static, StoreResult<Option<RoomState>>> {
        let store = self.clone();
        Box::pin(async move {
            let now = Instant::now();
            store.locked(|inner| {
                Ok(inner
                    .rooms
                    .get(&room_id)
                    .filter(|record| record.live(now))
                    .map(|record| record.value.clone()))
            })
        })
    }

    fn delete_room_state(&self, room_id: String) -> BoxFuture<'static, StoreResult<()>> {
        let store = self.clone();
        Box::pin(async move {
            store.locked(|inner| {
                inner.rooms.remove(&room_id);
                inner.rooms_index.remove(&room_id);
                Ok(())
            })
        })
    }

    fn list_rooms(&self) -> BoxFuture<'static, StoreResult<Vec<String>>> {
        let store = self.clone();
        Box::pin(async move {
            store.locked(|inner| Ok(inner.rooms_index.iter().cloned().collect()))
        })
    }

    fn list_opened_tickets(&self) -> BoxFuture<'static, StoreResult<Vec<Ticket>>> {
        let store = self.clone();
        Box::pin(async move {
            let now = Instant::now();
            store.locked(|inner| {
                Ok(inner
                    .opened_queue
                    .iter()
                    .filter_map(|id| inner.tickets.get(id))
                    .filter(|record| {
                        record.live(now) && record.value.status == TicketStatus::Opened
                    })
                    .map(|record| record.value.clone())
                    .collect())
            })
        })
    }

    fn ping(&self) -> BoxFuture<'static, StoreResult<()>> {
        Box::pin(async { Ok(()) })
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::time::advance;

    use super::*;
    use crate::store::models::{RoomStatus, FAIL_ALLOC_TIMEOUT};

    fn tuning() -> StoreTuning {
        StoreTuning {
            ticket_ttl: Duration::from_secs(120),
            allocation_timeout: Duration::from_secs(90),
            terminal_ttl: Duration::from_secs(60),
            ping_timeout: Duration::from_secs(2),
        }
    }

    fn store() -> MemoryStateStore {
        MemoryStateStore::new(tuning())
    }

    #[tokio::test]
    async fn create_then_get_roundtrip() {
        let store = store();
        let ticket = store.create_ticket("p1".into()).await.unwrap();
        assert_eq!(ticket.status, TicketStatus::Opened);
        assert_eq!(ticket.player_id, "p1");

        let fetched = store.get_ticket(ticket.ticket_id.clone()).await.unwrap();
        assert_eq!(fetched, Some(ticket));
    }

    #[tokio::test]
    async fn duplicate_player_is_rejected() {
        let store = store();
        store.create_ticket("p1".into()).await.unwrap();
        let err = store.create_ticket("p1".into()).await.unwrap_err();
        assert!(matches!(err, StoreError::DuplicateTicket { player_id } if player_id == "p1"));
    }

    #[tokio::test]
    async fn cancel_removes_ticket_and_frees_player() {
        let store = store();
        let ticket = store.create_ticket("p1".into()).await.unwrap();
        store.cancel_ticket(ticket.ticket_id.clone()).await.unwrap();

        assert_eq!(store.get_ticket(ticket.ticket_id).await.unwrap(), None);
        assert!(store.list_opened_tickets().await.unwrap().is_empty());
        // The pending slot is released, so the player may queue again.
        store.create_ticket("p1".into()).await.unwrap();
    }

    #[tokio::test]
    async fn cancel_rejects_non_opened_ticket() {
        let store = store();
        let ticket = store.create_ticket("p1".into()).await.unwrap();
        store
            .mark_matched(ticket.ticket_id.clone(), "r1".into())
            .await
            .unwrap();

        let err = store.cancel_ticket(ticket.ticket_id).await.unwrap_err();
        assert!(matches!(
            err,
            StoreError::NotCancellable {
                status: TicketStatus::Matched,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn lone_ticket_stays_at_the_head() {
        let store = store();
        let ticket = store.create_ticket("p1".into()).await.unwrap();

        assert!(store.try_match_pair().await.unwrap().is_none());

        let opened = store.list_opened_tickets().await.unwrap();
        assert_eq!(opened.len(), 1);
        assert_eq!(opened[0].ticket_id, ticket.ticket_id);
    }

    #[tokio::test]
    async fn pair_pops_two_oldest_in_order() {
        let store = store();
        let first = store.create_ticket("p1".into()).await.unwrap();
        let second = store.create_ticket("p2".into()).await.unwrap();
        let third = store.create_ticket("p3".into()).await.unwrap();

        let (left, right) = store.try_match_pair().await.unwrap().unwrap();
        assert_eq!(left.ticket_id, first.ticket_id);
        assert_eq!(right.ticket_id, second.ticket_id);

        let remaining = store.list_opened_tickets().await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].ticket_id, third.ticket_id);
    }

    #[tokio::test]
    async fn requeue_restores_head_order() {
        let store = store();
        let first = store.create_ticket("p1".into()).await.unwrap();
        let second = store.create_ticket("p2".into()).await.unwrap();
        store.try_match_pair().await.unwrap().unwrap();

        store
            .requeue_opened(vec![first.ticket_id.clone(), second.ticket_id.clone()])
            .await
            .unwrap();

        let opened = store.list_opened_tickets().await.unwrap();
        let ids: Vec<_> = opened.iter().map(|t| t.ticket_id.as_str()).collect();
        assert_eq!(ids, vec![first.ticket_id.as_str(), second.ticket_id.as_str()]);
    }

    #[tokio::test]
    async fn mark_matched_updates_record_and_frees_player() {
        let store = store();
        let ticket = store.create_ticket("p1".into()).await.unwrap();
        store
            .mark_matched(ticket.ticket_id.clone(), "r1".into())
            .await
            .unwrap();

        let matched = store
            .get_ticket(ticket.ticket_id.clone())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(matched.status, TicketStatus::Matched);
        assert_eq!(matched.room_id.as_deref(), Some("r1"));

        // Player may queue again while the previous ticket is MATCHED.
        store.create_ticket("p1".into()).await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn expired_ticket_reads_not_found_and_frees_slot() {
        let store = store();
        let ticket = store.create_ticket("p1".into()).await.unwrap();

        advance(tuning().ticket_ttl + Duration::from_secs(1)).await;

        assert_eq!(store.get_ticket(ticket.ticket_id).await.unwrap(), None);
        store.create_ticket("p1".into()).await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn expired_records_break_the_pair_without_requeue() {
        let store = store();
        store.create_ticket("p1".into()).await.unwrap();
        store.create_ticket("p2".into()).await.unwrap();

        advance(tuning().ticket_ttl + Duration::from_secs(1)).await;

        assert!(store.try_match_pair().await.unwrap().is_none());
        // Both ids were consumed from the queue.
        assert!(store.try_match_pair().await.unwrap().is_none());
        assert!(store.list_opened_tickets().await.unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn opened_room_expires_but_index_entry_survives() {
        let store = store();
        let room = RoomState::opened("r1".into(), vec!["p1".into(), "p2".into()]);
        store.save_room_state(room).await.unwrap();

        advance(tuning().allocation_timeout + Duration::from_secs(1)).await;

        assert_eq!(store.get_room_state("r1".into()).await.unwrap(), None);
        assert_eq!(store.list_rooms().await.unwrap(), vec!["r1".to_string()]);

        store.delete_room_state("r1".into()).await.unwrap();
        assert!(store.list_rooms().await.unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn actived_room_never_expires() {
        let store = store();
        let mut room = RoomState::opened("r1".into(), vec!["p1".into(), "p2".into()]);
        room.mark_actived("alloc-1".into(), "203.0.113.10".into(), 31000)
            .unwrap();
        store.save_room_state(room).await.unwrap();

        advance(Duration::from_secs(24 * 60 * 60)).await;

        let fetched = store.get_room_state("r1".into()).await.unwrap().unwrap();
        assert_eq!(fetched.status, RoomStatus::Actived);
    }

    #[tokio::test(start_paused = true)]
    async fn terminal_room_expires_after_retention() {
        let store = store();
        let mut room = RoomState::opened("r1".into(), vec!["p1".into(), "p2".into()]);
        room.mark_dead(FAIL_ALLOC_TIMEOUT).unwrap();
        store.save_room_state(room).await.unwrap();

        advance(tuning().terminal_ttl + Duration::from_secs(1)).await;

        assert_eq!(store.get_room_state("r1".into()).await.unwrap(), None);
    }
}
