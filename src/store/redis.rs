//! Redis backend for the state store.
//!
//! Key layout (stable for operators): `mm:tickets:opened` (LIST of ticket
//! ids), `mm:ticket:<id>` (record, TTL), `mm:players:pending` (SET of player
//! ids), `mm:rooms` (SET of room ids), `mm:room:<id>` (record, TTL by
//! status). Multi-key mutations run as `MULTI`/`EXEC` pipelines.

use futures::future::BoxFuture;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use serde::de::DeserializeOwned;
use serde::Serialize;

use super::models::{RoomState, Ticket, TicketStatus};
use super::{StateStore, StoreError, StoreResult, StoreTuning};

const OPENED_TICKETS_KEY: &str = "mm:tickets:opened";
const TICKET_KEY_PREFIX: &str = "mm:ticket:";
const PENDING_PLAYERS_KEY: &str = "mm:players:pending";
const ROOMS_INDEX_KEY: &str = "mm:rooms";
const ROOM_KEY_PREFIX: &str = "mm:room:";

fn ticket_key(ticket_id: &str) -> String {
    format!("{TICKET_KEY_PREFIX}{ticket_id}")
}

fn room_key(room_id: &str) -> String {
    format!("{ROOM_KEY_PREFIX}{room_id}")
}

fn encode<T: Serialize>(key: &str, value: &T) -> StoreResult<String> {
    serde_json::to_string(value).map_err(|source| StoreError::Codec {
        key: key.to_string(),
        source,
    })
}

fn decode<T: DeserializeOwned>(key: &str, raw: String) -> StoreResult<T> {
    serde_json::from_str(&raw).map_err(|source| StoreError::Codec {
        key: key.to_string(),
        source,
    })
}

/// State store backed by a shared Redis instance.
#[derive(Clone)]
pub struct RedisStateStore {
    conn: ConnectionManager,
    tuning: StoreTuning,
}

impl RedisStateStore {
    /// Connect to Redis at `addr` (`host:port` or a full `redis://` URL).
    pub async fn connect(addr: &str, tuning: StoreTuning) -> StoreResult<Self> {
        let url = if addr.contains("://") {
            addr.to_string()
        } else {
            format!("redis://{addr}")
        };
        let client = redis::Client::open(url)
            .map_err(|source| StoreError::backend("invalid redis url", source))?;
        let conn = ConnectionManager::new(client)
            .await
            .map_err(|source| StoreError::backend("redis connection failed", source))?;
        Ok(Self { conn, tuning })
    }

    async fn read_ticket(
        conn: &mut ConnectionManager,
        ticket_id: &str,
    ) -> StoreResult<Option<Ticket>> {
        let key = ticket_key(ticket_id);
        let raw: Option<String> = conn
            .get(&key)
            .await
            .map_err(|source| StoreError::backend("redis GET failed", source))?;
        raw.map(|raw| decode(&key, raw)).transpose()
    }
}

impl StateStore for RedisStateStore {
    fn create_ticket(&self, player_id: String) -> BoxFuture<'static, StoreResult<Ticket>> {
        let mut store = self.clone();
        Box::pin(async move {
            // SADD with reply is the T1 enforcement point: an existing member
            // means the player already owns an OPENED ticket.
            let added: i64 = store
                .conn
                .sadd(PENDING_PLAYERS_KEY, &player_id)
                .await
                .map_err(|source| StoreError::backend("redis SADD failed", source))?;
            if added == 0 {
                return Err(StoreError::DuplicateTicket { player_id });
            }

            let ticket = Ticket::opened(player_id);
            let key = ticket_key(&ticket.ticket_id);
            let payload = encode(&key, &ticket)?;
            let written = redis::pipe()
                .atomic()
                .rpush(OPENED_TICKETS_KEY, &ticket.ticket_id)
                .ignore()
                .set_ex(&key, payload, store.tuning.ticket_ttl.as_secs())
                .ignore()
                .query_async::<()>(&mut store.conn)
                .await;
            if let Err(source) = written {
                // Compensate the set insertion so the player is not locked out.
                let _: Result<i64, _> = store.conn.srem(PENDING_PLAYERS_KEY, &ticket.player_id).await;
                return Err(StoreError::backend("redis ticket write failed", source));
            }
            Ok(ticket)
        })
    }

    fn get_ticket(&self, ticket_id: String) -> BoxFuture<'static, StoreResult<Option<Ticket>>> {
        let mut store = self.clone();
        Box::pin(async move { Self::read_ticket(&mut store.conn, &ticket_id).await })
    }

    fn cancel_ticket(&self, ticket_id: String) -> BoxFuture<'static, StoreResult<()>> {
        let mut store = self.clone();
        Box::pin(async move {
            let Some(ticket) = Self::read_ticket(&mut store.conn, &ticket_id).await? else {
                return Err(StoreError::TicketNotFound { ticket_id });
            };
            if ticket.status != TicketStatus::Opened {
                return Err(StoreError::NotCancellable {
                    ticket_id,
                    status: ticket.status,
                });
            }
            redis::pipe()
                .atomic()
                .lrem(OPENED_TICKETS_KEY, 0, &ticket.ticket_id)
                .ignore()
                .del(ticket_key(&ticket.ticket_id))
                .ignore()
                .srem(PENDING_PLAYERS_KEY, &ticket.player_id)
                .ignore()
                .query_async::<()>(&mut store.conn)
                .await
                .map_err(|source| StoreError::backend("redis ticket cancel failed", source))
        })
    }

    fn try_match_pair(&self) -> BoxFuture<'static, StoreResult<Option<(Ticket, Ticket)>>> {
        let mut store = self.clone();
        Box::pin(async move {
            let first: Option<String> = store
                .conn
                .lpop(OPENED_TICKETS_KEY, None)
                .await
                .map_err(|source| StoreError::backend("redis LPOP failed", source))?;
            let Some(first_id) = first else {
                return Ok(None);
            };
            let second: Option<String> = store
                .conn
                .lpop(OPENED_TICKETS_KEY, None)
                .await
                .map_err(|source| StoreError::backend("redis LPOP failed", source))?;
            let Some(second_id) = second else {
                // Lone ticket: push it back to the head so it stays oldest.
                let _: () = store
                    .conn
                    .lpush(OPENED_TICKETS_KEY, &first_id)
                    .await
                    .map_err(|source| StoreError::backend("redis LPUSH failed", source))?;
                return Ok(None);
            };

            let first = Self::read_ticket(&mut store.conn, &first_id).await?;
            let second = Self::read_ticket(&mut store.conn, &second_id).await?;
            // A missing record expired between queue membership and lookup;
            // the surviving id is intentionally not re-queued.
            match (first, second) {
                (Some(first), Some(second)) => Ok(Some((first, second))),
                _ => Ok(None),
            }
        })
    }

    fn requeue_opened(&self, ticket_ids: Vec<String>) -> BoxFuture<'static, StoreResult<()>> {
        let mut store = self.clone();
        Box::pin(async move {
            // Pushed in reverse so the slice order is restored at the head.
            for ticket_id in ticket_ids.iter().rev() {
                let _: () = store
                    .conn
                    .lpush(OPENED_TICKETS_KEY, ticket_id)
                    .await
                    .map_err(|source| StoreError::backend("redis LPUSH failed", source))?;
            }
            Ok(())
        })
    }

    fn mark_matched(
        &self,
        ticket_id: String,
        room_id: String,
    ) -> BoxFuture<'static, StoreResult<()>> {
        let mut store = self.clone();
        Box::pin(async move {
            let Some(mut ticket) = Self::read_ticket(&mut store.conn, &ticket_id).await? else {
                return Err(StoreError::TicketNotFound { ticket_id });
            };
            ticket.status = TicketStatus::Matched;
            ticket.room_id = Some(room_id);
            let key = ticket_key(&ticket.ticket_id);
            let payload = encode(&key, &ticket)?;
            redis::pipe()
                .atomic()
                .set_ex(&key, payload, store.tuning.ticket_ttl.as_secs())
                .ignore()
                .srem(PENDING_PLAYERS_KEY, &ticket.player_id)
                .ignore()
                .query_async::<()>(&mut store.conn)
                .await
                .map_err(|source| StoreError::backend("redis ticket update failed", source))
        })
    }

    fn save_room_state(&self, room: RoomState) -> BoxFuture<'static, StoreResult<()>> {
        let mut store = self.clone();
        Box::pin(async move {
            let key = room_key(&room.room_id);
            let payload = encode(&key, &room)?;
            let mut pipe = redis::pipe();
            pipe.atomic();
            match store.tuning.room_ttl(room.status) {
                Some(ttl) => {
                    pipe.set_ex(&key, payload, ttl.as_secs()).ignore();
                }
                None => {
                    pipe.set(&key, payload).ignore();
                }
            }
            pipe.sadd(ROOMS_INDEX_KEY, &room.room_id).ignore();
            pipe.query_async::<()>(&mut store.conn)
                .await
                .map_err(|source| StoreError::backend("redis room write failed", source))
        })
    }

    fn get_room_state(
        &self,
        room_id: String,
    ) -> BoxFuture<'static, StoreResult<Option<RoomState>>> {
        let mut store = self.clone();
        Box::pin(async move {
            let key = room_key(&room_id);
            let raw: Option<String> = store
                .conn
                .get(&key)
                .await
                .map_err(|source| StoreError::backend("redis GET failed", source))?;
            raw.map(|raw| decode(&key, raw)).transpose()
        })
    }

    fn delete_room_state(&self, room_id: String) -> BoxFuture<'static, StoreResult<()>> {
        let mut store = self.clone();
        Box::pin(async move {
            redis::pipe()
                .atomic()
                .del(room_key(&room_id))
                .ignore()
                .srem(ROOMS_INDEX_KEY, &room_id)
                .ignore()
                .query_async::<()>(&mut store.conn)
                .await
                .map_err(|source| StoreError::backend("redis room delete failed", source))
        })
    }

    fn list_rooms(&self) -> BoxFuture<'static, StoreResult<Vec<String>>> {
        let mut store = self.clone();
        Box::pin(async move {
            store
                .conn
                .smembers(ROOMS_INDEX_KEY)
                .await
                .map_err(|source| StoreError::backend("redis SMEMBERS failed", source))
        })
    }

    fn list_opened_tickets(&self) -> BoxFuture<'static, StoreResult<Vec<Ticket>>> {
        let mut store = self.clone();
        Box::pin(async move {
            let ids: Vec<String> = store
                .conn
                .lrange(OPENED_TICKETS_KEY, 0, -1)
                .await
                .map_err(|source| StoreError::backend("redis LRANGE failed", source))?;
            let mut tickets = Vec::with_capacity(ids.len());
            for ticket_id in ids {
                if let Some(ticket) = Self::read_ticket(&mut store.conn, &ticket_id).await? {
                    if ticket.status == TicketStatus::Opened {
                        tickets.push(ticket);
                    }
                }
            }
            Ok(tickets)
        })
    }

    fn ping(&self) -> BoxFuture<'static, StoreResult<()>> {
        let mut store = self.clone();
        Box::pin(async move {
            let ping = async {
                redis::cmd("PING")
                    .query_async::<String>(&mut store.conn)
                    .await
            };
            match tokio::time::timeout(store.tuning.ping_timeout, ping).await {
                Ok(Ok(_)) => Ok(()),
                Ok(Err(source)) => Err(StoreError::backend("redis ping failed", source)),
                Err(elapsed) => Err(StoreError::backend("redis ping timed out", elapsed)),
            }
        })
    }
}
