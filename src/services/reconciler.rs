//! Background reconciliation between the room table and the orchestrator's
//! actual jobs. Converges in both directions: rooms whose job vanished are
//! declared dead (after a grace window), and running jobs without a live
//! room are stopped.

use std::collections::HashMap;

use tokio::time::sleep;
use tracing::{info, warn};

use crate::orchestrator::{JobOrchestrator, OrchestratorResult};
use crate::state::SharedState;
use crate::store::models::{epoch_secs, RoomStatus, FAIL_ALLOC_TIMEOUT, FAIL_SERVER_CRASH};
use crate::store::StateStore;

/// Spawn the reconciliation loop; it exits when the process shuts down.
pub fn spawn(state: SharedState) -> tokio::task::JoinHandle<()> {
    tokio::spawn(run(state))
}

pub async fn run(state: SharedState) {
    let interval = state.config().reconcile.interval;
    let mut shutdown = state.shutdown_rx();
    info!(interval_secs = interval.as_secs(), "reconciler started");
    loop {
        tokio::select! {
            _ = sleep(interval) => tick(&state).await,
            _ = shutdown.changed() => {
                info!("reconciler stopping");
                return;
            }
        }
    }
}

/// One reconciliation sweep. Errors are logged, never fatal.
pub(crate) async fn tick(state: &SharedState) {
    let running = match collect_running_jobs(state).await {
        Ok(running) => running,
        Err(err) => {
            warn!(error = %err, "failed to list running jobs; skipping sweep");
            return;
        }
    };
    sync_rooms(state, &running).await;
    stop_stray_jobs(state, &running).await;
}

/// Ids of prefixed jobs that currently have at least one running allocation.
async fn collect_running_jobs(state: &SharedState) -> OrchestratorResult<HashMap<String, String>> {
    let orchestrator = state.orchestrator();
    let prefix = &state.config().reconcile.job_prefix;
    let mut running = HashMap::new();
    for job in orchestrator.list_jobs().await? {
        if !job.name.starts_with(prefix) {
            continue;
        }
        let allocations = match orchestrator.allocations(job.id.clone()).await {
            Ok(allocations) => allocations,
            Err(err) => {
                warn!(job_id = %job.id, error = %err, "failed to list allocations");
                continue;
            }
        };
        if allocations.iter().any(|stub| stub.is_running()) {
            running.insert(job.id, job.name);
        }
    }
    Ok(running)
}

/// Converge every indexed room against the set of running jobs.
async fn sync_rooms(state: &SharedState, running: &HashMap<String, String>) {
    let store = state.store();
    let room_ids = match store.list_rooms().await {
        Ok(ids) => ids,
        Err(err) => {
            warn!(error = %err, "failed to list rooms; skipping sweep");
            return;
        }
    };
    let now = epoch_secs();
    let grace = state.config().reconcile.grace_seconds;

    for room_id in room_ids {
        let room = match store.get_room_state(room_id.clone()).await {
            Ok(room) => room,
            Err(err) => {
                warn!(%room_id, error = %err, "failed to read room; skipping");
                continue;
            }
        };
        let has_running_job = running.contains_key(&room_id);

        let Some(room) = room else {
            // Index entry whose record expired; drop it once the job is gone.
            if !has_running_job {
                if let Err(err) = store.delete_room_state(room_id.clone()).await {
                    warn!(%room_id, error = %err, "failed to drop stale room index entry");
                }
            }
            continue;
        };

        if room.status.is_terminal() {
            if has_running_job {
                info!(%room_id, status = %room.status, "terminal room still has a running job");
                deregister_quietly(state, &room_id).await;
            }
            continue;
        }

        if has_running_job || now - room.created_at <= grace {
            continue;
        }

        // Jobless past the grace window: the watcher owns neither anymore.
        let fail_reason = match room.status {
            RoomStatus::Actived => FAIL_SERVER_CRASH,
            RoomStatus::Opened => FAIL_ALLOC_TIMEOUT,
            RoomStatus::Fulfilled | RoomStatus::Dead => continue,
        };
        let mut dead = room;
        if let Err(err) = dead.mark_dead(fail_reason) {
            warn!(%room_id, error = %err, "unexpected room state during sweep");
            continue;
        }
        match store.save_room_state(dead).await {
            Ok(()) => info!(%room_id, fail_reason, "room declared dead"),
            Err(err) => warn!(%room_id, error = %err, "failed to persist dead room"),
        }
    }
}

/// Stop running prefixed jobs that no live room accounts for. Jobs of
/// OPENED rooms are left to their allocation watcher; terminal rooms are
/// handled by the room sweep above.
async fn stop_stray_jobs(state: &SharedState, running: &HashMap<String, String>) {
    let store = state.store();
    for (job_id, job_name) in running {
        match store.get_room_state(job_id.clone()).await {
            Ok(Some(_room)) => {}
            Ok(None) => {
                info!(%job_id, %job_name, "deregistering stray job");
                deregister_quietly(state, job_id).await;
            }
            Err(err) => {
                warn!(%job_id, error = %err, "failed to read room for running job");
            }
        }
    }
}

async fn deregister_quietly(state: &SharedState, job_id: &str) {
    if let Err(err) = state.orchestrator().deregister(job_id.to_string(), false).await {
        warn!(%job_id, error = %err, "failed to deregister job");
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use indexmap::indexmap;

    use super::*;
    use crate::config::AppConfig;
    use crate::orchestrator::stub::StubOrchestrator;
    use crate::state::{AppState, SharedState};
    use crate::store::memory::MemoryStateStore;
    use crate::store::models::RoomState;
    use crate::store::StateStore;

    fn test_state() -> (SharedState, StubOrchestrator) {
        let config = AppConfig::from_env();
        let orchestrator = StubOrchestrator::new();
        let store = MemoryStateStore::new(config.store_tuning());
        let state = AppState::new(config, Arc::new(store), Arc::new(orchestrator.clone()));
        (state, orchestrator)
    }

    fn actived_room(room_id: &str, age_secs: i64) -> RoomState {
        let mut room = RoomState::opened(room_id.into(), vec!["p1".into(), "p2".into()]);
        room.mark_actived("alloc-1".into(), "203.0.113.10".into(), 31000)
            .unwrap();
        room.created_at = epoch_secs() - age_secs;
        room
    }

    #[tokio::test]
    async fn jobless_actived_room_dies_as_server_crash_after_grace() {
        let (state, _orchestrator) = test_state();
        state
            .store()
            .save_room_state(actived_room("r1", 120))
            .await
            .unwrap();

        tick(&state).await;

        let room = state
            .store()
            .get_room_state("r1".into())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(room.status, RoomStatus::Dead);
        assert_eq!(room.fail_reason.as_deref(), Some(FAIL_SERVER_CRASH));
        assert!(room.dead_at.is_some());
    }

    #[tokio::test]
    async fn room_within_grace_is_left_alone() {
        let (state, _orchestrator) = test_state();
        state
            .store()
            .save_room_state(actived_room("r1", 5))
            .await
            .unwrap();

        tick(&state).await;

        let room = state
            .store()
            .get_room_state("r1".into())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(room.status, RoomStatus::Actived);
    }

    #[tokio::test]
    async fn jobless_opened_room_dies_as_alloc_timeout_after_grace() {
        let (state, _orchestrator) = test_state();
        let mut room = RoomState::opened("r1".into(), vec!["p1".into(), "p2".into()]);
        room.created_at = epoch_secs() - 120;
        state.store().save_room_state(room).await.unwrap();

        tick(&state).await;

        let room = state
            .store()
            .get_room_state("r1".into())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(room.status, RoomStatus::Dead);
        assert_eq!(room.fail_reason.as_deref(), Some(FAIL_ALLOC_TIMEOUT));
    }

    #[tokio::test]
    async fn stray_running_job_is_deregistered_without_purge() {
        let (state, orchestrator) = test_state();
        orchestrator.inject_job("x", "game-server-x");
        orchestrator.script_running("x", "alloc-x", "10.0.0.1", indexmap! {"http".to_string() => 31000});

        tick(&state).await;

        assert_eq!(orchestrator.deregistrations(), vec![("x".to_string(), false)]);
        assert!(state.store().list_rooms().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn unprefixed_jobs_are_ignored() {
        let (state, orchestrator) = test_state();
        orchestrator.inject_job("db", "postgres-primary");
        orchestrator.script_running("db", "alloc-db", "10.0.0.1", indexmap! {"db".to_string() => 5432});

        tick(&state).await;

        assert!(orchestrator.deregistrations().is_empty());
    }

    #[tokio::test]
    async fn opened_room_with_running_job_keeps_its_job() {
        let (state, orchestrator) = test_state();
        let room = RoomState::opened("r1".into(), vec!["p1".into(), "p2".into()]);
        state.store().save_room_state(room).await.unwrap();
        orchestrator.inject_job("r1", "game-server-r1");
        orchestrator.script_running("r1", "alloc-1", "10.0.0.1", indexmap! {"http".to_string() => 31000});

        tick(&state).await;

        assert!(orchestrator.deregistrations().is_empty());
    }

    #[tokio::test]
    async fn terminal_room_with_running_job_is_stopped_but_not_rewritten() {
        let (state, orchestrator) = test_state();
        let mut room = actived_room("r1", 10);
        room.mark_fulfilled("no_clients", epoch_secs()).unwrap();
        state.store().save_room_state(room).await.unwrap();
        orchestrator.inject_job("r1", "game-server-r1");
        orchestrator.script_running("r1", "alloc-1", "10.0.0.1", indexmap! {"http".to_string() => 31000});

        tick(&state).await;

        assert_eq!(orchestrator.deregistrations(), vec![("r1".to_string(), false)]);
        let room = state
            .store()
            .get_room_state("r1".into())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(room.status, RoomStatus::Fulfilled);
    }

    #[tokio::test(start_paused = true)]
    async fn expired_record_index_entry_is_dropped() {
        let (state, _orchestrator) = test_state();
        let room = RoomState::opened("r1".into(), vec!["p1".into(), "p2".into()]);
        state.store().save_room_state(room).await.unwrap();

        tokio::time::advance(Duration::from_secs(91)).await;
        tick(&state).await;

        assert!(state.store().list_rooms().await.unwrap().is_empty());
    }
}
