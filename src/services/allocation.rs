//! Per-room allocation watcher: submits the game-server job and polls the
//! orchestrator until the server is addressable, the deadline elapses, or
//! the process shuts down. A room that fails here stays DEAD; the watcher
//! never retries a submission.

use indexmap::IndexMap;
use tokio::time::{sleep, Instant};
use tracing::{error, info, warn};

use crate::config::{map_public_ip, AppConfig};
use crate::orchestrator::{JobOrchestrator, JobSpec, OrchestratorResult, HTTP_PORT_LABEL};
use crate::state::SharedState;
use crate::store::models::{RoomState, RoomStatus, FAIL_ALLOC_TIMEOUT, FAIL_DUPLICATE_PLAYER};
use crate::store::{StateStore, StoreResult};

/// Spawn the watcher for a freshly opened room.
pub fn spawn(state: SharedState, room: RoomState) {
    tokio::spawn(watch_room(state, room));
}

/// Job description for one room's dedicated server.
pub fn build_job_spec(config: &AppConfig, room_id: &str) -> JobSpec {
    let mut args = vec![
        "-port".to_string(),
        JobSpec::port_placeholder(HTTP_PORT_LABEL),
        "-serverId".to_string(),
        room_id.to_string(),
        "-token".to_string(),
        config.auth.bearer_token.clone(),
    ];
    args.extend(config.server_job.extra_args.iter().cloned());
    JobSpec {
        job_id: room_id.to_string(),
        name: format!("{}{room_id}", config.reconcile.job_prefix),
        cpu_mhz: config.server_job.cpu_mhz,
        memory_mb: config.server_job.memory_mb,
        command: config.server_job.command.clone(),
        args,
        dynamic_port_label: HTTP_PORT_LABEL.to_string(),
        datacenters: config.nomad.datacenters.clone(),
    }
}

pub(crate) async fn watch_room(state: SharedState, room: RoomState) {
    let room_id = room.room_id.clone();
    let spec = build_job_spec(state.config(), &room_id);
    if let Err(err) = state.orchestrator().submit(spec).await {
        error!(%room_id, error = %err, "job submission failed");
        write_dead(&state, &room, &err.to_string()).await;
        return;
    }
    info!(%room_id, "game-server job submitted");

    let deadline = Instant::now() + state.config().matchmaking.allocation_deadline;
    let poll_delay = state.config().matchmaking.allocation_poll_delay;
    let mut shutdown = state.shutdown_rx();

    loop {
        match find_running(&state, &room_id).await {
            Ok(Some(endpoint)) => {
                finalize(&state, &room, endpoint).await;
                return;
            }
            Ok(None) => {}
            Err(err) => {
                warn!(%room_id, error = %err, "allocation poll failed");
            }
        }

        if Instant::now() >= deadline {
            info!(%room_id, "allocation deadline elapsed");
            write_dead(&state, &room, FAIL_ALLOC_TIMEOUT).await;
            deregister_quietly(&state, &room_id).await;
            return;
        }

        tokio::select! {
            _ = sleep(poll_delay) => {}
            _ = shutdown.changed() => return,
        }
    }
}

/// A running allocation's addressable endpoint, before IP mapping.
struct ServerEndpoint {
    allocation_id: String,
    host_ip: String,
    port: u16,
}

/// Fetch the room's running allocation, if one is placed and addressable.
async fn find_running(state: &SharedState, room_id: &str) -> OrchestratorResult<Option<ServerEndpoint>> {
    let orchestrator = state.orchestrator();
    let stubs = orchestrator.allocations(room_id.to_string()).await?;
    let Some(running) = stubs.iter().find(|stub| stub.is_running()) else {
        return Ok(None);
    };

    let info = orchestrator
        .allocation_info(running.alloc_id.clone())
        .await?;
    let Some(port) = pick_port(&info.ports) else {
        return Ok(None);
    };

    let node = orchestrator.node_info(info.node_id.clone()).await?;
    let Some(host_ip) = node.host_ip() else {
        return Ok(None);
    };

    Ok(Some(ServerEndpoint {
        allocation_id: info.alloc_id,
        host_ip,
        port,
    }))
}

async fn finalize(state: &SharedState, room: &RoomState, endpoint: ServerEndpoint) {
    let room_id = &room.room_id;
    let port = endpoint.port;
    let server_ip = map_public_ip(&state.config().nomad.ip_mappings, &endpoint.host_ip);

    match player_already_active(state, room).await {
        Ok(true) => {
            warn!(%room_id, "player already owns a live room");
            write_dead(state, room, FAIL_DUPLICATE_PLAYER).await;
            deregister_quietly(state, room_id).await;
            return;
        }
        Ok(false) => {}
        Err(err) => {
            warn!(%room_id, error = %err, "live-room uniqueness check failed");
            return;
        }
    }

    let mut actived = room.clone();
    if let Err(err) = actived.mark_actived(endpoint.allocation_id, server_ip.clone(), port) {
        warn!(%room_id, error = %err, "room no longer eligible for activation");
        return;
    }
    match state.store().save_room_state(actived).await {
        Ok(()) => info!(%room_id, %server_ip, port, "room actived"),
        Err(err) => error!(%room_id, error = %err, "failed to persist actived room"),
    }
}

/// Prefer the labelled game port; otherwise the first positive port in
/// deterministic iteration order.
fn pick_port(ports: &IndexMap<String, u16>) -> Option<u16> {
    if let Some(port) = ports.get(HTTP_PORT_LABEL) {
        if *port > 0 {
            return Some(*port);
        }
    }
    ports.values().copied().find(|port| *port > 0)
}

/// Whether any other ACTIVED room shares a player with this one.
async fn player_already_active(state: &SharedState, room: &RoomState) -> StoreResult<bool> {
    let store = state.store();
    for other_id in store.list_rooms().await? {
        if other_id == room.room_id {
            continue;
        }
        let Some(other) = store.get_room_state(other_id).await? else {
            continue;
        };
        if other.status == RoomStatus::Actived
            && other
                .players
                .iter()
                .any(|player| room.players.contains(player))
        {
            return Ok(true);
        }
    }
    Ok(false)
}

async fn write_dead(state: &SharedState, room: &RoomState, fail_reason: &str) {
    let mut dead = room.clone();
    if let Err(err) = dead.mark_dead(fail_reason) {
        warn!(room_id = %room.room_id, error = %err, "room already left the opened state");
        return;
    }
    if let Err(err) = state.store().save_room_state(dead).await {
        error!(room_id = %room.room_id, error = %err, "failed to persist dead room");
    }
}

/// Stop the job without purging it, so operators can still inspect logs.
async fn deregister_quietly(state: &SharedState, room_id: &str) {
    if let Err(err) = state.orchestrator().deregister(room_id.to_string(), false).await {
        warn!(%room_id, error = %err, "failed to deregister job");
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use indexmap::indexmap;

    use super::*;
    use crate::config::IpMapping;
    use crate::orchestrator::stub::StubOrchestrator;
    use crate::state::AppState;
    use crate::store::memory::MemoryStateStore;
    use crate::store::StateStore;

    fn test_config() -> AppConfig {
        let mut config = AppConfig::from_env();
        config.nomad.ip_mappings = vec![IpMapping {
            private_ip: "10.0.0.1".into(),
            public_ip: "203.0.113.10".into(),
        }];
        config
    }

    fn test_state(config: AppConfig) -> (SharedState, StubOrchestrator) {
        let orchestrator = StubOrchestrator::new();
        let store = MemoryStateStore::new(config.store_tuning());
        let state = AppState::new(config, Arc::new(store), Arc::new(orchestrator.clone()));
        (state, orchestrator)
    }

    fn opened_room() -> RoomState {
        RoomState::opened("r1".into(), vec!["p1".into(), "p2".into()])
    }

    #[tokio::test(start_paused = true)]
    async fn running_allocation_actives_the_room() {
        let (state, orchestrator) = test_state(test_config());
        orchestrator.script_running("r1", "alloc-1", "10.0.0.1", indexmap! {"http".to_string() => 31000});
        state.store().save_room_state(opened_room()).await.unwrap();

        watch_room(state.clone(), opened_room()).await;

        let room = state
            .store()
            .get_room_state("r1".into())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(room.status, RoomStatus::Actived);
        assert_eq!(room.allocation_id.as_deref(), Some("alloc-1"));
        // Private node address is mapped to its public counterpart.
        assert_eq!(room.server_ip.as_deref(), Some("203.0.113.10"));
        assert_eq!(room.port, Some(31000));
        assert_eq!(room.players, vec!["p1".to_string(), "p2".to_string()]);

        let submitted = orchestrator.submissions();
        assert_eq!(submitted.len(), 1);
        assert_eq!(submitted[0].job_id, "r1");
        assert!(submitted[0]
            .args
            .windows(2)
            .any(|pair| pair[0] == "-serverId" && pair[1] == "r1"));
    }

    #[tokio::test(start_paused = true)]
    async fn unlabelled_port_falls_back_to_first_positive() {
        let (state, orchestrator) = test_state(test_config());
        orchestrator.script_running(
            "r1",
            "alloc-1",
            "10.0.0.9",
            indexmap! {"metrics".to_string() => 0u16, "game".to_string() => 31999u16},
        );
        state.store().save_room_state(opened_room()).await.unwrap();

        watch_room(state.clone(), opened_room()).await;

        let room = state
            .store()
            .get_room_state("r1".into())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(room.status, RoomStatus::Actived);
        assert_eq!(room.port, Some(31999));
        assert_eq!(room.server_ip.as_deref(), Some("10.0.0.9"));
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_without_allocation_kills_the_room() {
        let (state, orchestrator) = test_state(test_config());
        state.store().save_room_state(opened_room()).await.unwrap();

        watch_room(state.clone(), opened_room()).await;

        let room = state
            .store()
            .get_room_state("r1".into())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(room.status, RoomStatus::Dead);
        assert_eq!(room.fail_reason.as_deref(), Some(FAIL_ALLOC_TIMEOUT));
        // The job is stopped but kept inspectable.
        assert_eq!(orchestrator.deregistrations(), vec![("r1".to_string(), false)]);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_submission_kills_the_room_immediately() {
        let (state, orchestrator) = test_state(test_config());
        orchestrator.fail_submissions(true);
        state.store().save_room_state(opened_room()).await.unwrap();

        watch_room(state.clone(), opened_room()).await;

        let room = state
            .store()
            .get_room_state("r1".into())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(room.status, RoomStatus::Dead);
        assert!(room.fail_reason.is_some());
        assert!(orchestrator.deregistrations().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn duplicate_player_guard_refuses_activation() {
        let (state, orchestrator) = test_state(test_config());

        let mut live = RoomState::opened("other".into(), vec!["p2".into(), "p9".into()]);
        live.mark_actived("alloc-0".into(), "203.0.113.99".into(), 30000)
            .unwrap();
        state.store().save_room_state(live).await.unwrap();

        orchestrator.script_running("r1", "alloc-1", "10.0.0.1", indexmap! {"http".to_string() => 31000});
        state.store().save_room_state(opened_room()).await.unwrap();

        watch_room(state.clone(), opened_room()).await;

        let room = state
            .store()
            .get_room_state("r1".into())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(room.status, RoomStatus::Dead);
        assert_eq!(room.fail_reason.as_deref(), Some(FAIL_DUPLICATE_PLAYER));
        assert_eq!(orchestrator.deregistrations(), vec![("r1".to_string(), false)]);
    }
}
