//! Shutdown event sources. Each source runs as its own task, emits at most
//! one event into the SDK's channel, and exits promptly when the stop signal
//! fires.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::error;

use super::event::{ShutdownEvent, ShutdownReason};

/// Producer of shutdown events.
pub trait ShutdownSource: Send + Sync {
    /// Start the source. It must only emit through `emit` and must finish
    /// once `stop` changes.
    fn spawn(
        &self,
        emit: mpsc::Sender<ShutdownEvent>,
        stop: watch::Receiver<bool>,
    ) -> JoinHandle<()>;
}

/// Emits `signal_received` on SIGINT/SIGTERM.
#[derive(Debug, Clone, Copy, Default)]
pub struct SignalSource;

impl ShutdownSource for SignalSource {
    fn spawn(
        &self,
        emit: mpsc::Sender<ShutdownEvent>,
        mut stop: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            #[cfg(unix)]
            {
                use tokio::signal::unix::{signal, SignalKind};

                let mut interrupt = match signal(SignalKind::interrupt()) {
                    Ok(stream) => stream,
                    Err(err) => {
                        error!(error = %err, "failed to install SIGINT handler");
                        return;
                    }
                };
                let mut terminate = match signal(SignalKind::terminate()) {
                    Ok(stream) => stream,
                    Err(err) => {
                        error!(error = %err, "failed to install SIGTERM handler");
                        return;
                    }
                };
                tokio::select! {
                    _ = interrupt.recv() => {
                        let _ = emit.send(ShutdownEvent::new(ShutdownReason::SignalReceived)).await;
                    }
                    _ = terminate.recv() => {
                        let _ = emit.send(ShutdownEvent::new(ShutdownReason::SignalReceived)).await;
                    }
                    _ = stop.changed() => {}
                }
            }

            #[cfg(not(unix))]
            {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {
                        let _ = emit.send(ShutdownEvent::new(ShutdownReason::SignalReceived)).await;
                    }
                    _ = stop.changed() => {}
                }
            }
        })
    }
}

/// Current view of the server's player population, supplied by the game.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlayerStats {
    pub active_players: usize,
    /// Whether any player stayed disconnected beyond the heartbeat TTL.
    pub any_disconnected: bool,
}

/// Callback the game implements to report player statistics.
pub type StatsFn = Arc<dyn Fn() -> PlayerStats + Send + Sync>;

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Watches the player population: emits `no_clients` when nobody joined
/// within the initial grace, then `client_disconnected` on the first
/// heartbeat TTL breach.
#[derive(Clone)]
pub struct HeartbeatSource {
    initial_grace: Duration,
    poll_interval: Duration,
    stats: StatsFn,
}

impl HeartbeatSource {
    pub fn new(
        initial_grace: Duration,
        poll_interval: Duration,
        stats: impl Fn() -> PlayerStats + Send + Sync + 'static,
    ) -> Self {
        let poll_interval = if poll_interval.is_zero() {
            DEFAULT_POLL_INTERVAL
        } else {
            poll_interval
        };
        Self {
            initial_grace,
            poll_interval,
            stats: Arc::new(stats),
        }
    }
}

impl ShutdownSource for HeartbeatSource {
    fn spawn(
        &self,
        emit: mpsc::Sender<ShutdownEvent>,
        mut stop: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        let initial_grace = self.initial_grace;
        let poll_interval = self.poll_interval;
        let stats = self.stats.clone();
        tokio::spawn(async move {
            if !initial_grace.is_zero() {
                tokio::select! {
                    _ = sleep(initial_grace) => {}
                    _ = stop.changed() => return,
                }
            }

            if stats().active_players == 0 {
                let _ = emit.send(ShutdownEvent::new(ShutdownReason::NoClients)).await;
                return;
            }

            loop {
                tokio::select! {
                    _ = sleep(poll_interval) => {}
                    _ = stop.changed() => return,
                }
                if stats().any_disconnected {
                    let _ = emit
                        .send(ShutdownEvent::new(ShutdownReason::ClientDisconnected))
                        .await;
                    return;
                }
            }
        })
    }
}
