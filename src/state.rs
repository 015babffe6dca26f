//! Central application state shared by request handlers and background tasks.

use std::sync::Arc;

use tokio::sync::watch;

use crate::config::AppConfig;
use crate::orchestrator::JobOrchestrator;
use crate::store::StateStore;

pub type SharedState = Arc<AppState>;

/// Process-wide handles: the state store, the orchestrator port, the
/// immutable configuration, and the shutdown signal fanned out to every
/// background task.
pub struct AppState {
    store: Arc<dyn StateStore>,
    orchestrator: Arc<dyn JobOrchestrator>,
    config: AppConfig,
    shutdown: watch::Sender<bool>,
}

impl AppState {
    /// Construct the shared state wrapped in an [`Arc`] so it can be cloned
    /// cheaply into handlers and spawned tasks.
    pub fn new(
        config: AppConfig,
        store: Arc<dyn StateStore>,
        orchestrator: Arc<dyn JobOrchestrator>,
    ) -> SharedState {
        let (shutdown, _rx) = watch::channel(false);
        Arc::new(Self {
            store,
            orchestrator,
            config,
            shutdown,
        })
    }

    pub fn store(&self) -> &Arc<dyn StateStore> {
        &self.store
    }

    pub fn orchestrator(&self) -> &Arc<dyn JobOrchestrator> {
        &self.orchestrator
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Receiver background tasks select on to exit promptly.
    pub fn shutdown_rx(&self) -> watch::Receiver<bool> {
        self.shutdown.subscribe()
    }

    /// Signal every background task to stop. Idempotent.
    pub fn begin_shutdown(&self) {
        let _ = self.shutdown.send(true);
    }
}
