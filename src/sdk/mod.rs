//! Server-side shutdown SDK.
//!
//! Embedded in each game-server process: pluggable event sources feed a
//! middleware pipeline whose final handler notifies the agent that the room
//! should close.
//!
//! ```no_run
//! use std::time::Duration;
//!
//! use lobbyd::sdk::sources::{HeartbeatSource, PlayerStats, SignalSource};
//! use lobbyd::sdk::{SdkConfig, ShutdownSdk};
//!
//! # async fn run() {
//! let args: Vec<String> = std::env::args().collect();
//! let sdk = ShutdownSdk::new(SdkConfig::from_env_or_args(&args))
//!     .use_source(SignalSource)
//!     .use_source(HeartbeatSource::new(
//!         Duration::from_secs(30),
//!         Duration::from_secs(1),
//!         || PlayerStats { active_players: 0, any_disconnected: false },
//!     ));
//! let handle = sdk.run();
//! // ... serve the game ...
//! handle.shutdown().await;
//! # }
//! ```

pub mod config;
pub mod event;
pub mod notifier;
pub mod pipeline;
pub mod sources;

use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{error, info};

pub use self::config::SdkConfig;
pub use self::event::{ShutdownEvent, ShutdownReason};
pub use self::notifier::{AgentNotifier, ShutdownNotifier};
pub use self::pipeline::{Decision, Middleware, ShutdownContext, ShutdownHandler, ShutdownOutcome};
pub use self::sources::ShutdownSource;

const EVENT_CHANNEL_CAPACITY: usize = 8;

/// Builder and runtime of the shutdown machinery inside a game server.
pub struct ShutdownSdk {
    config: SdkConfig,
    sources: Vec<Box<dyn ShutdownSource>>,
    middlewares: Vec<Middleware>,
    final_handler: Option<ShutdownHandler>,
    notifier: Arc<dyn ShutdownNotifier>,
}

impl ShutdownSdk {
    pub fn new(config: SdkConfig) -> Self {
        Self {
            config,
            sources: Vec::new(),
            middlewares: Vec::new(),
            final_handler: None,
            notifier: Arc::new(AgentNotifier::new()),
        }
    }

    /// Register an event source; every registered source is started by
    /// [`ShutdownSdk::run`].
    pub fn use_source(mut self, source: impl ShutdownSource + 'static) -> Self {
        self.sources.push(Box::new(source));
        self
    }

    /// Append a middleware; middlewares run in registration order.
    pub fn use_middleware(mut self, middleware: Middleware) -> Self {
        self.middlewares.push(middleware);
        self
    }

    /// Replace the default agent notifier.
    pub fn with_notifier(mut self, notifier: Arc<dyn ShutdownNotifier>) -> Self {
        self.notifier = notifier;
        self
    }

    /// Replace the final handler (the default one invokes the notifier).
    pub fn with_final_handler(mut self, handler: ShutdownHandler) -> Self {
        self.final_handler = Some(handler);
        self
    }

    fn build_pipeline(&self) -> ShutdownHandler {
        let terminal = self.final_handler.clone().unwrap_or_else(|| {
            let notifier = self.notifier.clone();
            pipeline::handler(move |ctx: ShutdownContext| {
                let notifier = notifier.clone();
                async move {
                    match notifier.notify(ctx.config, ctx.event).await {
                        Ok(()) => ShutdownOutcome::proceed(),
                        Err(err) => ShutdownOutcome::fail(err),
                    }
                }
            })
        });
        pipeline::compose(&self.middlewares, terminal)
    }

    /// Run one event through the pipeline.
    pub async fn dispatch(&self, event: ShutdownEvent) -> ShutdownOutcome {
        let handler = self.build_pipeline();
        handler(ShutdownContext {
            config: self.config.clone(),
            event,
        })
        .await
    }

    /// Send a shutdown with a detail payload (e.g. `winner` and `scores`
    /// once the game cycle completed).
    pub async fn send_with_details(
        &self,
        reason: ShutdownReason,
        details: serde_json::Value,
    ) -> ShutdownOutcome {
        self.dispatch(ShutdownEvent::with_details(reason, details))
            .await
    }

    /// Start every source plus the dispatcher and hand back an idempotent
    /// stop handle.
    pub fn run(self) -> SdkHandle {
        let (stop_tx, stop_rx) = watch::channel(false);
        let (emit_tx, mut emit_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);

        let mut tasks: Vec<JoinHandle<()>> = self
            .sources
            .iter()
            .map(|source| source.spawn(emit_tx.clone(), stop_rx.clone()))
            .collect();
        drop(emit_tx);

        let mut dispatcher_stop = stop_rx;
        tasks.push(tokio::spawn(async move {
            loop {
                tokio::select! {
                    received = emit_rx.recv() => {
                        let Some(event) = received else { return };
                        let outcome = self.dispatch(event.clone()).await;
                        match (outcome.decision, outcome.error) {
                            (Decision::Cancel, _) => {
                                info!(reason = %event.reason, "shutdown canceled by pipeline");
                            }
                            (_, Some(err)) => {
                                error!(reason = %event.reason, error = %err, "shutdown notification failed");
                            }
                            _ => {
                                info!(reason = %event.reason, "shutdown notified");
                            }
                        }
                    }
                    _ = dispatcher_stop.changed() => return,
                }
            }
        }));

        SdkHandle {
            stop: stop_tx,
            tasks,
        }
    }
}

/// Handle returned by [`ShutdownSdk::run`].
pub struct SdkHandle {
    stop: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl SdkHandle {
    /// Signal every source and the dispatcher to stop. Safe to call any
    /// number of times.
    pub fn stop(&self) {
        let _ = self.stop.send(true);
    }

    /// Stop and wait for all tasks to finish.
    pub async fn shutdown(self) {
        self.stop();
        for task in self.tasks {
            let _ = task.await;
        }
    }
}
