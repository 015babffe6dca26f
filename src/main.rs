//! lobbyd agent binary: wires the Redis-backed state store, the Nomad
//! adapter, the reconciler, and the REST facade.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use axum::Router;
use tokio::net::TcpListener;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use lobbyd::config::AppConfig;
use lobbyd::orchestrator::nomad::NomadOrchestrator;
use lobbyd::routes;
use lobbyd::services::reconciler;
use lobbyd::state::{self, AppState};
use lobbyd::store::redis::RedisStateStore;
use lobbyd::store::StateStore;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let config = AppConfig::from_env();
    info!(
        port = config.server.port,
        redis = %config.redis.url,
        nomad = %config.nomad.address,
        "configuration loaded"
    );

    let store = RedisStateStore::connect(&config.redis.url, config.store_tuning())
        .await
        .context("connecting to redis")?;
    store.ping().await.context("redis not reachable")?;

    let orchestrator = NomadOrchestrator::new(&config.nomad.address, config.timeouts.http_client)
        .context("building nomad client")?;

    let port = config.server.port;
    let app_state = AppState::new(config, Arc::new(store), Arc::new(orchestrator));

    let reconciler_task = reconciler::spawn(app_state.clone());

    let app = build_router(app_state.clone());
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!(%addr, "starting agent");

    let listener = TcpListener::bind(addr).await.context("binding server")?;
    let signal_state = app_state.clone();
    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            signal_state.begin_shutdown();
        })
        .await
        .context("serving axum")?;

    // Make sure background tasks stop even if serve returned another way.
    app_state.begin_shutdown();
    let _ = reconciler_task.await;

    Ok(())
}

/// Build the top-level router and attach cross-cutting middleware layers.
fn build_router(state: state::SharedState) -> Router<()> {
    routes::router(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

/// Configure tracing subscribers so logs include spans by default.
fn init_tracing() {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,tower_http=debug".into());
    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Wait for Ctrl+C or SIGTERM and shut the agent down gracefully.
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut term = match signal(SignalKind::terminate()) {
            Ok(term) => term,
            Err(_) => {
                let _ = tokio::signal::ctrl_c().await;
                return;
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {},
            _ = term.recv() => {},
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
