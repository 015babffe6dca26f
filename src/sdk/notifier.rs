//! Delivery of shutdown events to the agent's REST API.

use std::time::Duration;

use futures::future::BoxFuture;
use reqwest::Client;
use thiserror::Error;

use super::config::SdkConfig;
use super::event::ShutdownEvent;

const HTTP_TIMEOUT: Duration = Duration::from_secs(5);

/// Error raised while notifying the agent.
#[derive(Debug, Error)]
pub enum NotifyError {
    /// A required configuration field is empty.
    #[error("notifier config incomplete: missing {0}")]
    IncompleteConfig(&'static str),
    /// The request never reached the agent.
    #[error("failed to reach agent: {source}")]
    Transport {
        #[from]
        source: reqwest::Error,
    },
    /// The agent answered with a non-success status.
    #[error("agent returned status {status}")]
    Rejected { status: u16 },
}

/// Sink for shutdown events; the default implementation posts to the agent.
pub trait ShutdownNotifier: Send + Sync {
    fn notify(
        &self,
        config: SdkConfig,
        event: ShutdownEvent,
    ) -> BoxFuture<'static, Result<(), NotifyError>>;
}

/// Notifier POSTing the serialized event to
/// `{agent_base_url}/rooms/{room_id}/shutdown` with bearer auth.
#[derive(Clone)]
pub struct AgentNotifier {
    client: Client,
}

impl AgentNotifier {
    pub fn new() -> Self {
        let client = Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .unwrap_or_else(|_| Client::new());
        Self { client }
    }
}

impl Default for AgentNotifier {
    fn default() -> Self {
        Self::new()
    }
}

impl ShutdownNotifier for AgentNotifier {
    fn notify(
        &self,
        config: SdkConfig,
        event: ShutdownEvent,
    ) -> BoxFuture<'static, Result<(), NotifyError>> {
        let client = self.client.clone();
        Box::pin(async move {
            if config.room_id.is_empty() {
                return Err(NotifyError::IncompleteConfig("room_id"));
            }
            if config.token.is_empty() {
                return Err(NotifyError::IncompleteConfig("token"));
            }
            if config.agent_base_url.is_empty() {
                return Err(NotifyError::IncompleteConfig("agent_base_url"));
            }

            let url = format!(
                "{}/rooms/{}/shutdown",
                config.agent_base_url.trim_end_matches('/'),
                config.room_id
            );
            let response = client
                .post(url)
                .bearer_auth(&config.token)
                .json(&event)
                .send()
                .await?;
            let status = response.status();
            if status.is_success() {
                Ok(())
            } else {
                Err(NotifyError::Rejected {
                    status: status.as_u16(),
                })
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use axum::extract::State;
    use axum::http::HeaderMap;
    use axum::routing::post;
    use axum::{Json, Router};
    use tokio::net::TcpListener;

    use super::super::event::ShutdownReason;
    use super::*;

    #[derive(Clone, Default)]
    struct Received {
        calls: Arc<Mutex<Vec<(Option<String>, ShutdownEvent)>>>,
    }

    async fn start_agent(received: Received, status: axum::http::StatusCode) -> String {
        let app = Router::new()
            .route(
                "/rooms/{room_id}/shutdown",
                post(
                    move |State(received): State<Received>,
                          headers: HeaderMap,
                          Json(event): Json<ShutdownEvent>| async move {
                        let auth = headers
                            .get("authorization")
                            .and_then(|value| value.to_str().ok())
                            .map(|value| value.to_string());
                        received.calls.lock().unwrap().push((auth, event));
                        status
                    },
                ),
            )
            .with_state(received);

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app.into_make_service()).await.unwrap();
        });
        format!("http://{addr}")
    }

    fn config(base: String) -> SdkConfig {
        SdkConfig {
            port: "31000".into(),
            room_id: "r1".into(),
            token: "secret".into(),
            agent_base_url: base,
        }
    }

    #[tokio::test]
    async fn posts_event_with_bearer_auth() {
        let received = Received::default();
        let base = start_agent(received.clone(), axum::http::StatusCode::OK).await;

        let notifier = AgentNotifier::new();
        notifier
            .notify(config(base), ShutdownEvent::new(ShutdownReason::NoClients))
            .await
            .unwrap();

        let calls = received.calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        let (auth, event) = &calls[0];
        assert_eq!(auth.as_deref(), Some("Bearer secret"));
        assert_eq!(event.reason, ShutdownReason::NoClients);
    }

    #[tokio::test]
    async fn non_success_status_is_an_error() {
        let received = Received::default();
        let base = start_agent(received.clone(), axum::http::StatusCode::BAD_REQUEST).await;

        let notifier = AgentNotifier::new();
        let err = notifier
            .notify(
                config(base),
                ShutdownEvent::new(ShutdownReason::SignalReceived),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, NotifyError::Rejected { status: 400 }));
    }

    #[tokio::test]
    async fn incomplete_config_is_rejected_before_sending() {
        let notifier = AgentNotifier::new();
        let err = notifier
            .notify(
                SdkConfig::default(),
                ShutdownEvent::new(ShutdownReason::NoClients),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, NotifyError::IncompleteConfig("room_id")));
    }
}
