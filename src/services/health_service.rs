use tracing::warn;

use crate::dto::health::HealthResponse;
use crate::state::SharedState;
use crate::store::StateStore;

/// Respond with the store-backed health status, logging connectivity issues.
pub async fn health_status(state: &SharedState) -> HealthResponse {
    match state.store().ping().await {
        Ok(()) => HealthResponse::ok(),
        Err(err) => {
            warn!(error = %err, "state store ping failed");
            HealthResponse::degraded()
        }
    }
}
