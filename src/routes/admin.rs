use axum::{extract::State, routing::get, Json, Router};

use crate::{
    dto::admin::AdminOverviewResponse, error::AgentError, services::admin_service,
    state::SharedState,
};

/// Routes serving the operator dashboard data.
pub fn router() -> Router<SharedState> {
    Router::new().route("/admin/overview", get(overview))
}

#[utoipa::path(
    get,
    path = "/admin/overview",
    tag = "admin",
    responses((status = 200, description = "Snapshot of tickets and rooms", body = AdminOverviewResponse))
)]
/// Snapshot of open tickets and rooms grouped by status.
pub async fn overview(
    State(state): State<SharedState>,
) -> Result<Json<AdminOverviewResponse>, AgentError> {
    let snapshot = admin_service::overview(&state).await?;
    Ok(Json(snapshot))
}
