//! Request/response bodies of the room routes.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Body of `POST /rooms/{room_id}/shutdown`.
///
/// The reason travels as a raw string so the handler can reject anything
/// outside the closed reason set with a useful message.
#[derive(Debug, Deserialize, ToSchema)]
pub struct ShutdownRequest {
    pub reason: String,
    #[serde(default)]
    pub at: Option<i64>,
    #[serde(default)]
    pub details: Option<ShutdownDetails>,
}

/// Optional end-of-game payload; unknown keys are ignored.
#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct ShutdownDetails {
    #[serde(default)]
    pub winner: Option<String>,
    #[serde(default)]
    pub scores: Option<HashMap<String, i64>>,
}

/// Reply to the shutdown callback.
#[derive(Debug, Serialize, ToSchema)]
pub struct ShutdownAck {
    pub ok: bool,
}

impl ShutdownAck {
    pub fn ok() -> Self {
        Self { ok: true }
    }
}
