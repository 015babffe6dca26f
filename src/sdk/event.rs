//! Shutdown events exchanged between the game server and the agent.

use std::fmt;
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Closed set of shutdown reasons the agent accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShutdownReason {
    NoClients,
    ClientDisconnected,
    AfkTimeout,
    GameCycleCompleted,
    SignalReceived,
}

impl ShutdownReason {
    pub const ALL: [ShutdownReason; 5] = [
        ShutdownReason::NoClients,
        ShutdownReason::ClientDisconnected,
        ShutdownReason::AfkTimeout,
        ShutdownReason::GameCycleCompleted,
        ShutdownReason::SignalReceived,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ShutdownReason::NoClients => "no_clients",
            ShutdownReason::ClientDisconnected => "client_disconnected",
            ShutdownReason::AfkTimeout => "afk_timeout",
            ShutdownReason::GameCycleCompleted => "game_cycle_completed",
            ShutdownReason::SignalReceived => "signal_received",
        }
    }
}

impl fmt::Display for ShutdownReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing a reason outside the closed set.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown shutdown reason `{0}`")]
pub struct UnknownReason(pub String);

impl FromStr for ShutdownReason {
    type Err = UnknownReason;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|reason| reason.as_str() == raw)
            .ok_or_else(|| UnknownReason(raw.to_string()))
    }
}

/// A shutdown notification, optionally carrying end-of-game details such as
/// the winner and per-player scores.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShutdownEvent {
    pub reason: ShutdownReason,
    pub at: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl ShutdownEvent {
    /// Event stamped with the current time.
    pub fn new(reason: ShutdownReason) -> Self {
        Self {
            reason,
            at: now_unix(),
            details: None,
        }
    }

    pub fn with_details(reason: ShutdownReason, details: serde_json::Value) -> Self {
        Self {
            details: Some(details),
            ..Self::new(reason)
        }
    }
}

fn now_unix() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs() as i64)
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reasons_round_trip_through_wire_names() {
        for reason in ShutdownReason::ALL {
            let wire = serde_json::to_value(reason).unwrap();
            assert_eq!(wire, reason.as_str());
            assert_eq!(reason.as_str().parse::<ShutdownReason>().unwrap(), reason);
        }
    }

    #[test]
    fn unknown_reason_is_rejected() {
        let err = "out_of_band".parse::<ShutdownReason>().unwrap_err();
        assert_eq!(err, UnknownReason("out_of_band".into()));
    }

    #[test]
    fn details_are_omitted_when_absent() {
        let event = ShutdownEvent::new(ShutdownReason::NoClients);
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["reason"], "no_clients");
        assert!(value.get("details").is_none());
    }
}
