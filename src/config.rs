//! Application-level configuration, read once from the environment at boot
//! and injected by value everywhere it is needed.

use std::env;
use std::time::Duration;

use serde::Deserialize;
use tracing::warn;

use crate::store::StoreTuning;

/// Immutable runtime configuration shared across the agent.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub redis: RedisConfig,
    pub nomad: NomadConfig,
    pub matchmaking: MatchmakingConfig,
    pub reconcile: ReconcileConfig,
    pub auth: AuthConfig,
    pub timeouts: TimeoutConfig,
    pub server_job: ServerJobConfig,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// HTTP port the agent listens on.
    pub port: u16,
}

#[derive(Debug, Clone)]
pub struct RedisConfig {
    /// Redis connection string (`host:port` or full URL).
    pub url: String,
}

#[derive(Debug, Clone)]
pub struct NomadConfig {
    /// Nomad HTTP API endpoint.
    pub address: String,
    /// Datacenters jobs are submitted to.
    pub datacenters: Vec<String>,
    /// Private-to-public address substitutions applied after node lookup.
    pub ip_mappings: Vec<IpMapping>,
}

/// One private-to-public IP substitution.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct IpMapping {
    pub private_ip: String,
    pub public_ip: String,
}

#[derive(Debug, Clone)]
pub struct MatchmakingConfig {
    /// Lifetime of a ticket record.
    pub ticket_ttl: Duration,
    /// Lifetime of an OPENED room record.
    pub allocation_timeout: Duration,
    /// Hard deadline of the per-room allocation watcher.
    pub allocation_deadline: Duration,
    /// Delay between allocation polls.
    pub allocation_poll_delay: Duration,
    /// Retention of terminal room records.
    pub terminal_ttl: Duration,
}

#[derive(Debug, Clone)]
pub struct ReconcileConfig {
    /// Tolerance window before a jobless room is declared dead.
    pub grace_seconds: i64,
    /// Name prefix identifying game-server jobs.
    pub job_prefix: String,
    /// Interval between reconciliation sweeps.
    pub interval: Duration,
}

#[derive(Debug, Clone)]
pub struct AuthConfig {
    /// Shared secret for the shutdown callback and the server argument vector.
    pub bearer_token: String,
}

#[derive(Debug, Clone)]
pub struct TimeoutConfig {
    /// Bound on outbound HTTP requests (agent -> orchestrator).
    pub http_client: Duration,
    /// Bound on the store health check.
    pub store_ping: Duration,
}

#[derive(Debug, Clone)]
pub struct ServerJobConfig {
    /// Executable started on the allocated node.
    pub command: String,
    /// Arguments appended after the generated ones.
    pub extra_args: Vec<String>,
    pub cpu_mhz: u32,
    pub memory_mb: u32,
}

impl AppConfig {
    /// Read the configuration from environment variables, falling back to
    /// documented defaults for anything unset or unparseable.
    pub fn from_env() -> Self {
        Self {
            server: ServerConfig {
                port: env_parsed("SERVER_PORT", 8080),
            },
            redis: RedisConfig {
                url: env_or("REDIS_URL", "localhost:6379"),
            },
            nomad: NomadConfig {
                address: env_or("NOMAD_ADDRESS", "http://localhost:4646"),
                datacenters: env_list("NOMAD_DATACENTERS", &["dc1"]),
                ip_mappings: env_ip_mappings("NOMAD_IP_MAPPINGS"),
            },
            matchmaking: MatchmakingConfig {
                ticket_ttl: env_secs("TICKET_TTL_SECONDS", 120),
                allocation_timeout: env_secs("ALLOCATION_TIMEOUT_SECONDS", 90),
                allocation_deadline: env_secs("ALLOCATION_DEADLINE_SECONDS", 120),
                allocation_poll_delay: env_secs("ALLOCATION_POLL_DELAY_SECONDS", 2),
                terminal_ttl: env_secs("TERMINAL_TTL_SECONDS", 60),
            },
            reconcile: ReconcileConfig {
                grace_seconds: env_parsed("GRACE_SECONDS", 60),
                job_prefix: env_or("JOB_PREFIX", "game-server-"),
                interval: env_secs("RECONCILE_INTERVAL_SECONDS", 10),
            },
            auth: AuthConfig {
                bearer_token: env_or("BEARER_TOKEN", "1234abcd"),
            },
            timeouts: TimeoutConfig {
                http_client: env_secs("HTTP_CLIENT_TIMEOUT_SECONDS", 5),
                store_ping: env_secs("STORE_PING_TIMEOUT_SECONDS", 2),
            },
            server_job: ServerJobConfig {
                command: env_or("SERVER_COMMAND", "/usr/local/bin/game-server"),
                extra_args: env_list("SERVER_EXTRA_ARGS", &["-nographics", "-batchmode"]),
                cpu_mhz: env_parsed("SERVER_CPU_MHZ", 100),
                memory_mb: env_parsed("SERVER_MEMORY_MB", 100),
            },
        }
    }

    /// TTL tunables handed to the state store backend.
    pub fn store_tuning(&self) -> StoreTuning {
        StoreTuning {
            ticket_ttl: self.matchmaking.ticket_ttl,
            allocation_timeout: self.matchmaking.allocation_timeout,
            terminal_ttl: self.matchmaking.terminal_ttl,
            ping_timeout: self.timeouts.store_ping,
        }
    }
}

/// Substitute a private host address with its public counterpart; the first
/// matching mapping wins, unmapped addresses pass through unchanged.
pub fn map_public_ip(mappings: &[IpMapping], host_ip: &str) -> String {
    mappings
        .iter()
        .find(|mapping| mapping.private_ip == host_ip && !mapping.public_ip.is_empty())
        .map(|mapping| mapping.public_ip.clone())
        .unwrap_or_else(|| host_ip.to_string())
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parsed<T: std::str::FromStr + Copy>(key: &str, default: T) -> T {
    match env::var(key) {
        Ok(raw) => raw.parse().unwrap_or_else(|_| {
            warn!(key, value = %raw, "unparseable value; using default");
            default
        }),
        Err(_) => default,
    }
}

fn env_secs(key: &str, default_secs: u64) -> Duration {
    Duration::from_secs(env_parsed(key, default_secs))
}

/// Comma-separated list with surrounding whitespace trimmed.
fn env_list(key: &str, default: &[&str]) -> Vec<String> {
    match env::var(key) {
        Ok(raw) => raw
            .split(',')
            .map(|item| item.trim().to_string())
            .filter(|item| !item.is_empty())
            .collect(),
        Err(_) => default.iter().map(|item| item.to_string()).collect(),
    }
}

/// JSON list of `{private_ip, public_ip}` pairs; unset or invalid means no
/// mapping is applied.
fn env_ip_mappings(key: &str) -> Vec<IpMapping> {
    match env::var(key) {
        Ok(raw) => match serde_json::from_str(&raw) {
            Ok(mappings) => mappings,
            Err(err) => {
                warn!(key, error = %err, "invalid ip mappings; applying none");
                Vec::new()
            }
        },
        Err(_) => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_matching_mapping_wins() {
        let mappings = vec![
            IpMapping {
                private_ip: "10.0.0.1".into(),
                public_ip: "203.0.113.10".into(),
            },
            IpMapping {
                private_ip: "10.0.0.1".into(),
                public_ip: "203.0.113.99".into(),
            },
        ];
        assert_eq!(map_public_ip(&mappings, "10.0.0.1"), "203.0.113.10");
    }

    #[test]
    fn unmapped_address_passes_through() {
        assert_eq!(map_public_ip(&[], "10.0.0.7"), "10.0.0.7");
    }

    #[test]
    fn empty_public_ip_is_skipped() {
        let mappings = vec![IpMapping {
            private_ip: "10.0.0.1".into(),
            public_ip: String::new(),
        }];
        assert_eq!(map_public_ip(&mappings, "10.0.0.1"), "10.0.0.1");
    }
}
