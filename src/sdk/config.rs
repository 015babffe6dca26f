//! SDK configuration resolved from the environment first, then from the
//! argument vector the scheduler started the server with.

use std::env;

/// Identity and endpoints a game-server process needs to notify the agent.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SdkConfig {
    /// Port the server listens on (substituted by the scheduler).
    pub port: String,
    /// Room this server instance is bound to.
    pub room_id: String,
    /// Bearer token shared with the agent.
    pub token: String,
    /// Base URL of the agent's HTTP API.
    pub agent_base_url: String,
}

const DEFAULT_AGENT_BASE_URL: &str = "http://127.0.0.1:8080";
const DEFAULT_TOKEN: &str = "1234abcd";

impl SdkConfig {
    /// Resolve configuration: environment variables win, flags from the
    /// argument vector (`-port`, `-serverId`, `-token`, `-agentBase`) fill
    /// the gaps, and sensible defaults close the rest.
    pub fn from_env_or_args(args: &[String]) -> Self {
        let mut config = Self {
            port: env::var("LOBBYD_PORT").unwrap_or_default(),
            room_id: env::var("LOBBYD_ROOM_ID").unwrap_or_default(),
            token: env::var("LOBBYD_TOKEN").unwrap_or_default(),
            agent_base_url: env::var("LOBBYD_AGENT_BASE_URL").unwrap_or_default(),
        };

        let mut iter = args.iter();
        while let Some(flag) = iter.next() {
            match flag.as_str() {
                "-port" => {
                    if config.port.is_empty() {
                        config.port = iter.next().cloned().unwrap_or_default();
                    } else {
                        iter.next();
                    }
                }
                "-serverId" => {
                    if config.room_id.is_empty() {
                        config.room_id = iter.next().cloned().unwrap_or_default();
                    } else {
                        iter.next();
                    }
                }
                "-token" => {
                    if config.token.is_empty() {
                        config.token = iter.next().cloned().unwrap_or_default();
                    } else {
                        iter.next();
                    }
                }
                "-agentBase" => {
                    if config.agent_base_url.is_empty() {
                        config.agent_base_url = iter.next().cloned().unwrap_or_default();
                    } else {
                        iter.next();
                    }
                }
                _ => {}
            }
        }

        if config.agent_base_url.is_empty() {
            config.agent_base_url = DEFAULT_AGENT_BASE_URL.to_string();
        }
        if config.token.is_empty() {
            config.token = DEFAULT_TOKEN.to_string();
        }
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(items: &[&str]) -> Vec<String> {
        items.iter().map(|item| item.to_string()).collect()
    }

    #[test]
    fn flags_fill_unset_fields() {
        let config = SdkConfig::from_env_or_args(&args(&[
            "-port", "31000", "-serverId", "r1", "-token", "secret", "-agentBase",
            "http://agent:8080",
        ]));
        assert_eq!(config.port, "31000");
        assert_eq!(config.room_id, "r1");
        assert_eq!(config.token, "secret");
        assert_eq!(config.agent_base_url, "http://agent:8080");
    }

    #[test]
    fn unknown_flags_are_ignored() {
        let config =
            SdkConfig::from_env_or_args(&args(&["-nographics", "-batchmode", "-serverId", "r1"]));
        assert_eq!(config.room_id, "r1");
    }

    #[test]
    fn defaults_apply_when_nothing_is_given() {
        let config = SdkConfig::from_env_or_args(&[]);
        assert_eq!(config.agent_base_url, DEFAULT_AGENT_BASE_URL);
        assert_eq!(config.token, DEFAULT_TOKEN);
    }
}
