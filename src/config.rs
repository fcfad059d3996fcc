use lazy_static::lazy_static;
use regex::Regex;
use std::env;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

use crate::tasks::live_results::{RefreshMode, DEFAULT_INTERVAL};

const DEFAULT_NOTIFY_CHANNEL: &str = "vote_inserts";
const DEFAULT_MAX_CONNECTIONS: u32 = 5;

lazy_static! {
    // LISTEN/NOTIFY channel names are spliced into SQL.
    static ref CHANNEL_NAME: Regex = Regex::new(r"^[a-z_][a-z0-9_]{0,62}$").unwrap();
}

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),
    #[error("{key}={value} is invalid: {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: &'static str,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub database_url: String,
    pub poll_id: Uuid,
    pub refresh: RefreshMode,
    pub notify_channel: String,
    pub max_connections: u32,
    pub init_schema: bool,
    pub json_output: bool,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let database_url = lookup("DATABASE_URL").ok_or(ConfigError::Missing("DATABASE_URL"))?;

        let raw_poll_id =
            lookup("SUFFRAGIUM_POLL_ID").ok_or(ConfigError::Missing("SUFFRAGIUM_POLL_ID"))?;
        let poll_id = Uuid::parse_str(raw_poll_id.trim()).map_err(|_| ConfigError::Invalid {
            key: "SUFFRAGIUM_POLL_ID",
            value: raw_poll_id.clone(),
            reason: "expected a UUID",
        })?;

        let interval = match lookup("SUFFRAGIUM_INTERVAL_SECS") {
            Some(raw) => match raw.trim().parse::<u64>() {
                Ok(secs) if secs > 0 => Duration::from_secs(secs),
                _ => {
                    return Err(ConfigError::Invalid {
                        key: "SUFFRAGIUM_INTERVAL_SECS",
                        value: raw,
                        reason: "expected a positive number of seconds",
                    });
                }
            },
            None => DEFAULT_INTERVAL,
        };

        let refresh = match lookup("SUFFRAGIUM_REFRESH").as_deref().map(str::trim) {
            None | Some("push") => RefreshMode::Push,
            Some("interval") => RefreshMode::Interval(interval),
            Some(other) => {
                return Err(ConfigError::Invalid {
                    key: "SUFFRAGIUM_REFRESH",
                    value: other.to_string(),
                    reason: "expected 'push' or 'interval'",
                });
            }
        };

        let notify_channel =
            lookup("SUFFRAGIUM_NOTIFY_CHANNEL").unwrap_or_else(|| DEFAULT_NOTIFY_CHANNEL.to_string());
        if !CHANNEL_NAME.is_match(&notify_channel) {
            return Err(ConfigError::Invalid {
                key: "SUFFRAGIUM_NOTIFY_CHANNEL",
                value: notify_channel,
                reason: "expected a lower-case SQL identifier",
            });
        }

        let max_connections = match lookup("SUFFRAGIUM_MAX_CONNECTIONS") {
            Some(raw) => match raw.trim().parse::<u32>() {
                Ok(n) if n > 0 => n,
                _ => {
                    return Err(ConfigError::Invalid {
                        key: "SUFFRAGIUM_MAX_CONNECTIONS",
                        value: raw,
                        reason: "expected a positive integer",
                    });
                }
            },
            None => DEFAULT_MAX_CONNECTIONS,
        };

        Ok(Self {
            database_url,
            poll_id,
            refresh,
            notify_channel,
            max_connections,
            init_schema: flag(&lookup, "SUFFRAGIUM_INIT_SCHEMA")?,
            json_output: flag(&lookup, "SUFFRAGIUM_JSON")?,
        })
    }
}

fn flag<F>(lookup: &F, key: &'static str) -> Result<bool, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(key).as_deref().map(str::trim) {
        None | Some("") | Some("0") | Some("false") => Ok(false),
        Some("1") | Some("true") => Ok(true),
        Some(other) => Err(ConfigError::Invalid {
            key,
            value: other.to_string(),
            reason: "expected true or false",
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    const POLL: &str = "6f1c2a3e-8b0d-4c55-9a1e-2d7f00c0ffee";

    fn config(pairs: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults() {
        let config = config(&[("DATABASE_URL", "postgres://localhost/suffragium"), ("SUFFRAGIUM_POLL_ID", POLL)])
            .unwrap();
        assert_eq!(config.poll_id, Uuid::parse_str(POLL).unwrap());
        assert_eq!(config.refresh, RefreshMode::Push);
        assert_eq!(config.notify_channel, "vote_inserts");
        assert_eq!(config.max_connections, 5);
        assert!(!config.init_schema);
        assert!(!config.json_output);
    }

    #[test]
    fn interval_mode_uses_configured_period() {
        let config = config(&[
            ("DATABASE_URL", "postgres://localhost/suffragium"),
            ("SUFFRAGIUM_POLL_ID", POLL),
            ("SUFFRAGIUM_REFRESH", "interval"),
            ("SUFFRAGIUM_INTERVAL_SECS", "12"),
            ("SUFFRAGIUM_JSON", "true"),
        ])
        .unwrap();
        assert_eq!(config.refresh, RefreshMode::Interval(Duration::from_secs(12)));
        assert!(config.json_output);
    }

    #[test]
    fn rejects_bad_values() {
        assert_eq!(
            config(&[("SUFFRAGIUM_POLL_ID", POLL)]),
            Err(ConfigError::Missing("DATABASE_URL"))
        );

        let base = [("DATABASE_URL", "postgres://x"), ("SUFFRAGIUM_POLL_ID", POLL)];
        for (key, value) in [
            ("SUFFRAGIUM_POLL_ID", "42"),
            ("SUFFRAGIUM_REFRESH", "sometimes"),
            ("SUFFRAGIUM_INTERVAL_SECS", "0"),
            ("SUFFRAGIUM_NOTIFY_CHANNEL", "votes; DROP TABLE votes"),
            ("SUFFRAGIUM_MAX_CONNECTIONS", "-1"),
            ("SUFFRAGIUM_INIT_SCHEMA", "maybe"),
        ] {
            let mut pairs: Vec<(&str, &str)> = base.iter().filter(|(k, _)| *k != key).copied().collect();
            pairs.push((key, value));
            match config(&pairs) {
                Err(ConfigError::Invalid { key: bad, .. }) => assert_eq!(bad, key),
                other => panic!("{}={} was accepted: {:?}", key, value, other),
            }
        }
    }
}
