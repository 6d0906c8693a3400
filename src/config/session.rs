use std::time::Duration;

use serde::Deserialize;
use serde::Serialize;

use crate::ConfigurationError;
use crate::HostList;
use crate::Result;

/// Session-level settings: which ensemble to talk to and how long to wait
///
/// ```toml
/// [session]
/// hosts = "zk1:2181,zk2:2181,zk3:2181"
/// connection_timeout_in_secs = 5
/// expiration_timeout_in_ms = 30000
/// deterministic_connection_order = false
/// ```
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct SessionConfig {
    /// Comma separated `host[:port]` list of ensemble members
    #[serde(default = "default_hosts")]
    pub hosts: String,

    /// Upper bound for the startup "wait until connected" primitive
    ///
    /// Range: 1-3600
    /// Default: 5
    #[serde(default = "default_connection_timeout_in_secs")]
    pub connection_timeout_in_secs: u64,

    /// Session expiration negotiated with the ensemble
    ///
    /// Range: 1000-3600000
    /// Default: 30000
    #[serde(default = "default_expiration_timeout_in_ms")]
    pub expiration_timeout_in_ms: u64,

    /// Try servers in listed order instead of a randomized order
    ///
    /// Randomized order spreads clients across the ensemble.
    #[serde(default)]
    pub deterministic_connection_order: bool,
}

fn default_hosts() -> String {
    "127.0.0.1:2181".to_string()
}

fn default_connection_timeout_in_secs() -> u64 {
    5
}

fn default_expiration_timeout_in_ms() -> u64 {
    30_000
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            hosts: default_hosts(),
            connection_timeout_in_secs: default_connection_timeout_in_secs(),
            expiration_timeout_in_ms: default_expiration_timeout_in_ms(),
            deterministic_connection_order: false,
        }
    }
}

impl SessionConfig {
    pub fn connection_timeout(&self) -> Duration {
        Duration::from_secs(self.connection_timeout_in_secs)
    }

    pub fn expiration_timeout(&self) -> Duration {
        Duration::from_millis(self.expiration_timeout_in_ms)
    }

    pub fn validate(&self) -> Result<()> {
        HostList::parse(&self.hosts)?;

        if !(1..=3600).contains(&self.connection_timeout_in_secs) {
            return Err(ConfigurationError::InvalidSetting(format!(
                "connection_timeout_in_secs must be between 1 and 3600, got {}",
                self.connection_timeout_in_secs
            ))
            .into());
        }

        if !(1000..=3_600_000).contains(&self.expiration_timeout_in_ms) {
            return Err(ConfigurationError::InvalidSetting(format!(
                "expiration_timeout_in_ms must be between 1000 and 3600000, got {}",
                self.expiration_timeout_in_ms
            ))
            .into());
        }

        Ok(())
    }
}
