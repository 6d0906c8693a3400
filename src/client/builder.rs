use std::sync::Arc;
use std::time::Duration;

use super::Client;
use crate::transport::CoordinationTransport;
use crate::ClientConfig;
use crate::Result;

pub struct ClientBuilder {
    pub(super) config: ClientConfig,
}

impl ClientBuilder {
    /// Create a new builder with default config for the given ensemble
    /// (`host[:port],host[:port],...`)
    pub fn new(hosts: impl Into<String>) -> Self {
        let mut config = ClientConfig::default();
        config.session.hosts = hosts.into();
        Self { config }
    }

    /// Bound for the startup wait until connected (default: 5s)
    ///
    /// Kept in whole seconds; a partial second is rounded up, so 500ms
    /// becomes 1s and 1.9s becomes 2s.
    pub fn connection_timeout(
        mut self,
        timeout: Duration,
    ) -> Self {
        let partial = u64::from(timeout.subsec_nanos() > 0);
        self.config.session.connection_timeout_in_secs = timeout.as_secs().saturating_add(partial);
        self
    }

    /// Session expiration negotiated with the ensemble (default: 30s)
    pub fn expiration_timeout(
        mut self,
        timeout: Duration,
    ) -> Self {
        self.config.session.expiration_timeout_in_ms = saturating_millis(timeout);
        self
    }

    /// Try servers in the listed order (default: randomized)
    pub fn deterministic_connection_order(
        mut self,
        enable: bool,
    ) -> Self {
        self.config.session.deterministic_connection_order = enable;
        self
    }

    /// Bound for each node request (default: 10s)
    pub fn request_timeout(
        mut self,
        timeout: Duration,
    ) -> Self {
        self.config.request.timeout_in_ms = saturating_millis(timeout);
        self
    }

    /// Completely replaces the configuration, host list included
    ///
    /// # Warning: Configuration Override
    /// This discards all previous settings made through individual methods
    /// like [`connection_timeout`](ClientBuilder::connection_timeout) or
    /// [`request_timeout`](ClientBuilder::request_timeout).
    ///
    /// # Example: Full Configuration
    /// ```ignore
    /// use zk_coordinator::{ClientBuilder, ClientConfig};
    ///
    /// let config = ClientConfig::new()?.validate()?;
    /// let builder = ClientBuilder::new("zk1:2181").set_config(config);
    /// ```
    pub fn set_config(
        mut self,
        config: ClientConfig,
    ) -> Self {
        self.config = config;
        self
    }

    /// Validates the configuration and builds an uninitialized client
    pub fn build(
        self,
        transport: Arc<dyn CoordinationTransport>,
    ) -> Result<Client> {
        Client::new(self.config, transport)
    }
}

fn saturating_millis(timeout: Duration) -> u64 {
    u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX)
}
