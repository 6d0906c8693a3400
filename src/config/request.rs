use std::time::Duration;

use serde::Deserialize;
use serde::Serialize;

use crate::ConfigurationError;
use crate::Result;

/// Bounds applied to each node request
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct RequestConfig {
    /// Maximum time a caller blocks on one pending request
    /// Default: 10 seconds
    #[serde(default = "default_timeout_in_ms")]
    pub timeout_in_ms: u64,
}

fn default_timeout_in_ms() -> u64 {
    10_000
}

impl Default for RequestConfig {
    fn default() -> Self {
        Self {
            timeout_in_ms: default_timeout_in_ms(),
        }
    }
}

impl RequestConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_in_ms)
    }

    pub fn validate(&self) -> Result<()> {
        if self.timeout_in_ms == 0 {
            return Err(ConfigurationError::InvalidSetting("request timeout_in_ms must be greater than 0".into()).into());
        }
        Ok(())
    }
}
