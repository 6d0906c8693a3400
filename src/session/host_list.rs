use rand::seq::SliceRandom;
use rand::Rng;

use crate::ConfigurationError;
use crate::Result;

const DEFAULT_PORT: u16 = 2181;

/// Parsed ensemble connection string (`host[:port],host[:port],...`)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostList {
    raw: String,
    hosts: Vec<String>,
}

impl HostList {
    pub fn parse(raw: &str) -> Result<Self> {
        let invalid = |reason: String| -> Result<Self> {
            Err(ConfigurationError::InvalidHostList {
                hosts: raw.to_string(),
                reason,
            }
            .into())
        };

        if raw.trim().is_empty() {
            return invalid("host list is empty".into());
        }

        let mut hosts = Vec::new();
        for entry in raw.split(',') {
            let entry = entry.trim();
            if entry.is_empty() {
                return invalid("empty host entry".into());
            }
            let (host, port) = match entry.rsplit_once(':') {
                Some((host, port)) => match port.parse::<u16>() {
                    Ok(port) if port != 0 => (host, port),
                    _ => return invalid(format!("invalid port in <{entry}>")),
                },
                None => (entry, DEFAULT_PORT),
            };
            if host.is_empty() {
                return invalid(format!("missing host name in <{entry}>"));
            }
            hosts.push(format!("{host}:{port}"));
        }

        Ok(Self {
            raw: raw.to_string(),
            hosts,
        })
    }

    /// The connection string as configured.
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Normalized `host:port` entries in listed order.
    pub fn hosts(&self) -> &[String] {
        &self.hosts
    }

    /// Order in which servers are tried: listed order when deterministic,
    /// otherwise shuffled to spread clients across the ensemble.
    pub fn ordered(
        &self,
        deterministic: bool,
    ) -> Vec<String> {
        self.ordered_with(deterministic, &mut rand::thread_rng())
    }

    pub fn ordered_with<R: Rng + ?Sized>(
        &self,
        deterministic: bool,
        rng: &mut R,
    ) -> Vec<String> {
        let mut hosts = self.hosts.clone();
        if !deterministic {
            hosts.shuffle(rng);
        }
        hosts
    }
}
