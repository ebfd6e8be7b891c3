use std::{collections::HashMap, num::NonZeroUsize, path::Path};

use figment::{
    Figment,
    providers::{Env, Format, Toml},
};
use serde::Deserialize;

const DEFAULT_RENDER_INTERVAL_MS: u64 = 2000;
const DEFAULT_WINDOW: usize = 300;
const PAIR: NonZeroUsize = NonZeroUsize::new(2).unwrap();

#[derive(Debug, Clone, Deserialize)]
pub struct DashboardConfig {
    /// Where the packet stream is served, e.g. `ws://127.0.0.1:8080/stats`
    #[serde(alias = "websocketUri")]
    pub websocket_uri: String,

    pub hosts: Vec<HostSpec>,

    /// How often the terminal board is redrawn
    #[serde(default = "default_render_interval_ms")]
    pub render_interval_ms: u64,

    /// Samples kept per series
    #[serde(default = "default_window")]
    pub window: usize,
}

fn default_render_interval_ms() -> u64 {
    DEFAULT_RENDER_INTERVAL_MS
}

fn default_window() -> usize {
    DEFAULT_WINDOW
}

impl DashboardConfig {
    pub fn figment(path: impl AsRef<Path>) -> Figment {
        Figment::new()
            .merge(Toml::file(path))
            .merge(Env::prefixed("XDASH_"))
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        Ok(Self::figment(path).extract()?)
    }
}

/// One monitored host. Capacities are bytes/sec (`bandwidth`) and bytes (`ram`).
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct HostSpec {
    pub hostname: String,
    pub bandwidth: Option<f64>,
    pub ram: Option<f64>,
}

impl HostSpec {
    pub fn new(hostname: impl Into<String>, bandwidth: f64, ram: f64) -> Self {
        HostSpec {
            hostname: hostname.into(),
            bandwidth: Some(bandwidth),
            ram: Some(ram),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to load config: {0}")]
    Load(#[from] figment::Error),
    #[error("no hosts configured")]
    NoHosts,
    #[error("host entry {0} has an empty hostname")]
    EmptyHostname(usize),
    #[error("host {0:?} is configured more than once")]
    DuplicateHost(String),
    #[error("host {hostname:?} has invalid {field}: {value}")]
    InvalidCapacity {
        hostname: String,
        field: &'static str,
        value: f64,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown host {0:?}")]
pub struct UnknownHost(pub String);

/// Two hosts shown side by side. `right` is absent on the last pairing of an
/// odd host list.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HostPairing<'a> {
    pub left: &'a HostSpec,
    pub right: Option<&'a HostSpec>,
}

#[derive(Debug, Clone)]
pub struct HostRegistry {
    hosts: Vec<HostSpec>,
    index: HashMap<String, usize>,
}

impl HostRegistry {
    pub fn load(config: &DashboardConfig) -> Result<Self, ConfigError> {
        Self::from_hosts(config.hosts.clone())
    }

    pub fn from_hosts(hosts: Vec<HostSpec>) -> Result<Self, ConfigError> {
        if hosts.is_empty() {
            return Err(ConfigError::NoHosts);
        }

        let mut index = HashMap::with_capacity(hosts.len());
        for (i, host) in hosts.iter().enumerate() {
            if host.hostname.is_empty() {
                return Err(ConfigError::EmptyHostname(i));
            }
            validate_capacity(host, "bandwidth", host.bandwidth)?;
            validate_capacity(host, "ram", host.ram)?;
            if index.insert(host.hostname.clone(), i).is_some() {
                return Err(ConfigError::DuplicateHost(host.hostname.clone()));
            }
        }

        Ok(HostRegistry { hosts, index })
    }

    pub fn get(&self, hostname: &str) -> Result<&HostSpec, UnknownHost> {
        self.index
            .get(hostname)
            .map(|&i| &self.hosts[i])
            .ok_or_else(|| UnknownHost(hostname.to_owned()))
    }

    pub fn all(&self) -> &[HostSpec] {
        &self.hosts
    }

    /// Consecutive groups of `size` hosts in configured order; the last group
    /// may be short.
    pub fn chunks(&self, size: NonZeroUsize) -> impl Iterator<Item = &[HostSpec]> {
        self.hosts.chunks(size.get())
    }

    pub fn pairings(&self) -> Vec<HostPairing<'_>> {
        self.chunks(PAIR)
            .map(|set| HostPairing {
                left: &set[0],
                right: set.get(1),
            })
            .collect()
    }
}

// Missing or zero capacities are accepted here and rejected when a
// percentage is derived from them.
fn validate_capacity(
    host: &HostSpec,
    field: &'static str,
    value: Option<f64>,
) -> Result<(), ConfigError> {
    match value {
        Some(value) if !value.is_finite() || value < 0.0 => Err(ConfigError::InvalidCapacity {
            hostname: host.hostname.clone(),
            field,
            value,
        }),
        _ => Ok(()),
    }
}
