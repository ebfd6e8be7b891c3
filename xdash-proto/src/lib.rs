use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

pub mod packet;

pub use packet::{DecodeError, Packet};

/// Raw field names carried in `Packet::data`.
pub mod field {
    pub const BYTES_SENT: &str = "bytes-sent";
    pub const BYTES_RECV: &str = "bytes-recv";
    pub const PHYSICAL_PERCENT: &str = "physical-percent";
    pub const AVG: &str = "avg";
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricKind {
    Network,
    Memory,
    Cpu,
}

impl MetricKind {
    pub const ALL: [MetricKind; 3] = [MetricKind::Network, MetricKind::Memory, MetricKind::Cpu];

    pub fn as_str(&self) -> &'static str {
        match self {
            MetricKind::Network => "network",
            MetricKind::Memory => "memory",
            MetricKind::Cpu => "cpu",
        }
    }
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown metric kind {0:?}")]
pub struct UnknownMetricKind(pub String);

impl FromStr for MetricKind {
    type Err = UnknownMetricKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "network" => Ok(MetricKind::Network),
            "memory" => Ok(MetricKind::Memory),
            "cpu" => Ok(MetricKind::Cpu),
            other => Err(UnknownMetricKind(other.to_owned())),
        }
    }
}
