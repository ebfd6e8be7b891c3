use log::Level;
use xdash_proto::{DecodeError, MetricKind, Packet, UnknownMetricKind, field};

use crate::{
    config::{HostRegistry, HostSpec, UnknownHost},
    registry::{SinkRegistry, UnboundSink},
    sink::{Channel, Direction, Timestamp},
};

const KIB: f64 = 1024.0;
const READOUT_DECIMALS: i32 = 2;

#[derive(Debug, thiserror::Error)]
pub enum RouteError {
    #[error(transparent)]
    Malformed(#[from] DecodeError),
    #[error(transparent)]
    UnknownHost(#[from] UnknownHost),
    #[error(transparent)]
    UnknownMetricKind(#[from] UnknownMetricKind),
    #[error("{kind} packet from {host:?} is missing numeric field {field:?}")]
    MissingField {
        host: String,
        kind: MetricKind,
        field: &'static str,
    },
    #[error(transparent)]
    UnboundSink(#[from] UnboundSink),
    #[error("cannot derive {channel} for {host:?}: {capacity} is missing or zero")]
    DerivedMetric {
        host: String,
        channel: Channel,
        capacity: &'static str,
    },
}

impl RouteError {
    /// An unbound sink means hosts and widgets went out of sync at startup.
    pub fn level(&self) -> Level {
        match self {
            RouteError::UnboundSink(_) => Level::Error,
            _ => Level::Warn,
        }
    }
}

/// Turns packets into sink mutations. Holds no state of its own between
/// packets besides the two registries.
pub struct PacketRouter {
    hosts: HostRegistry,
    sinks: SinkRegistry,
}

impl PacketRouter {
    pub fn new(hosts: HostRegistry, sinks: SinkRegistry) -> Self {
        PacketRouter { hosts, sinks }
    }

    pub fn hosts(&self) -> &HostRegistry {
        &self.hosts
    }

    pub fn sinks_mut(&mut self) -> &mut SinkRegistry {
        &mut self.sinks
    }

    pub fn route_raw(&mut self, raw: &str, received_at: Timestamp) -> Result<(), RouteError> {
        let packet = Packet::from_json(raw)?;
        self.route(&packet, received_at)
    }

    pub fn route(&mut self, packet: &Packet, received_at: Timestamp) -> Result<(), RouteError> {
        let PacketRouter { hosts, sinks } = self;
        let host = hosts.get(&packet.host)?;

        match packet.kind()? {
            MetricKind::Network => route_network(host, packet, sinks, received_at),
            MetricKind::Memory => route_memory(host, packet, sinks),
            MetricKind::Cpu => route_cpu(host, packet, sinks),
        }
    }
}

fn route_network(
    host: &HostSpec,
    packet: &Packet,
    sinks: &mut SinkRegistry,
    received_at: Timestamp,
) -> Result<(), RouteError> {
    let name = host.hostname.as_str();
    let sent = required(host, packet, MetricKind::Network, field::BYTES_SENT)?;
    let recv = required(host, packet, MetricKind::Network, field::BYTES_RECV)?;

    let (sent_kb, recv_kb) = (sent / KIB, recv / KIB);
    sinks.append(name, Channel::SentBytesPerSec, received_at, sent_kb)?;
    sinks.append(name, Channel::RecvBytesPerSec, received_at, recv_kb)?;
    sinks.show(name, Direction::Sent, round_to_decimals(sent_kb, READOUT_DECIMALS));
    sinks.show(name, Direction::Recv, round_to_decimals(recv_kb, READOUT_DECIMALS));

    let bandwidth = capacity(host, Channel::SentPctCapacity, "bandwidth", host.bandwidth)?;
    sinks.append(name, Channel::SentPctCapacity, received_at, sent / bandwidth * 100.0)?;
    sinks.append(name, Channel::RecvPctCapacity, received_at, recv / bandwidth * 100.0)?;
    Ok(())
}

fn route_memory(
    host: &HostSpec,
    packet: &Packet,
    sinks: &mut SinkRegistry,
) -> Result<(), RouteError> {
    let physical_percent = required(host, packet, MetricKind::Memory, field::PHYSICAL_PERCENT)?;
    let ram = capacity(host, Channel::UsedBytes, "ram", host.ram)?;

    let used_bytes = (ram * physical_percent / 100.0).round();
    sinks.update(&host.hostname, Channel::UsedBytes, used_bytes)?;
    Ok(())
}

fn route_cpu(host: &HostSpec, packet: &Packet, sinks: &mut SinkRegistry) -> Result<(), RouteError> {
    let avg = required(host, packet, MetricKind::Cpu, field::AVG)?;
    sinks.update(&host.hostname, Channel::AverageLoad, avg)?;
    Ok(())
}

fn required(
    host: &HostSpec,
    packet: &Packet,
    kind: MetricKind,
    field: &'static str,
) -> Result<f64, RouteError> {
    packet.field(field).ok_or_else(|| RouteError::MissingField {
        host: host.hostname.clone(),
        kind,
        field,
    })
}

fn capacity(
    host: &HostSpec,
    channel: Channel,
    name: &'static str,
    value: Option<f64>,
) -> Result<f64, RouteError> {
    match value {
        Some(value) if value > 0.0 => Ok(value),
        _ => Err(RouteError::DerivedMetric {
            host: host.hostname.clone(),
            channel,
            capacity: name,
        }),
    }
}

/// Rounds half away from zero at `decimals` places.
pub fn round_to_decimals(value: f64, decimals: i32) -> f64 {
    let multiplier = 10f64.powi(decimals);
    (value * multiplier).round() / multiplier
}
