use std::{cell::RefCell, fmt, rc::Rc};

use time::OffsetDateTime;
use xdash_proto::MetricKind;

/// Milliseconds since the Unix epoch.
pub type Timestamp = i64;

pub fn now_millis() -> Timestamp {
    (OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000) as Timestamp
}

pub trait SeriesSink {
    fn append(&mut self, timestamp: Timestamp, value: f64);
}

pub trait GaugeSink {
    fn update(&mut self, value: f64);
}

/// Text readout next to a chart, fed with already rounded values.
pub trait ReadoutSink {
    fn show(&mut self, value: f64);
}

impl<T: SeriesSink + ?Sized> SeriesSink for Rc<RefCell<T>> {
    fn append(&mut self, timestamp: Timestamp, value: f64) {
        self.borrow_mut().append(timestamp, value);
    }
}

impl<T: GaugeSink + ?Sized> GaugeSink for Rc<RefCell<T>> {
    fn update(&mut self, value: f64) {
        self.borrow_mut().update(value);
    }
}

impl<T: ReadoutSink + ?Sized> ReadoutSink for Rc<RefCell<T>> {
    fn show(&mut self, value: f64) {
        self.borrow_mut().show(value);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkShape {
    Series,
    Gauge,
}

pub enum Sink {
    Series(Box<dyn SeriesSink>),
    Gauge(Box<dyn GaugeSink>),
}

impl Sink {
    pub fn series(sink: impl SeriesSink + 'static) -> Self {
        Sink::Series(Box::new(sink))
    }

    pub fn gauge(sink: impl GaugeSink + 'static) -> Self {
        Sink::Gauge(Box::new(sink))
    }

    pub fn shape(&self) -> SinkShape {
        match self {
            Sink::Series(_) => SinkShape::Series,
            Sink::Gauge(_) => SinkShape::Gauge,
        }
    }
}

impl fmt::Debug for Sink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Sink::{:?}", self.shape())
    }
}

/// One derived stream within a metric kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Channel {
    SentBytesPerSec,
    RecvBytesPerSec,
    SentPctCapacity,
    RecvPctCapacity,
    UsedBytes,
    AverageLoad,
}

const NETWORK_CHANNELS: &[Channel] = &[
    Channel::SentBytesPerSec,
    Channel::RecvBytesPerSec,
    Channel::SentPctCapacity,
    Channel::RecvPctCapacity,
];
const MEMORY_CHANNELS: &[Channel] = &[Channel::UsedBytes];
const CPU_CHANNELS: &[Channel] = &[Channel::AverageLoad];

impl Channel {
    /// Channels produced by `kind`, in the order the router writes them.
    pub fn of(kind: MetricKind) -> &'static [Channel] {
        match kind {
            MetricKind::Network => NETWORK_CHANNELS,
            MetricKind::Memory => MEMORY_CHANNELS,
            MetricKind::Cpu => CPU_CHANNELS,
        }
    }

    pub fn kind(&self) -> MetricKind {
        match self {
            Channel::SentBytesPerSec
            | Channel::RecvBytesPerSec
            | Channel::SentPctCapacity
            | Channel::RecvPctCapacity => MetricKind::Network,
            Channel::UsedBytes => MetricKind::Memory,
            Channel::AverageLoad => MetricKind::Cpu,
        }
    }

    pub fn shape(&self) -> SinkShape {
        match self.kind() {
            MetricKind::Network => SinkShape::Series,
            MetricKind::Memory | MetricKind::Cpu => SinkShape::Gauge,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::SentBytesPerSec => "sent-bytes-per-sec",
            Channel::RecvBytesPerSec => "recv-bytes-per-sec",
            Channel::SentPctCapacity => "sent-pct-capacity",
            Channel::RecvPctCapacity => "recv-pct-capacity",
            Channel::UsedBytes => "used-bytes",
            Channel::AverageLoad => "average-load",
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Traffic direction of a network readout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Sent,
    Recv,
}
