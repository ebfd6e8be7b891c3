#![forbid(unsafe_code)]

pub mod config;
pub mod controller;
pub mod registry;
pub mod router;
pub mod sink;
pub mod source;
pub mod widget;

pub use config::{ConfigError, DashboardConfig, HostPairing, HostRegistry, HostSpec};
pub use controller::{DashboardController, EventSource, RunOutcome, SourceEvent, WidgetFactory};
pub use registry::{BindError, SinkKey, SinkRegistry, UnboundSink};
pub use router::{PacketRouter, RouteError};
pub use sink::{Channel, Direction, GaugeSink, ReadoutSink, SeriesSink, Sink, SinkShape, Timestamp};
pub use xdash_proto::{MetricKind, Packet};
