use std::{collections::HashMap, fmt};

use log::debug;
use xdash_proto::MetricKind;

use crate::sink::{Channel, Direction, ReadoutSink, Sink, SinkShape, Timestamp};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SinkKey {
    pub hostname: String,
    pub kind: MetricKind,
    pub channel: Channel,
}

impl SinkKey {
    pub fn new(hostname: &str, kind: MetricKind, channel: Channel) -> Self {
        SinkKey {
            hostname: hostname.to_owned(),
            kind,
            channel,
        }
    }
}

impl fmt::Display for SinkKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.hostname, self.kind, self.channel)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum BindError {
    #[error("channel {channel} does not belong to metric kind {kind}")]
    KindMismatch { kind: MetricKind, channel: Channel },
    #[error("channel {channel} expects a {expected:?} sink, got {got:?}")]
    ShapeMismatch {
        channel: Channel,
        expected: SinkShape,
        got: SinkShape,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("no sink bound for {0}")]
pub struct UnboundSink(pub SinkKey);

/// Destination sinks keyed by `(hostname, kind, channel)`, plus the optional
/// per-host text readouts.
#[derive(Default)]
pub struct SinkRegistry {
    sinks: HashMap<SinkKey, Sink>,
    readouts: HashMap<(String, Direction), Box<dyn ReadoutSink>>,
}

impl SinkRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bind(
        &mut self,
        hostname: &str,
        kind: MetricKind,
        channel: Channel,
        sink: Sink,
    ) -> Result<(), BindError> {
        if channel.kind() != kind {
            return Err(BindError::KindMismatch { kind, channel });
        }
        if channel.shape() != sink.shape() {
            return Err(BindError::ShapeMismatch {
                channel,
                expected: channel.shape(),
                got: sink.shape(),
            });
        }

        let key = SinkKey::new(hostname, kind, channel);
        debug!("binding {key}");
        if self.sinks.insert(key, sink).is_some() {
            debug!("replaced previous sink for {hostname}/{kind}/{channel}");
        }
        Ok(())
    }

    pub fn bind_readout(
        &mut self,
        hostname: &str,
        direction: Direction,
        sink: Box<dyn ReadoutSink>,
    ) {
        self.readouts.insert((hostname.to_owned(), direction), sink);
    }

    pub fn resolve(
        &mut self,
        hostname: &str,
        kind: MetricKind,
        channel: Channel,
    ) -> Result<&mut Sink, UnboundSink> {
        let key = SinkKey::new(hostname, kind, channel);
        match self.sinks.get_mut(&key) {
            Some(sink) => Ok(sink),
            None => Err(UnboundSink(key)),
        }
    }

    pub fn append(
        &mut self,
        hostname: &str,
        channel: Channel,
        timestamp: Timestamp,
        value: f64,
    ) -> Result<(), UnboundSink> {
        match self.resolve(hostname, channel.kind(), channel)? {
            Sink::Series(series) => {
                series.append(timestamp, value);
                Ok(())
            }
            Sink::Gauge(_) => Err(UnboundSink(SinkKey::new(hostname, channel.kind(), channel))),
        }
    }

    pub fn update(
        &mut self,
        hostname: &str,
        channel: Channel,
        value: f64,
    ) -> Result<(), UnboundSink> {
        match self.resolve(hostname, channel.kind(), channel)? {
            Sink::Gauge(gauge) => {
                gauge.update(value);
                Ok(())
            }
            Sink::Series(_) => Err(UnboundSink(SinkKey::new(hostname, channel.kind(), channel))),
        }
    }

    /// Readouts are optional; returns whether one was bound.
    pub fn show(&mut self, hostname: &str, direction: Direction, value: f64) -> bool {
        match self.readouts.get_mut(&(hostname.to_owned(), direction)) {
            Some(readout) => {
                readout.show(value);
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use std::{cell::RefCell, rc::Rc};

    use super::*;
    use crate::sink::{GaugeSink, SeriesSink};

    #[derive(Default)]
    struct Recorder(Vec<f64>);

    impl SeriesSink for Recorder {
        fn append(&mut self, _: Timestamp, value: f64) {
            self.0.push(value);
        }
    }

    impl GaugeSink for Recorder {
        fn update(&mut self, value: f64) {
            self.0.push(value);
        }
    }

    #[test]
    fn bind_and_resolve() {
        let mut registry = SinkRegistry::new();
        let recorder = Rc::new(RefCell::new(Recorder::default()));
        registry
            .bind(
                "h1",
                MetricKind::Cpu,
                Channel::AverageLoad,
                Sink::gauge(recorder.clone()),
            )
            .unwrap();

        registry.update("h1", Channel::AverageLoad, 1.5).unwrap();

        assert_eq!(recorder.borrow().0, vec![1.5]);
        assert_eq!(
            registry.update("h2", Channel::AverageLoad, 1.0),
            Err(UnboundSink(SinkKey::new(
                "h2",
                MetricKind::Cpu,
                Channel::AverageLoad
            )))
        );
    }

    #[test]
    fn rebinding_replaces_sink() {
        let mut registry = SinkRegistry::new();
        let first = Rc::new(RefCell::new(Recorder::default()));
        let second = Rc::new(RefCell::new(Recorder::default()));
        for sink in [&first, &second] {
            registry
                .bind(
                    "h1",
                    MetricKind::Network,
                    Channel::SentBytesPerSec,
                    Sink::series(sink.clone()),
                )
                .unwrap();
        }

        registry.append("h1", Channel::SentBytesPerSec, 0, 2.0).unwrap();

        assert!(first.borrow().0.is_empty());
        assert_eq!(second.borrow().0, vec![2.0]);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn reject_mismatched_bindings() {
        let mut registry = SinkRegistry::new();

        let wrong_kind = registry.bind(
            "h1",
            MetricKind::Memory,
            Channel::AverageLoad,
            Sink::gauge(Recorder::default()),
        );
        assert!(matches!(wrong_kind, Err(BindError::KindMismatch { .. })));

        let wrong_shape = registry.bind(
            "h1",
            MetricKind::Memory,
            Channel::UsedBytes,
            Sink::series(Recorder::default()),
        );
        assert!(matches!(
            wrong_shape,
            Err(BindError::ShapeMismatch {
                expected: SinkShape::Gauge,
                ..
            })
        ));
        assert!(registry.is_empty());
    }

    #[test]
    fn readouts_are_optional() {
        struct Text(Rc<RefCell<Option<f64>>>);
        impl ReadoutSink for Text {
            fn show(&mut self, value: f64) {
                *self.0.borrow_mut() = Some(value);
            }
        }

        let mut registry = SinkRegistry::new();
        let shown = Rc::new(RefCell::new(None));
        registry.bind_readout("h1", Direction::Sent, Box::new(Text(shown.clone())));

        assert!(registry.show("h1", Direction::Sent, 2.5));
        assert!(!registry.show("h1", Direction::Recv, 2.5));
        assert_eq!(*shown.borrow(), Some(2.5));
    }
}
