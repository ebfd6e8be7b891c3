use log::{debug, info, log};
use tokio_util::sync::CancellationToken;
use xdash_proto::MetricKind;

use crate::{
    config::{ConfigError, DashboardConfig, HostRegistry, HostSpec},
    registry::{BindError, SinkRegistry},
    router::{PacketRouter, RouteError},
    sink::{Channel, Direction, GaugeSink, ReadoutSink, SeriesSink, Sink, SinkShape, now_millis},
};

#[derive(Debug, Clone, PartialEq)]
pub enum SourceEvent {
    Open,
    Message(String),
}

/// Ordered stream of raw payloads. `Ok(None)` means the source has closed.
pub trait EventSource {
    fn next_event(&mut self) -> impl Future<Output = anyhow::Result<Option<SourceEvent>>>;

    fn close(&mut self) -> impl Future<Output = ()>;
}

/// Builds the rendering widgets a host's channels are bound to.
pub trait WidgetFactory {
    fn series(&mut self, host: &HostSpec, channel: Channel) -> Box<dyn SeriesSink>;

    fn gauge(&mut self, host: &HostSpec, channel: Channel) -> Box<dyn GaugeSink>;

    fn readout(&mut self, _host: &HostSpec, _direction: Direction) -> Option<Box<dyn ReadoutSink>> {
        None
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// The source reached its end
    Closed,
    /// Shutdown was requested
    Shutdown,
}

pub struct DashboardController {
    config: DashboardConfig,
    router: PacketRouter,
}

impl DashboardController {
    pub fn new(config: DashboardConfig) -> Result<Self, ConfigError> {
        let hosts = HostRegistry::load(&config)?;
        debug!("loaded {} hosts", hosts.all().len());

        Ok(DashboardController {
            config,
            router: PacketRouter::new(hosts, SinkRegistry::new()),
        })
    }

    pub fn config(&self) -> &DashboardConfig {
        &self.config
    }

    pub fn hosts(&self) -> &HostRegistry {
        self.router.hosts()
    }

    /// Binds a widget for every channel of every configured host.
    pub fn bind_widgets<F: WidgetFactory>(&mut self, factory: &mut F) -> Result<(), BindError> {
        let hosts = self.router.hosts().all().to_vec();
        let sinks = self.router.sinks_mut();

        for host in &hosts {
            for kind in MetricKind::ALL {
                for &channel in Channel::of(kind) {
                    let sink = match channel.shape() {
                        SinkShape::Series => Sink::Series(factory.series(host, channel)),
                        SinkShape::Gauge => Sink::Gauge(factory.gauge(host, channel)),
                    };
                    sinks.bind(&host.hostname, kind, channel, sink)?;
                }
            }
            for direction in [Direction::Sent, Direction::Recv] {
                if let Some(readout) = factory.readout(host, direction) {
                    sinks.bind_readout(&host.hostname, direction, readout);
                }
            }
        }

        info!("bound {} sinks for {} hosts", sinks.len(), hosts.len());
        Ok(())
    }

    /// Stamps and routes one raw payload. Errors are logged here and returned
    /// for inspection; they never stop the event loop.
    pub fn handle_message(&mut self, raw: &str) -> Result<(), RouteError> {
        let res = self.router.route_raw(raw, now_millis());
        if let Err(e) = &res {
            log!(e.level(), "dropping packet: {e}");
        }
        res
    }

    pub async fn run<S: EventSource>(
        &mut self,
        source: &mut S,
        shutdown: &CancellationToken,
    ) -> anyhow::Result<RunOutcome> {
        let outcome = loop {
            tokio::select! {
                event = source.next_event() => match event {
                    Ok(Some(SourceEvent::Open)) => {
                        info!("Connected to {}", self.config.websocket_uri);
                    }
                    Ok(Some(SourceEvent::Message(raw))) => {
                        let _ = self.handle_message(&raw);
                    }
                    Ok(None) => break Ok(RunOutcome::Closed),
                    Err(e) => break Err(e),
                },
                _ = shutdown.cancelled() => break Ok(RunOutcome::Shutdown),
            }
        };

        source.close().await;
        outcome
    }
}
