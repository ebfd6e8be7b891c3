use std::{
    cell::RefCell,
    collections::{HashMap, VecDeque},
    fmt::Write,
    rc::Rc,
    time::Duration,
};

use log::info;

use crate::{
    config::{HostRegistry, HostSpec},
    controller::WidgetFactory,
    sink::{Channel, Direction, GaugeSink, ReadoutSink, SeriesSink, Timestamp},
};

const DEFAULT_GAUGE_MAX: f64 = 100.0;

/// Bounded window of the most recent samples.
#[derive(Debug, Clone)]
pub struct RollingSeries {
    samples: VecDeque<(Timestamp, f64)>,
    capacity: usize,
}

impl RollingSeries {
    pub fn new(capacity: usize) -> Self {
        RollingSeries {
            samples: VecDeque::with_capacity(capacity),
            capacity: capacity.max(1),
        }
    }

    pub fn latest(&self) -> Option<f64> {
        self.samples.back().map(|&(_, value)| value)
    }

    pub fn peak(&self) -> Option<f64> {
        self.samples.iter().map(|&(_, value)| value).reduce(f64::max)
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

impl SeriesSink for RollingSeries {
    fn append(&mut self, timestamp: Timestamp, value: f64) {
        if self.samples.len() == self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back((timestamp, value));
    }
}

#[derive(Debug, Clone)]
pub struct Gauge {
    pub label: &'static str,
    pub max: f64,
    pub value: f64,
}

impl GaugeSink for Gauge {
    fn update(&mut self, value: f64) {
        self.value = value;
    }
}

#[derive(Debug, Clone, Default)]
pub struct Readout {
    pub value: Option<f64>,
}

impl ReadoutSink for Readout {
    fn show(&mut self, value: f64) {
        self.value = Some(value);
    }
}

#[derive(Default)]
struct HostWidgets {
    series: HashMap<Channel, Rc<RefCell<RollingSeries>>>,
    gauges: HashMap<Channel, Rc<RefCell<Gauge>>>,
    readouts: HashMap<Direction, Rc<RefCell<Readout>>>,
}

impl HostWidgets {
    fn latest(&self, channel: Channel) -> Option<f64> {
        self.series.get(&channel)?.borrow().latest()
    }

    fn gauge(&self, channel: Channel) -> Option<Gauge> {
        self.gauges.get(&channel).map(|gauge| gauge.borrow().clone())
    }

    fn readout(&self, direction: Direction) -> Option<f64> {
        self.readouts.get(&direction)?.borrow().value
    }
}

/// Text dashboard: keeps a handle on every widget it hands out and renders
/// one block per host pairing.
pub struct TerminalBoard {
    window: usize,
    layout: Vec<(String, Option<String>)>,
    widgets: HashMap<String, HostWidgets>,
}

impl TerminalBoard {
    pub fn new(hosts: &HostRegistry, window: usize) -> Self {
        let layout = hosts
            .pairings()
            .into_iter()
            .map(|pair| {
                (
                    pair.left.hostname.clone(),
                    pair.right.map(|right| right.hostname.clone()),
                )
            })
            .collect();

        TerminalBoard {
            window,
            layout,
            widgets: HashMap::new(),
        }
    }

    fn host(&mut self, host: &HostSpec) -> &mut HostWidgets {
        self.widgets.entry(host.hostname.clone()).or_default()
    }

    pub fn render(&self) -> String {
        let mut frame = String::new();
        for (i, (left, right)) in self.layout.iter().enumerate() {
            let _ = writeln!(frame, "-- set {i} --");
            self.render_host(&mut frame, left);
            if let Some(right) = right {
                self.render_host(&mut frame, right);
            }
        }
        frame
    }

    fn render_host(&self, frame: &mut String, hostname: &str) {
        let Some(widgets) = self.widgets.get(hostname) else {
            return;
        };

        let text = |value: Option<f64>| value.map_or("-".to_owned(), |v| format!("{v:.2}"));
        let pct = |value: Option<f64>| value.map_or("-".to_owned(), |v| format!("{v:.1}%"));
        let gauge = |gauge: Option<Gauge>| {
            gauge.map_or("-".to_owned(), |g| format!("{} {}/{}", g.label, g.value, g.max))
        };

        let _ = writeln!(
            frame,
            "{hostname:<24} tx {} KB/s ({})  rx {} KB/s ({})  {}  {}",
            text(widgets.readout(Direction::Sent)),
            pct(widgets.latest(Channel::SentPctCapacity)),
            text(widgets.readout(Direction::Recv)),
            pct(widgets.latest(Channel::RecvPctCapacity)),
            gauge(widgets.gauge(Channel::AverageLoad)),
            gauge(widgets.gauge(Channel::UsedBytes)),
        );
    }

    pub async fn render_loop(&self, every: Duration) {
        let mut ticker = tokio::time::interval(every);
        loop {
            ticker.tick().await;
            info!("\n{}", self.render());
        }
    }
}

impl WidgetFactory for TerminalBoard {
    fn series(&mut self, host: &HostSpec, channel: Channel) -> Box<dyn SeriesSink> {
        let series = Rc::new(RefCell::new(RollingSeries::new(self.window)));
        self.host(host).series.insert(channel, series.clone());
        Box::new(series)
    }

    fn gauge(&mut self, host: &HostSpec, channel: Channel) -> Box<dyn GaugeSink> {
        let (label, max) = match channel {
            Channel::UsedBytes => ("RAM", host.ram.unwrap_or(DEFAULT_GAUGE_MAX)),
            _ => ("CPU", DEFAULT_GAUGE_MAX),
        };
        let gauge = Rc::new(RefCell::new(Gauge {
            label,
            max,
            value: 0.0,
        }));
        self.host(host).gauges.insert(channel, gauge.clone());
        Box::new(gauge)
    }

    fn readout(&mut self, host: &HostSpec, direction: Direction) -> Option<Box<dyn ReadoutSink>> {
        let readout = Rc::new(RefCell::new(Readout::default()));
        self.host(host).readouts.insert(direction, readout.clone());
        Some(Box::new(readout))
    }
}

#[cfg(test)]
mod tests {
    use xdash_proto::Packet;

    use super::*;
    use crate::{DashboardConfig, DashboardController};

    #[test]
    fn rolling_series_drops_oldest() {
        let mut series = RollingSeries::new(3);
        for i in 0..5 {
            series.append(i, i as f64);
        }

        assert_eq!(series.len(), 3);
        assert_eq!(series.latest(), Some(4.0));
        assert_eq!(series.peak(), Some(4.0));
        assert_eq!(series.samples.front(), Some(&(2, 2.0)));
    }

    #[test]
    fn board_renders_routed_values() {
        let config = DashboardConfig {
            websocket_uri: "ws://localhost/stats".into(),
            hosts: vec![
                HostSpec::new("alpha", 10_000.0, 8_000.0),
                HostSpec::new("beta", 10_000.0, 8_000.0),
                HostSpec::new("gamma", 10_000.0, 8_000.0),
            ],
            render_interval_ms: 2000,
            window: 5,
        };
        let mut controller = DashboardController::new(config).unwrap();
        let mut board = TerminalBoard::new(controller.hosts(), 5);
        controller.bind_widgets(&mut board).unwrap();

        for packet in [
            Packet::network("alpha", 2048.0, 1024.0),
            Packet::cpu("beta", 0.5),
            Packet::memory("gamma", 50.0),
        ] {
            controller.handle_message(&packet.to_json().unwrap()).unwrap();
        }

        let frame = board.render();
        assert!(frame.contains("-- set 0 --"));
        assert!(frame.contains("-- set 1 --"));
        assert!(frame.contains("tx 2.00 KB/s (20.5%)  rx 1.00 KB/s (10.2%)"));
        assert!(frame.contains("CPU 0.5/100"));
        assert!(frame.contains("RAM 4000/8000"));
    }
}
