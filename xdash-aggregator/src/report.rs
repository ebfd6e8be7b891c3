use std::time::{Duration, Instant};

use futures_util::SinkExt;
use sysinfo::{Networks, System};
use tokio::{net::TcpStream, time::sleep};
use tokio_util::{
    codec::{FramedWrite, LinesCodec},
    sync::CancellationToken,
};
use tracing::{debug, info, warn};
use xdash_proto::Packet;

const RETRY_INTERVAL: Duration = Duration::from_secs(5);

/// Samples the local host into network, memory and cpu packets.
pub struct Sampler {
    hostname: String,
    system: System,
    networks: Networks,
    /// When `networks` was last refreshed; its counters cover the time since.
    last_refresh: Instant,
}

impl Sampler {
    pub fn new(hostname: String) -> Self {
        Sampler {
            hostname,
            system: System::new(),
            networks: Networks::new_with_refreshed_list(),
            last_refresh: Instant::now(),
        }
    }

    pub fn sample(&mut self) -> [Packet; 3] {
        self.sample_at(Instant::now())
    }

    /// Network counters are turned into per-second rates over the time since
    /// the previous refresh, however long ago that was.
    pub fn sample_at(&mut self, now: Instant) -> [Packet; 3] {
        self.networks.refresh(true);
        let elapsed = self.advance_window(now);
        let (sent, recv) = self
            .networks
            .iter()
            .fold((0, 0), |(sent, recv), (_, data)| {
                (sent + data.transmitted(), recv + data.received())
            });

        self.system.refresh_memory();
        let physical_percent = percent(self.system.used_memory(), self.system.total_memory());

        [
            Packet::network(
                self.hostname.as_str(),
                per_second(sent, elapsed),
                per_second(recv, elapsed),
            ),
            Packet::memory(self.hostname.as_str(), physical_percent),
            Packet::cpu(self.hostname.as_str(), System::load_average().one),
        ]
    }

    fn advance_window(&mut self, now: Instant) -> Duration {
        let elapsed = now.saturating_duration_since(self.last_refresh);
        self.last_refresh = now;
        elapsed
    }
}

fn per_second(bytes: u64, elapsed: Duration) -> f64 {
    let secs = elapsed.as_secs_f64();
    if secs > 0.0 { bytes as f64 / secs } else { 0.0 }
}

fn percent(used: u64, total: u64) -> f64 {
    if total == 0 {
        0.0
    } else {
        used as f64 / total as f64 * 100.0
    }
}

/// Pushes samples to the aggregator at `server` until `token` is cancelled,
/// reconnecting on failure.
pub async fn report(
    server: &str,
    hostname: String,
    interval: Duration,
    token: CancellationToken,
) -> anyhow::Result<()> {
    let mut sampler = Sampler::new(hostname);

    loop {
        let res: anyhow::Result<()> = async {
            let stream = TcpStream::connect(server).await?;
            info!(%server, "connected to aggregator");

            let mut lines = FramedWrite::new(stream, LinesCodec::new());
            let mut ticker = tokio::time::interval(interval);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    _ = token.cancelled() => return Ok(()),
                }

                for packet in sampler.sample() {
                    lines.send(packet.to_json()?).await?;
                }
                debug!("samples pushed");
            }
        }
        .await;

        match res {
            Ok(()) => return Ok(()),
            Err(e) => warn!(error = %e, "reporting to {server} failed"),
        }

        info!("retrying in {} seconds", RETRY_INTERVAL.as_secs());
        tokio::select! {
            _ = sleep(RETRY_INTERVAL) => {}
            _ = token.cancelled() => return Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use futures_util::StreamExt;
    use tokio::net::TcpListener;
    use tokio_util::codec::FramedRead;
    use xdash_proto::MetricKind;

    use super::*;

    #[test]
    fn rates_and_percentages() {
        assert_eq!(per_second(2048, Duration::from_millis(500)), 4096.0);
        assert_eq!(per_second(2048, Duration::ZERO), 0.0);
        assert_eq!(percent(2, 8), 25.0);
        assert_eq!(percent(2, 0), 0.0);
    }

    #[test]
    fn sample_produces_one_packet_per_kind() {
        let mut sampler = Sampler::new("alpha".to_owned());

        let packets = sampler.sample();

        let kinds: Vec<_> = packets.iter().map(|p| p.kind().unwrap()).collect();
        assert_eq!(kinds, MetricKind::ALL);
        assert!(packets.iter().all(|p| p.host == "alpha"));
        let memory = packets[1].field("physical-percent").unwrap();
        assert!((0.0..=100.0).contains(&memory));
    }

    #[test]
    fn counter_window_spans_gaps_between_samples() {
        let mut sampler = Sampler::new("alpha".to_owned());
        let start = sampler.last_refresh;

        // a reconnect gap between two samples belongs to the next window
        sampler.sample_at(start + Duration::from_secs(10));
        assert_eq!(sampler.last_refresh, start + Duration::from_secs(10));

        assert_eq!(
            sampler.advance_window(start + Duration::from_secs(11)),
            Duration::from_secs(1)
        );
        assert_eq!(sampler.advance_window(start), Duration::ZERO);
    }

    #[tokio::test]
    async fn report_sends_json_lines() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let token = CancellationToken::new();

        let reporter = tokio::spawn(report_owned(addr, token.clone()));

        let (stream, _) = listener.accept().await.unwrap();
        let mut lines = FramedRead::new(stream, LinesCodec::new());
        let mut modules = Vec::new();
        for _ in 0..3 {
            let line = lines.next().await.unwrap().unwrap();
            modules.push(Packet::from_json(&line).unwrap().module);
        }
        token.cancel();
        reporter.await.unwrap().unwrap();

        assert_eq!(modules, vec!["network", "memory", "cpu"]);
    }

    async fn report_owned(server: String, token: CancellationToken) -> anyhow::Result<()> {
        report(&server, "alpha".to_owned(), Duration::from_millis(10), token).await
    }
}
