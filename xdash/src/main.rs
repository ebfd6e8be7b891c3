#![forbid(unsafe_code)]

use std::time::Duration;

use argh::FromArgs;
use simple_logger::SimpleLogger;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use xdash::{
    DashboardConfig, DashboardController, RunOutcome, source::WebSocketSource,
    widget::TerminalBoard,
};

#[derive(FromArgs, Debug)]
#[argh(description = "Live telemetry dashboard for a set of monitored hosts.")]
struct Args {
    #[argh(
        option,
        short = 'c',
        default = "\"xdash.toml\".to_string()",
        description = "path to config file"
    )]
    pub config: String,
    #[argh(
        option,
        default = "1",
        description = "minimum interval between two connection retries in seconds"
    )]
    pub retry_minimum_interval: u64, // in seconds
    #[argh(
        option,
        default = "300",
        description = "maximum interval between two connection retries in seconds"
    )]
    pub retry_maximum_interval: u64, // in seconds
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    SimpleLogger::new().env().init()?;

    let args: Args = argh::from_env();
    log::debug!("Args: {args:#?}");

    let config = DashboardConfig::load(&args.config)?;
    log::debug!("Dashboard config: {config:#?}");
    let uri = config.websocket_uri.clone();
    let render_interval = Duration::from_millis(config.render_interval_ms);

    let mut controller = DashboardController::new(config)?;
    let mut board = TerminalBoard::new(controller.hosts(), controller.config().window);
    controller.bind_widgets(&mut board)?;

    let shutdown = CancellationToken::new();
    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            tokio::signal::ctrl_c()
                .await
                .expect("failed to listen for ctrl-c");
            shutdown.cancel();
        }
    });

    let mut reconnect_timer = ReconnectTimer::new(
        Duration::from_secs(args.retry_minimum_interval),
        Duration::from_secs(args.retry_maximum_interval),
    );

    let session = async {
        loop {
            let res: anyhow::Result<RunOutcome> = async {
                let mut source = WebSocketSource::connect(&uri).await?;
                reconnect_timer.reset();
                controller.run(&mut source, &shutdown).await
            }
            .await;

            match res {
                Ok(RunOutcome::Shutdown) => return Ok::<(), anyhow::Error>(()),
                Ok(RunOutcome::Closed) => log::warn!("Connection to {uri} closed"),
                Err(e) => log::warn!("Error occurred: {e}"),
            }

            log::info!(
                "Reconnecting in {} seconds...",
                reconnect_timer.interval().as_secs()
            );
            tokio::select! {
                _ = reconnect_timer.wait() => {}
                _ = shutdown.cancelled() => return Ok(()),
            }
        }
    };

    tokio::select! {
        res = session => res,
        _ = board.render_loop(render_interval) => Ok(()),
    }
}

struct ReconnectTimer {
    minimal_interval: Duration,
    maximal_interval: Duration,
    curr_interval: Duration,
}

impl ReconnectTimer {
    fn new(minimal_interval: Duration, maximal_interval: Duration) -> Self {
        debug_assert!(minimal_interval <= maximal_interval);

        Self {
            minimal_interval,
            maximal_interval,
            curr_interval: minimal_interval,
        }
    }

    async fn wait(&mut self) {
        sleep(self.curr_interval).await;
        self.curr_interval = (self.curr_interval * 2).min(self.maximal_interval);
    }

    fn reset(&mut self) {
        self.curr_interval = self.minimal_interval;
    }

    fn interval(&self) -> Duration {
        self.curr_interval
    }
}
