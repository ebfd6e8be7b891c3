use std::{
    net::{IpAddr, SocketAddr},
    time::Duration,
};

use axum::{Router, routing::get};
use clap::{Parser, Subcommand};
use confique::Config;
use tokio::{net::TcpListener, signal, sync::broadcast};
use tokio_util::{sync::CancellationToken, task::TaskTracker};
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};
use tracing::{info, trace};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod ingress;
mod report;
mod route;

/// Packets buffered per websocket client before it starts skipping
const FANOUT_CAPACITY: usize = 256;

#[derive(Debug, Parser)]
#[command(name = "xdash-aggregator")]
struct Cli {
    #[arg(short, long, value_name = "FILE", help = "Path to config file")]
    config_path: Option<String>,
    #[command(subcommand)]
    commands: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Accept reporter packets and fan them out to dashboards
    Serve,

    /// Sample this host and push packets to an aggregator
    Report,
}

#[derive(Config, Debug)]
struct Conf {
    /// Bind address
    #[config(default = "127.0.0.1", env = "XDASH_ADDRESS")]
    address: IpAddr,

    /// Port serving the `/stats` websocket
    #[config(default = 8080, env = "XDASH_STATS_PORT")]
    stats_port: u16,

    /// Port reporters push packets to
    #[config(default = 13337, env = "XDASH_REPORT_PORT")]
    report_port: u16,

    /// Aggregator a reporter pushes to
    #[config(default = "127.0.0.1:13337", env = "XDASH_SERVER")]
    server: String,

    /// Reporter sample interval in milliseconds
    #[config(default = 1000)]
    interval_ms: u64,

    /// Host name put in reported packets, defaults to the system host name
    #[config(env = "XDASH_HOSTNAME")]
    hostname: Option<String>,
}

fn config(path: &str) -> anyhow::Result<Conf> {
    Conf::builder()
        .env()
        .file(path)
        .load()
        .map_err(|e| e.into())
}

#[derive(Clone, Debug)]
pub(crate) struct AppState {
    pub packets: broadcast::Sender<String>,
    pub ws_graceful_shutdown: WebsocketGraceful,
}

#[derive(Clone, Debug)]
pub(crate) struct WebsocketGraceful {
    pub token: CancellationToken,
    pub tracker: TaskTracker,
}

fn app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(route::health))
        .route("/stats", get(route::stats_ws))
        .layer((
            TraceLayer::new_for_http(),
            // Prevent requests to hang forever
            TimeoutLayer::new(Duration::from_secs(60)),
        ))
        .with_state(state)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let cli = Cli::parse();
    trace!("using command line arguments {:?}", cli);

    let config = config(&cli.config_path.unwrap_or("config.toml".to_owned()))?;
    trace!("using config {:?}", config);

    match cli.commands {
        Commands::Serve => serve(&config).await?,
        Commands::Report => {
            let token = CancellationToken::new();
            let hostname = config
                .hostname
                .clone()
                .or_else(sysinfo::System::host_name)
                .unwrap_or_else(|| "localhost".to_owned());

            let reporter = report::report(
                &config.server,
                hostname,
                Duration::from_millis(config.interval_ms),
                token.clone(),
            );
            tokio::pin!(reporter);

            tokio::select! {
                res = &mut reporter => res?,
                _ = shutdown_signal(token) => reporter.await?,
            }
        }
    }

    Ok(())
}

async fn serve(config: &Conf) -> anyhow::Result<()> {
    let (packets, _) = broadcast::channel(FANOUT_CAPACITY);
    let state = AppState {
        packets: packets.clone(),
        ws_graceful_shutdown: WebsocketGraceful {
            token: CancellationToken::new(),
            tracker: TaskTracker::new(),
        },
    };
    let token = state.ws_graceful_shutdown.token.clone();
    let tracker = state.ws_graceful_shutdown.tracker.clone();

    let report_addr = SocketAddr::from((config.address, config.report_port));
    info!("accepting reporters on {report_addr}");
    let reporters = TcpListener::bind(report_addr).await?;
    let ingress = tokio::spawn(ingress::serve_reporters(
        reporters,
        packets,
        token.clone(),
        tracker.clone(),
    ));

    let stats_addr = SocketAddr::from((config.address, config.stats_port));
    info!("serving dashboards on {stats_addr}");
    let listener = TcpListener::bind(stats_addr).await?;

    axum::serve(listener, app(state))
        .with_graceful_shutdown(shutdown_signal(token))
        .await?;

    ingress.await?;

    tracker.close();
    trace!("waiting {} connection shutdown", tracker.len());
    tracker.wait().await;

    Ok(())
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                #[cfg(debug_assertions)]
                let default_log_level = format!(
                    "{}=debug,tower_http=debug,axum=trace",
                    env!("CARGO_CRATE_NAME")
                )
                .into();

                #[cfg(not(debug_assertions))]
                let default_log_level = format!(
                    "{}=info,tower_http=info,axum=info",
                    env!("CARGO_CRATE_NAME")
                )
                .into();

                default_log_level
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

async fn shutdown_signal(token: CancellationToken) {
    let _shutdown_guard = token.drop_guard();

    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl-C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

#[cfg(test)]
mod tests {
    use axum::{
        body::Body,
        http::{Request, StatusCode},
    };
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    use super::*;

    fn state() -> AppState {
        AppState {
            packets: broadcast::channel(4).0,
            ws_graceful_shutdown: WebsocketGraceful {
                token: CancellationToken::new(),
                tracker: TaskTracker::new(),
            },
        }
    }

    #[tokio::test]
    async fn health_reports_ok() {
        let req = Request::builder()
            .uri("/health")
            .body(Body::empty())
            .unwrap();

        let res = app(state()).oneshot(req).await.unwrap();

        assert_eq!(res.status(), StatusCode::OK);
        let body = res.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(body, r#"{"status":"ok"}"#);
    }

    #[tokio::test]
    async fn stats_requires_websocket_upgrade() {
        let req = Request::builder()
            .uri("/stats")
            .body(Body::empty())
            .unwrap();

        let res = app(state()).oneshot(req).await.unwrap();

        assert!(res.status().is_client_error());
    }
}
