use std::{future::Future, io, net::SocketAddr, time::Duration};

use futures_util::StreamExt;
use tokio::{
    io::AsyncRead,
    net::{TcpListener, TcpStream},
    sync::broadcast,
    time::sleep,
};
use tokio_util::{
    codec::{FramedRead, LinesCodec, LinesCodecError},
    sync::CancellationToken,
    task::TaskTracker,
};
use tracing::{Instrument, debug, info, info_span, warn};
use xdash_proto::{DecodeError, Packet};

const MAX_LINE_LENGTH: usize = 64 * 1024;
const ACCEPT_ERROR_DELAY: Duration = Duration::from_millis(100);

/// Source of reporter connections.
pub trait Acceptor {
    type Stream: AsyncRead + Unpin + Send + 'static;

    fn accept(&mut self) -> impl Future<Output = io::Result<(Self::Stream, SocketAddr)>> + Send;
}

impl Acceptor for TcpListener {
    type Stream = TcpStream;

    async fn accept(&mut self) -> io::Result<(TcpStream, SocketAddr)> {
        TcpListener::accept(self).await
    }
}

/// Accepts reporter connections until `token` is cancelled. Accept errors are
/// logged and retried after a short delay.
pub async fn serve_reporters<A: Acceptor + Send>(
    mut acceptor: A,
    packets: broadcast::Sender<String>,
    token: CancellationToken,
    tracker: TaskTracker,
) {
    loop {
        let accepted = tokio::select! {
            accepted = acceptor.accept() => accepted,
            _ = token.cancelled() => return,
        };
        let (stream, addr) = match accepted {
            Ok(accepted) => accepted,
            Err(e) => {
                warn!(error = %e, "failed to accept reporter connection");
                tokio::select! {
                    _ = sleep(ACCEPT_ERROR_DELAY) => continue,
                    _ = token.cancelled() => return,
                }
            }
        };

        let packets = packets.clone();
        let token = token.child_token();
        tracker.spawn(
            async move {
                info!("reporter connected");
                tokio::select! {
                    res = handle_reporter(stream, &packets) => {
                        if let Err(e) = res {
                            warn!(error = %e, "reporter connection failed");
                        }
                    }
                    _ = token.cancelled() => {}
                }
                info!("reporter disconnected");
            }
            .instrument(info_span!("reporter", %addr)),
        );
    }
}

/// Reads newline-delimited packets from one reporter and publishes each valid
/// one. Undecodable lines are skipped; an oversized line ends the connection.
pub async fn handle_reporter<S: AsyncRead + Unpin>(
    stream: S,
    packets: &broadcast::Sender<String>,
) -> Result<(), LinesCodecError> {
    let mut lines = FramedRead::new(stream, LinesCodec::new_with_max_length(MAX_LINE_LENGTH));

    while let Some(line) = lines.next().await {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }

        if let Err(e) = publish(packets, &line) {
            warn!(error = %e, "dropping reporter line");
        }
    }
    Ok(())
}

/// Returns how many dashboards the packet was queued for.
fn publish(packets: &broadcast::Sender<String>, line: &str) -> Result<usize, DecodeError> {
    let packet = Packet::from_json(line.trim())?;
    debug!(host = %packet.host, module = %packet.module, "publishing packet");

    // no dashboard connected is not an error
    Ok(packets.send(packet.to_json()?).unwrap_or(0))
}
