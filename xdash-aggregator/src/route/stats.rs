use axum::{
    extract::{
        State, WebSocketUpgrade,
        ws::{CloseFrame, Message, WebSocket, close_code},
    },
    response::Response,
};
use futures_util::SinkExt;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, debug_span, trace};

use crate::AppState;

pub async fn stats_ws(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    // subscribe before the upgrade so nothing published meanwhile is lost
    let packets = state.packets.subscribe();
    let subscriber = state.packets.receiver_count();
    ws.on_upgrade(move |socket| {
        handle_socket(socket, state, packets).instrument(debug_span!("stats_ws", subscriber))
    })
}

async fn handle_socket(socket: WebSocket, state: AppState, packets: broadcast::Receiver<String>) {
    let _tracker_token = state.ws_graceful_shutdown.tracker.token();
    let cancellation_token = state.ws_graceful_shutdown.token.child_token();

    debug!("dashboard connected");
    let mut fanout = Fanout {
        ws: socket,
        packets,
        cancellation_token,
    };
    while fanout.next().await {}
    fanout.ws.close().await.ok();
    debug!("dashboard disconnected");
}

struct Fanout {
    ws: WebSocket,
    packets: broadcast::Receiver<String>,
    cancellation_token: CancellationToken,
}

impl Fanout {
    async fn next(&mut self) -> bool {
        tokio::select! {
            packet = self.packets.recv() => match packet {
                Ok(packet) => self.ws.send(Message::Text(packet.into())).await.is_ok(),
                Err(RecvError::Lagged(skipped)) => {
                    debug!(skipped, "dashboard lagging, skipping packets");
                    true
                }
                Err(RecvError::Closed) => false,
            },
            msg = self.ws.recv() => match msg {
                Some(Ok(Message::Close(frame))) => {
                    if let Some(CloseFrame { code, reason }) = frame {
                        trace!(code, %reason, "websocket closed with frame");
                    }
                    false
                }
                Some(Ok(_)) => true, // dashboards only listen
                Some(Err(e)) => {
                    debug!(error = %e, "websocket error");
                    false
                }
                None => false,
            },
            _ = self.cancellation_token.cancelled() => {
                let frame = CloseFrame {
                    code: close_code::AWAY,
                    reason: "server shutting down".into(),
                };
                self.ws.send(Message::Close(Some(frame))).await.ok();
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use futures_util::StreamExt;
    use tokio::{net::TcpListener, time::timeout};
    use tokio_tungstenite::{
        MaybeTlsStream, WebSocketStream, connect_async,
        tungstenite::{self, protocol::frame::coding::CloseCode},
    };
    use tokio_util::task::TaskTracker;
    use xdash_proto::Packet;

    use crate::{WebsocketGraceful, app};

    use super::*;

    type Client = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

    fn state() -> AppState {
        AppState {
            packets: broadcast::channel(4).0,
            ws_graceful_shutdown: WebsocketGraceful {
                token: CancellationToken::new(),
                tracker: TaskTracker::new(),
            },
        }
    }

    async fn dashboard(state: &AppState) -> Client {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let app = app(state.clone());
        tokio::spawn(async move { axum::serve(listener, app).await });

        let (client, _) = connect_async(format!("ws://{addr}/stats")).await.unwrap();
        client
    }

    async fn next_message(client: &mut Client) -> tungstenite::Message {
        timeout(Duration::from_secs(5), client.next())
            .await
            .unwrap()
            .unwrap()
            .unwrap()
    }

    #[tokio::test]
    async fn published_packets_reach_dashboards() {
        let state = state();
        let mut client = dashboard(&state).await;

        let packet = Packet::memory("alpha", 42.0).to_json().unwrap();
        state.packets.send(packet.clone()).unwrap();

        let msg = next_message(&mut client).await;
        assert_eq!(msg.to_text().unwrap(), packet);
    }

    #[tokio::test]
    async fn lagging_dashboard_skips_to_recent_packets() {
        let state = state();
        let mut client = dashboard(&state).await;

        // nothing is forwarded until this task yields, so the receiver overflows
        for n in 0..10 {
            state.packets.send(n.to_string()).unwrap();
        }
        for n in 6..10 {
            let msg = next_message(&mut client).await;
            assert_eq!(msg.to_text().unwrap(), n.to_string());
        }

        state.packets.send("10".to_owned()).unwrap();
        let msg = next_message(&mut client).await;
        assert_eq!(msg.to_text().unwrap(), "10");
    }

    #[tokio::test]
    async fn shutdown_closes_dashboards_with_away() {
        let state = state();
        let mut client = dashboard(&state).await;

        state.ws_graceful_shutdown.token.cancel();

        let tungstenite::Message::Close(Some(frame)) = next_message(&mut client).await else {
            panic!("expected a close frame");
        };
        assert_eq!(frame.code, CloseCode::Away);
        assert_eq!(frame.reason.as_str(), "server shutting down");
    }
}
