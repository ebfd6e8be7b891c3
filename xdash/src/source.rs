use futures_util::StreamExt;
use log::{debug, trace, warn};
use tokio::net::TcpStream;
use tokio_tungstenite::{
    MaybeTlsStream, WebSocketStream, connect_async,
    tungstenite::{Message, protocol::CloseFrame},
};

use crate::controller::{EventSource, SourceEvent};

/// Packet stream read from the aggregator's `/stats` websocket.
pub struct WebSocketSource {
    socket: WebSocketStream<MaybeTlsStream<TcpStream>>,
    announce_open: bool,
}

impl WebSocketSource {
    pub async fn connect(uri: &str) -> anyhow::Result<Self> {
        let (socket, resp) = connect_async(uri).await?;
        debug!("websocket handshake completed: {}", resp.status());

        Ok(WebSocketSource {
            socket,
            announce_open: true,
        })
    }
}

impl EventSource for WebSocketSource {
    async fn next_event(&mut self) -> anyhow::Result<Option<SourceEvent>> {
        if std::mem::take(&mut self.announce_open) {
            return Ok(Some(SourceEvent::Open));
        }

        while let Some(msg) = self.socket.next().await {
            match msg? {
                Message::Text(text) => {
                    return Ok(Some(SourceEvent::Message(text.as_str().to_owned())));
                }
                Message::Binary(bytes) => match String::from_utf8(bytes.to_vec()) {
                    Ok(text) => return Ok(Some(SourceEvent::Message(text))),
                    Err(e) => warn!("dropping non-utf8 binary frame: {e}"),
                },
                Message::Close(frame) => {
                    if let Some(CloseFrame { code, reason }) = frame {
                        warn!("WebSocket closed by server: code={code:?}, reason={reason}");
                    }
                    return Ok(None);
                }
                other => trace!("ignoring frame {other:?}"),
            }
        }
        Ok(None)
    }

    async fn close(&mut self) {
        if let Err(e) = self.socket.close(None).await {
            debug!("websocket close failed: {e}");
        }
    }
}
