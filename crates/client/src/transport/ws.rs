// WebSocket connector backed by tokio-tungstenite.
//
// The stream is split into a writer task (outbound text frames) and a reader
// task (inbound text frames and close notification). Dropping the `Socket`
// ends the writer, which closes the stream.

use futures_util::future::BoxFuture;
use futures_util::{FutureExt, SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message as WsFrame};
use tracing::{debug, trace};

use super::{Connector, Socket, SocketEvent};
use crate::error::ConnectError;

#[derive(Debug, Clone, Copy, Default)]
pub struct WsConnector;

impl WsConnector {
    pub fn new() -> Self {
        Self
    }
}

impl Connector for WsConnector {
    fn open(&self, url: &str) -> BoxFuture<'static, Result<Socket, ConnectError>> {
        let url = url.to_string();
        async move {
            let (stream, _response) = connect_async(url.as_str())
                .await
                .map_err(|error| ConnectError::Transport(error.to_string()))?;
            debug!(%url, "websocket handshake complete");

            let (mut writer, mut reader) = stream.split();
            let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<String>();
            let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();

            tokio::spawn(async move {
                while let Some(text) = outbound_rx.recv().await {
                    if writer.send(WsFrame::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                let _ = writer.close().await;
            });

            tokio::spawn(async move {
                let reason = loop {
                    match reader.next().await {
                        Some(Ok(WsFrame::Text(text))) => {
                            if inbound_tx.send(SocketEvent::Frame(text.as_str().to_owned())).is_err() {
                                return;
                            }
                        }
                        Some(Ok(WsFrame::Close(frame))) => {
                            break frame
                                .map(|frame| format!("{} {}", u16::from(frame.code), frame.reason.as_str()))
                                .unwrap_or_else(|| "closed by relay".to_string());
                        }
                        Some(Ok(other)) => trace!(?other, "ignoring non-text frame"),
                        Some(Err(error)) => break error.to_string(),
                        None => break "stream ended".to_string(),
                    }
                };
                let _ = inbound_tx.send(SocketEvent::Closed { reason });
            });

            Ok(Socket { outbound: outbound_tx, inbound: inbound_rx })
        }
        .boxed()
    }
}
