/// Tokio WebSocket transport for the realtime event connection.
///
/// Concrete implementation of the `Transport` trait using tokio-tungstenite.
/// The service speaks one JSON object per text frame, so no extra framing
/// sits between the socket and the event parser; the session cookie rides on
/// the upgrade request.

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use log::{debug, error, info, trace, warn};
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

use crate::net::{Transport, TransportEvent, TransportFactory};

type RawWs = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<RawWs, Message>;
type WsStream = SplitStream<RawWs>;

/// Tokio WebSocket transport
pub struct WebSocketTransport {
    ws_sink: Arc<Mutex<Option<WsSink>>>,
    is_connected: Arc<Mutex<bool>>,
}

impl WebSocketTransport {
    fn new(sink: WsSink) -> Self {
        Self {
            ws_sink: Arc::new(Mutex::new(Some(sink))),
            is_connected: Arc::new(Mutex::new(true)),
        }
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    async fn send(&self, data: &[u8]) -> Result<(), anyhow::Error> {
        let mut sink_guard = self.ws_sink.lock().await;
        let sink = sink_guard
            .as_mut()
            .ok_or_else(|| anyhow::anyhow!("Socket is closed"))?;

        // The protocol is JSON text; refuse anything that is not UTF-8
        let text = String::from_utf8(data.to_vec())
            .map_err(|e| anyhow::anyhow!("Frame is not UTF-8: {}", e))?;

        debug!(target: "Socket", "--> Sending frame: {} bytes", data.len());
        sink.send(Message::Text(text.into()))
            .await
            .map_err(|e| anyhow::anyhow!("WebSocket send error: {}", e))?;
        Ok(())
    }

    async fn disconnect(&self) {
        let mut is_connected = self.is_connected.lock().await;
        if *is_connected {
            *is_connected = false;
            if let Some(mut sink) = self.ws_sink.lock().await.take() {
                let _ = sink.close().await;
            }
        }
    }
}

/// Factory for creating WebSocket transports against one endpoint
pub struct WebSocketTransportFactory {
    url: String,
}

impl WebSocketTransportFactory {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

#[async_trait]
impl TransportFactory for WebSocketTransportFactory {
    async fn create_transport(
        &self,
        session_token: &str,
    ) -> Result<(Arc<dyn Transport>, mpsc::Receiver<TransportEvent>), anyhow::Error> {
        info!(target: "Socket", "Dialing {}", self.url);
        let mut request = self
            .url
            .as_str()
            .into_client_request()
            .map_err(|e| anyhow::anyhow!("Failed to build upgrade request: {}", e))?;
        let cookie = HeaderValue::from_str(&format!("session_token={session_token}"))
            .map_err(|e| anyhow::anyhow!("Session token is not a valid header value: {}", e))?;
        request.headers_mut().insert("Cookie", cookie);

        let (ws, _response) = connect_async(request)
            .await
            .map_err(|e| anyhow::anyhow!("WebSocket connect failed: {}", e))?;

        let (sink, stream) = ws.split();

        // Create event channel
        let (event_tx, event_rx) = mpsc::channel(100);

        let transport = Arc::new(WebSocketTransport::new(sink));

        // Spawn read pump task
        let event_tx_clone = event_tx.clone();
        tokio::task::spawn(read_pump(stream, event_tx_clone));

        // Send connected event
        let _ = event_tx.send(TransportEvent::Connected).await;

        Ok((transport, event_rx))
    }
}

async fn read_pump(mut stream: WsStream, event_tx: mpsc::Sender<TransportEvent>) {
    loop {
        match stream.next().await {
            Some(Ok(Message::Text(text))) => {
                debug!(target: "Socket", "<-- Received frame: {} bytes", text.len());
                if event_tx
                    .send(TransportEvent::DataReceived(Bytes::from(text)))
                    .await
                    .is_err()
                {
                    warn!(target: "Socket", "Event receiver dropped, closing read pump");
                    break;
                }
            }
            Some(Ok(Message::Binary(data))) => {
                // The service never sends binary frames
                debug!(target: "Socket", "Ignoring unexpected binary frame of {} bytes", data.len());
            }
            Some(Ok(Message::Close(_))) => {
                trace!(target: "Socket", "Received close frame");
                break;
            }
            Some(Ok(_)) => {
                // Ping/pong handled by tungstenite itself
            }
            Some(Err(e)) => {
                error!(target: "Socket", "Error reading from websocket: {e}");
                break;
            }
            None => {
                trace!(target: "Socket", "Websocket stream ended");
                break;
            }
        }
    }

    // Send disconnected event
    let _ = event_tx.send(TransportEvent::Disconnected).await;
}
