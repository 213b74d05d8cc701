//! WebSocket signaling transport

use super::{SignalingLink, SignalingTransport};
use crate::config::Endpoint;
use crate::{Error, Result};
use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::{
    connect_async_tls_with_config, tungstenite::Message, Connector, MaybeTlsStream,
    WebSocketStream,
};
use tracing::{debug, error, info, warn};

type WsStream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

/// How long `close` waits for the close frame to be flushed
const CLOSE_FLUSH_TIMEOUT: Duration = Duration::from_secs(1);

/// WebSocket transport (ws:// and wss://)
#[derive(Debug, Default, Clone)]
pub struct WebSocketTransport;

impl WebSocketTransport {
    /// Create the transport
    pub fn new() -> Self {
        Self
    }

    fn tls_connector(endpoint: &Endpoint) -> Result<Option<Connector>> {
        if !(endpoint.secure && endpoint.insecure) {
            return Ok(None);
        }

        warn!("TLS certificate verification disabled for {}", endpoint);
        let tls = native_tls::TlsConnector::builder()
            .danger_accept_invalid_certs(true)
            .danger_accept_invalid_hostnames(true)
            .build()
            .map_err(|e| Error::TransportError(format!("Failed to build TLS connector: {}", e)))?;

        Ok(Some(Connector::NativeTls(tls)))
    }
}

#[async_trait]
impl SignalingTransport for WebSocketTransport {
    async fn connect(&self, endpoint: &Endpoint) -> Result<Box<dyn SignalingLink>> {
        info!("Connecting to signaling server: {}", endpoint);

        let connector = Self::tls_connector(endpoint)?;
        let (ws_stream, _) =
            connect_async_tls_with_config(endpoint.url.as_str(), None, true, connector)
                .await
                .map_err(|e| Error::WebSocketError(format!("Failed to connect: {}", e)))?;

        info!("Connected to signaling server");

        let (write, read) = ws_stream.split();
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let (in_tx, in_rx) = mpsc::unbounded_channel();

        let sender = tokio::spawn(Self::sender_task(write, out_rx));
        let receiver = tokio::spawn(Self::receiver_task(read, in_tx));

        Ok(Box::new(WebSocketLink {
            tx: Some(out_tx),
            rx: in_rx,
            sender,
            receiver,
        }))
    }
}

impl WebSocketTransport {
    /// Sender task: sends messages from channel to WebSocket
    async fn sender_task(
        mut write: futures::stream::SplitSink<WsStream, Message>,
        mut rx: mpsc::UnboundedReceiver<Message>,
    ) {
        while let Some(msg) = rx.recv().await {
            let closing = matches!(msg, Message::Close(_));
            if let Err(e) = write.send(msg).await {
                error!("Failed to send WebSocket message: {}", e);
                break;
            }
            if closing {
                break;
            }
        }

        let _ = write.close().await;
        debug!("Sender task terminated");
    }

    /// Receiver task: forwards text frames until the socket closes or fails
    async fn receiver_task(
        mut read: futures::stream::SplitStream<WsStream>,
        tx: mpsc::UnboundedSender<Result<String>>,
    ) {
        while let Some(msg_result) = read.next().await {
            match msg_result {
                Ok(Message::Text(text)) => {
                    if tx.send(Ok(text)).is_err() {
                        break;
                    }
                }
                Ok(Message::Close(frame)) => {
                    info!("WebSocket connection closed by server: {:?}", frame);
                    break;
                }
                Ok(Message::Binary(data)) => {
                    debug!("Ignoring binary WebSocket frame ({} bytes)", data.len());
                }
                Ok(_) => {}
                Err(e) => {
                    error!("WebSocket error: {}", e);
                    let _ = tx.send(Err(Error::WebSocketError(e.to_string())));
                    break;
                }
            }
        }

        debug!("Receiver task terminated");
    }
}

/// Open WebSocket link
struct WebSocketLink {
    /// Outgoing frames; taken on close
    tx: Option<mpsc::UnboundedSender<Message>>,
    /// Incoming text frames
    rx: mpsc::UnboundedReceiver<Result<String>>,
    sender: JoinHandle<()>,
    receiver: JoinHandle<()>,
}

#[async_trait]
impl SignalingLink for WebSocketLink {
    async fn send_text(&mut self, frame: String) -> Result<()> {
        debug!("Sending signaling message: {}", frame);

        let tx = self
            .tx
            .as_ref()
            .ok_or_else(|| Error::TransportError("Link already closed".to_string()))?;

        tx.send(Message::Text(frame))
            .map_err(|e| Error::TransportError(format!("Failed to send message: {}", e)))
    }

    async fn recv_text(&mut self) -> Option<Result<String>> {
        self.rx.recv().await
    }

    async fn close(&mut self) -> Result<()> {
        let Some(tx) = self.tx.take() else {
            return Ok(());
        };

        let _ = tx.send(Message::Close(None));
        drop(tx);

        if tokio::time::timeout(CLOSE_FLUSH_TIMEOUT, &mut self.sender)
            .await
            .is_err()
        {
            warn!("Timed out flushing WebSocket close frame");
            self.sender.abort();
        }
        self.receiver.abort();

        Ok(())
    }
}

impl Drop for WebSocketLink {
    fn drop(&mut self) {
        self.sender.abort();
        self.receiver.abort();
    }
}
