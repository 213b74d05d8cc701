//! In-memory signaling transport
//!
//! Every accepted connection is handed to the test as a [`ServerConn`] that
//! plays the SFU side of the link.

use super::{HarnessError, HarnessResult, WAIT_LIMIT};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use sora_signaling::{Endpoint, Error, Result, SignalingLink, SignalingTransport};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::Instant;

/// One recorded `connect` call
#[derive(Debug, Clone)]
pub struct ConnectAttempt {
    pub url: String,
    pub at: Instant,
}

/// Scriptable transport
pub struct MockTransport {
    refusals: Mutex<VecDeque<String>>,
    attempts: Mutex<Vec<ConnectAttempt>>,
    closes: Arc<AtomicUsize>,
    accepted: mpsc::UnboundedSender<ServerConn>,
}

impl MockTransport {
    pub fn new() -> (Arc<Self>, MockServer) {
        let (accepted, rx) = mpsc::unbounded_channel();
        let transport = Arc::new(Self {
            refusals: Mutex::new(VecDeque::new()),
            attempts: Mutex::new(Vec::new()),
            closes: Arc::new(AtomicUsize::new(0)),
            accepted,
        });
        (transport, MockServer { accepted: rx })
    }

    /// Refuse the next `count` connection attempts
    pub fn refuse_next(&self, count: usize) {
        let mut refusals = self.refusals.lock();
        for _ in 0..count {
            refusals.push_back("connection refused".to_string());
        }
    }

    pub fn connect_count(&self) -> usize {
        self.attempts.lock().len()
    }

    pub fn attempts(&self) -> Vec<ConnectAttempt> {
        self.attempts.lock().clone()
    }

    /// Links closed by the client
    pub fn close_count(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SignalingTransport for MockTransport {
    async fn connect(&self, endpoint: &Endpoint) -> Result<Box<dyn SignalingLink>> {
        self.attempts.lock().push(ConnectAttempt {
            url: endpoint.url.to_string(),
            at: Instant::now(),
        });

        if let Some(reason) = self.refusals.lock().pop_front() {
            return Err(Error::TransportError(reason));
        }

        let (to_client, from_server) = mpsc::unbounded_channel();
        let (to_server, from_client) = mpsc::unbounded_channel();
        let closed = Arc::new(AtomicBool::new(false));

        let conn = ServerConn {
            url: endpoint.url.to_string(),
            to_client,
            from_client,
            closed: Arc::clone(&closed),
        };
        self.accepted
            .send(conn)
            .map_err(|_| Error::TransportError("mock server gone".to_string()))?;

        Ok(Box::new(MockLink {
            to_server,
            from_server,
            closed,
            closes: Arc::clone(&self.closes),
        }))
    }
}

/// Client side of an in-memory link
struct MockLink {
    to_server: mpsc::UnboundedSender<String>,
    from_server: mpsc::UnboundedReceiver<Result<String>>,
    closed: Arc<AtomicBool>,
    closes: Arc<AtomicUsize>,
}

#[async_trait]
impl SignalingLink for MockLink {
    async fn send_text(&mut self, frame: String) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::TransportError("link closed".to_string()));
        }
        self.to_server
            .send(frame)
            .map_err(|_| Error::TransportError("server hung up".to_string()))
    }

    async fn recv_text(&mut self) -> Option<Result<String>> {
        self.from_server.recv().await
    }

    async fn close(&mut self) -> Result<()> {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.closes.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }
}

/// Receives the server side of accepted connections
pub struct MockServer {
    accepted: mpsc::UnboundedReceiver<ServerConn>,
}

impl MockServer {
    /// Wait for the client's next successful connection
    pub async fn accept(&mut self) -> HarnessResult<ServerConn> {
        tokio::time::timeout(WAIT_LIMIT, self.accepted.recv())
            .await
            .map_err(|_| HarnessError::Timeout("no connection accepted".to_string()))?
            .ok_or_else(|| HarnessError::ConnectionError("transport dropped".to_string()))
    }

    /// A connection that was already accepted, without waiting
    pub fn try_accept(&mut self) -> Option<ServerConn> {
        self.accepted.try_recv().ok()
    }
}

/// SFU side of one link
pub struct ServerConn {
    pub url: String,
    to_client: mpsc::UnboundedSender<Result<String>>,
    from_client: mpsc::UnboundedReceiver<String>,
    closed: Arc<AtomicBool>,
}

impl ServerConn {
    pub fn send(&self, frame: Value) {
        self.send_raw(&frame.to_string());
    }

    pub fn send_raw(&self, text: &str) {
        let _ = self.to_client.send(Ok(text.to_string()));
    }

    /// Fail the link with a transport error
    pub fn fail(&self, reason: &str) {
        let _ = self
            .to_client
            .send(Err(Error::TransportError(reason.to_string())));
    }

    /// Next frame sent by the client
    pub async fn recv(&mut self) -> HarnessResult<Value> {
        let text = tokio::time::timeout(WAIT_LIMIT, self.from_client.recv())
            .await
            .map_err(|_| HarnessError::Timeout("no frame from client".to_string()))?
            .ok_or_else(|| HarnessError::ConnectionError("client hung up".to_string()))?;
        serde_json::from_str(&text).map_err(|e| HarnessError::ValidationError(e.to_string()))
    }

    /// A frame the client already sent, without waiting
    pub fn try_recv(&mut self) -> Option<Value> {
        let text = self.from_client.try_recv().ok()?;
        serde_json::from_str(&text).ok()
    }

    /// Whether the client closed this link
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}
