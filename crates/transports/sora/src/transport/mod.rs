//! Signaling transport capability
//!
//! A [`SignalingTransport`] opens links; a [`SignalingLink`] carries text
//! frames until it is closed. The controller owns at most one link at a time
//! and polls `recv_text` from its own task.

pub mod websocket;

use crate::config::Endpoint;
use crate::Result;
use async_trait::async_trait;

pub use websocket::WebSocketTransport;

/// Opens signaling links
#[async_trait]
pub trait SignalingTransport: Send + Sync + 'static {
    /// Connect to `endpoint`
    async fn connect(&self, endpoint: &Endpoint) -> Result<Box<dyn SignalingLink>>;
}

/// One open, message-oriented signaling connection
#[async_trait]
pub trait SignalingLink: Send {
    /// Queue a text frame for sending
    async fn send_text(&mut self, frame: String) -> Result<()>;

    /// Next text frame; `None` once the peer closed the link
    ///
    /// Must be cancel safe: the controller polls it inside `select!`.
    async fn recv_text(&mut self) -> Option<Result<String>>;

    /// Close the link
    async fn close(&mut self) -> Result<()>;
}
