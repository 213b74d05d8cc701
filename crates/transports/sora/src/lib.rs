//! Sora SFU signaling client
//!
//! This crate keeps one media session connected to a Sora SFU. It speaks
//! Sora's JSON signaling protocol over WebSocket, negotiates a WebRTC session
//! from the SFU's offer, supervises the link with a liveness watchdog, and
//! reconnects with exponential backoff when anything fails.
//!
//! # Features
//!
//! - **Lifecycle state machine**: one controller task serializes every transition
//! - **Watchdog**: a silent signaling link is treated as dead
//! - **Reconnect with backoff**: bounded exponential delays, optional retry limit
//! - **Pluggable collaborators**: [`SignalingTransport`] and [`MediaEngine`] traits
//! - **Server messages**: ping/pong with stats, push, notify, switched,
//!   redirect and disconnect
//!
//! # Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────┐
//! │  SoraClient (cloneable handle)                         │
//! │  ↓ commands            ↑ ClientStatus / ClientEvent    │
//! │  Controller task                                       │
//! │  ├─ Negotiator (Sora JSON frames)                      │
//! │  ├─ SignalingTransport → SignalingLink (WebSocket)     │
//! │  ├─ MediaEngine → MediaSession (webrtc-rs)             │
//! │  └─ Watchdog (liveness deadline)                       │
//! └────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```
//! use sora_signaling::{Role, SessionConfig};
//!
//! let mut config = SessionConfig::new("wss://sora.example.com/signaling", "room-1");
//! config.role = Role::SendRecv;
//! config.multistream = true;
//!
//! assert!(config.validate().is_ok());
//! ```
//!
//! ## Async Usage
//!
//! ```no_run
//! use sora_signaling::{Phase, SessionConfig, SoraClient};
//!
//! # async fn example() -> sora_signaling::Result<()> {
//! let config = SessionConfig::new("wss://sora.example.com/signaling", "room-1");
//! let client = SoraClient::with_defaults(config);
//!
//! client.connect().await?;
//!
//! let mut status = client.watch_status();
//! let _ = status.wait_for(|s| s.phase == Phase::Connected).await;
//!
//! client.close().await;
//! # Ok(())
//! # }
//! ```

#![warn(clippy::all)]
#![warn(missing_docs)]

pub mod client;
pub mod config;
pub mod error;
pub mod media;
pub mod signaling;
pub mod transport;
pub mod watchdog;

// Re-exports for public API
pub use client::{ClientEvent, ClientStatus, MediaSessionHandle, Phase, SoraClient};
pub use config::{Endpoint, ReconnectPolicy, Role, SessionConfig};
pub use error::{Error, Result};
pub use media::{
    ConnectivityState, IceCandidate, IceServer, IceTransportPolicy, MediaEngine, MediaObserver,
    MediaSession, PeerConfig, WebRtcMediaEngine,
};
pub use transport::{SignalingLink, SignalingTransport, WebSocketTransport};
pub use watchdog::Watchdog;

/// Get the version of this crate
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        let ver = version();
        assert!(!ver.is_empty());
    }
}
