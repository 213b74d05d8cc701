//! Media engine capability consumed by the controller
//!
//! The controller never touches codecs or RTP. It creates one media session
//! per connection attempt through a [`MediaEngine`], applies the SFU's offer,
//! and listens to the session through a [`MediaObserver`] it injects at
//! creation. Observers are invoked from the engine's own execution context.

pub mod webrtc_engine;

use crate::config::Role;
use crate::Result;
use async_trait::async_trait;
use std::sync::Arc;

pub use webrtc_engine::{WebRtcMediaEngine, WebRtcSession};

/// ICE connectivity state reported by a media session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectivityState {
    /// Not started
    New,
    /// Checking candidate pairs
    Checking,
    /// A usable pair was found
    Connected,
    /// Checking finished on a usable pair
    Completed,
    /// Connectivity lost, may recover
    Disconnected,
    /// Connectivity failed
    Failed,
    /// Session shut down
    Closed,
}

impl ConnectivityState {
    /// Media is flowing
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectivityState::Connected | ConnectivityState::Completed)
    }

    /// The session is no longer usable and must be replaced
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            ConnectivityState::Disconnected | ConnectivityState::Failed | ConnectivityState::Closed
        )
    }
}

impl std::fmt::Display for ConnectivityState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ConnectivityState::New => "new",
            ConnectivityState::Checking => "checking",
            ConnectivityState::Connected => "connected",
            ConnectivityState::Completed => "completed",
            ConnectivityState::Disconnected => "disconnected",
            ConnectivityState::Failed => "failed",
            ConnectivityState::Closed => "closed",
        };
        f.write_str(s)
    }
}

/// ICE candidate exchanged over signaling
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IceCandidate {
    /// Media stream identification tag
    pub mid: String,
    /// m-line index
    pub index: u16,
    /// Candidate attribute line
    pub candidate: String,
}

/// STUN/TURN server
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IceServer {
    /// Server URLs
    pub urls: Vec<String>,
    /// TURN username
    pub username: String,
    /// TURN credential
    pub credential: String,
}

/// Which candidates the media session may use
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum IceTransportPolicy {
    /// Any candidate
    #[default]
    All,
    /// TURN relay candidates only
    Relay,
}

/// Everything a media engine needs to create a session
///
/// Built from the configuration the SFU embeds in its offer plus the local
/// session configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct PeerConfig {
    /// STUN/TURN servers supplied by the SFU
    pub ice_servers: Vec<IceServer>,
    /// Candidate policy supplied by the SFU
    pub ice_transport_policy: IceTransportPolicy,
    /// Fixed local UDP port
    pub port: Option<u16>,
    /// Media direction
    pub role: Role,
    /// Audio enabled
    pub audio: bool,
    /// Video enabled
    pub video: bool,
}

/// Notifications from a media session
///
/// Implementations must not block; they run on the media engine's threads.
pub trait MediaObserver: Send + Sync {
    /// ICE connectivity changed
    fn on_connectivity_change(&self, state: ConnectivityState);

    /// A local ICE candidate was gathered
    fn on_local_candidate(&self, candidate: IceCandidate);
}

/// Creates media sessions
#[async_trait]
pub trait MediaEngine: Send + Sync + 'static {
    /// Create a session that reports to `observer`
    async fn create_session(
        &self,
        config: &PeerConfig,
        observer: Arc<dyn MediaObserver>,
    ) -> Result<Arc<dyn MediaSession>>;
}

/// One negotiated peer session
#[async_trait]
pub trait MediaSession: Send + Sync {
    /// Unique id of this session instance
    fn id(&self) -> &str;

    /// Apply the remote offer and return the local answer SDP
    async fn set_remote_offer(&self, sdp: &str) -> Result<String>;

    /// Add a remote ICE candidate
    async fn add_remote_candidate(&self, candidate: &IceCandidate) -> Result<()>;

    /// Sample connection statistics
    async fn stats(&self) -> Result<serde_json::Value>;

    /// Release the session and everything it holds
    async fn dispose(&self) -> Result<()>;
}
