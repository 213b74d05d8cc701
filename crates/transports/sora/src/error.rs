//! Error types for the Sora signaling client

/// Result type alias using the signaling Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while driving a Sora session
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Invalid configuration parameter (malformed endpoint, empty channel id)
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Transport could not connect, send, receive or close
    #[error("Transport error: {0}")]
    TransportError(String),

    /// WebSocket error
    #[error("WebSocket error: {0}")]
    WebSocketError(String),

    /// Malformed or unexpected signaling frame
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// No traffic within the watchdog interval
    #[error("Liveness failure: {0}")]
    LivenessFailure(String),

    /// Media session failed or lost connectivity
    #[error("Media error: {0}")]
    MediaError(String),

    /// SDP negotiation error
    #[error("SDP negotiation error: {0}")]
    SdpError(String),

    /// ICE candidate error
    #[error("ICE candidate error: {0}")]
    IceCandidateError(String),

    /// Statistics could not be sampled
    #[error("Stats error: {0}")]
    StatsError(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Operation not valid in the current phase
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Operation on a client that has been closed
    #[error("Client closed")]
    Closed,

    /// WebRTC library error
    #[error("WebRTC error: {0}")]
    WebRtcError(String),

    /// I/O error (reading a config file)
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

impl Error {
    /// Check if this error should drive the reconnect path
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::TransportError(_)
                | Error::WebSocketError(_)
                | Error::LivenessFailure(_)
                | Error::MediaError(_)
                | Error::SdpError(_)
                | Error::WebRtcError(_)
                | Error::IoError(_)
        )
    }

    /// Check if this error is a configuration error
    pub fn is_config_error(&self) -> bool {
        matches!(self, Error::InvalidConfig(_))
    }

    /// Check if this error is a non-fatal protocol error
    pub fn is_protocol_error(&self) -> bool {
        matches!(self, Error::Protocol(_) | Error::SerializationError(_))
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::SerializationError(e.to_string())
    }
}
