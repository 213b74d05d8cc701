//! Sora signaling wire schema
//!
//! One JSON object per WebSocket text frame, discriminated by `type`.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Signaling message types
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SignalingMessage {
    /// Client → server: join a channel
    Connect(ConnectMessage),

    /// Server → client: SDP offer plus peer configuration
    Offer(OfferMessage),

    /// Client → server: SDP answer
    Answer {
        /// Local SDP
        sdp: String,
    },

    /// Either direction: ICE candidate
    Candidate(CandidateMessage),

    /// Server → client: keep-alive
    Ping {
        /// Whether the server wants statistics in the pong
        #[serde(default)]
        stats: bool,
    },

    /// Client → server: keep-alive reply
    Pong {
        /// Sampled connection statistics
        #[serde(default, skip_serializing_if = "Option::is_none")]
        stats: Option<Value>,
    },

    /// Server → client: application push
    Push {
        /// Message body without the `type` field
        #[serde(flatten)]
        body: Map<String, Value>,
    },

    /// Server → client: channel event notification
    Notify {
        /// Message body without the `type` field
        #[serde(flatten)]
        body: Map<String, Value>,
    },

    /// Server → client: signaling switched to data channels
    Switched {
        /// Message body without the `type` field
        #[serde(flatten)]
        body: Map<String, Value>,
    },

    /// Server → client: session ended by the server
    Disconnect {
        /// Optional reason
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },

    /// Server → client: reconnect to another signaling URL
    Redirect {
        /// New signaling URL
        location: String,
    },
}

impl SignalingMessage {
    /// Wire name of the message kind
    pub fn kind(&self) -> &'static str {
        match self {
            SignalingMessage::Connect(_) => "connect",
            SignalingMessage::Offer(_) => "offer",
            SignalingMessage::Answer { .. } => "answer",
            SignalingMessage::Candidate(_) => "candidate",
            SignalingMessage::Ping { .. } => "ping",
            SignalingMessage::Pong { .. } => "pong",
            SignalingMessage::Push { .. } => "push",
            SignalingMessage::Notify { .. } => "notify",
            SignalingMessage::Switched { .. } => "switched",
            SignalingMessage::Disconnect { .. } => "disconnect",
            SignalingMessage::Redirect { .. } => "redirect",
        }
    }

    /// Serialize to a text frame
    pub fn to_json(&self) -> crate::Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Deserialize from a text frame
    pub fn from_json(json: &str) -> crate::Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

/// Connect request
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConnectMessage {
    /// sendonly / recvonly / sendrecv
    pub role: String,

    /// Channel to join
    pub channel_id: String,

    /// Client identification string
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sora_client: Option<String>,

    /// Client metadata
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,

    /// Metadata attached to notify events
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signaling_notify_metadata: Option<Value>,

    /// Multistream request (only sent when set)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub multistream: Option<bool>,

    /// Spotlight request (only sent when set)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spotlight: Option<bool>,

    /// Number of spotlighted streams
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spotlight_number: Option<u32>,

    /// Simulcast request (only sent when set)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub simulcast: Option<bool>,

    /// Audio request
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio: Option<MediaRequest>,

    /// Video request
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video: Option<MediaRequest>,
}

/// Per-kind media request: `false` to disable, or codec/bitrate preferences
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum MediaRequest {
    /// Plain on/off
    Enabled(bool),
    /// Preferences
    Params(MediaParams),
}

/// Codec and bitrate preferences
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct MediaParams {
    /// Codec name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub codec_type: Option<String>,

    /// Bitrate in kbps
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bit_rate: Option<u32>,
}

/// SDP offer from the SFU
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OfferMessage {
    /// Remote SDP
    pub sdp: String,

    /// Peer configuration for the media session
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<PeerConfigMessage>,

    /// Client id assigned by the SFU
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,

    /// Connection id assigned by the SFU
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connection_id: Option<String>,
}

/// Peer configuration embedded in an offer
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PeerConfigMessage {
    /// STUN/TURN servers
    #[serde(default)]
    pub ice_servers: Vec<IceServerMessage>,

    /// "relay" or "all"
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ice_transport_policy: Option<String>,
}

/// One STUN/TURN server entry
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct IceServerMessage {
    /// Server URLs
    #[serde(default)]
    pub urls: Vec<String>,

    /// TURN username
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,

    /// TURN credential
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credential: Option<String>,
}

/// ICE candidate
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CandidateMessage {
    /// Media stream identification tag
    #[serde(default)]
    pub mid: String,

    /// m-line index
    #[serde(default)]
    pub index: u16,

    /// Candidate attribute line
    pub candidate: String,
}
