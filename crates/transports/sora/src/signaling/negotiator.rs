//! Encoding and classification of signaling frames
//!
//! The negotiator holds no connection state. It turns incoming text frames
//! into [`Inbound`] actions for the controller and builds the exact outgoing
//! frames from the session configuration.

use super::protocol::{
    CandidateMessage, ConnectMessage, MediaParams, MediaRequest, OfferMessage, SignalingMessage,
};
use crate::config::SessionConfig;
use crate::media::{IceCandidate, IceServer, IceTransportPolicy, PeerConfig};
use crate::{Error, Result};
use serde_json::Value;

/// What an incoming frame asks the controller to do
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    /// Create a media session and apply the offer
    Offer {
        /// Remote SDP
        sdp: String,
        /// Session configuration for the media engine
        peer_config: PeerConfig,
    },
    /// Add a remote candidate to the current media session
    Candidate(IceCandidate),
    /// Reply with a pong
    Ping {
        /// Include statistics in the pong
        stats: bool,
    },
    /// Pass `push` to observers
    Push(Value),
    /// Pass `notify` to observers
    Notify(Value),
    /// Pass `switched` to observers
    Switched(Value),
    /// Close gracefully
    Disconnect {
        /// Reason given by the server
        reason: Option<String>,
    },
    /// Reconnect to another signaling URL
    Redirect {
        /// New signaling URL
        location: String,
    },
}

/// Signaling encoder/decoder bound to one session configuration
#[derive(Debug, Clone)]
pub struct Negotiator {
    config: SessionConfig,
}

impl Negotiator {
    /// Create a negotiator for `config`
    pub fn new(config: SessionConfig) -> Self {
        Self { config }
    }

    /// Classify an incoming frame
    ///
    /// Malformed frames and client-to-server message kinds yield
    /// `Error::Protocol`; callers log and drop them.
    pub fn decode(&self, frame: &str) -> Result<Inbound> {
        let msg = SignalingMessage::from_json(frame)
            .map_err(|e| Error::Protocol(format!("Malformed signaling frame: {}", e)))?;

        let inbound = match msg {
            SignalingMessage::Offer(offer) => Inbound::Offer {
                peer_config: self.peer_config(&offer),
                sdp: offer.sdp,
            },
            SignalingMessage::Candidate(c) => Inbound::Candidate(IceCandidate {
                mid: c.mid,
                index: c.index,
                candidate: c.candidate,
            }),
            SignalingMessage::Ping { stats } => Inbound::Ping { stats },
            SignalingMessage::Push { body } => Inbound::Push(Value::Object(body)),
            SignalingMessage::Notify { body } => Inbound::Notify(Value::Object(body)),
            SignalingMessage::Switched { body } => Inbound::Switched(Value::Object(body)),
            SignalingMessage::Disconnect { reason } => Inbound::Disconnect { reason },
            SignalingMessage::Redirect { location } => Inbound::Redirect { location },
            other @ (SignalingMessage::Connect(_)
            | SignalingMessage::Answer { .. }
            | SignalingMessage::Pong { .. }) => {
                return Err(Error::Protocol(format!(
                    "Unexpected '{}' message from server",
                    other.kind()
                )))
            }
        };

        Ok(inbound)
    }

    /// Build the connect request carrying the session configuration
    pub fn connect_message(&self) -> ConnectMessage {
        let config = &self.config;

        ConnectMessage {
            role: config.role.as_str().to_string(),
            channel_id: config.channel_id.clone(),
            sora_client: Some(config.client_name.clone()),
            metadata: config.metadata.clone(),
            signaling_notify_metadata: config.signaling_notify_metadata.clone(),
            multistream: config.multistream.then_some(true),
            spotlight: config.spotlight.then_some(true),
            spotlight_number: config
                .spotlight_number
                .filter(|n| config.spotlight && *n > 0),
            simulcast: config.simulcast.then_some(true),
            audio: media_request(
                config.audio,
                config.audio_codec_type.as_deref(),
                config.audio_bit_rate,
            ),
            video: media_request(
                config.video,
                config.video_codec_type.as_deref(),
                config.video_bit_rate,
            ),
        }
    }

    /// Connect frame
    pub fn connect_frame(&self) -> Result<String> {
        SignalingMessage::Connect(self.connect_message()).to_json()
    }

    /// Answer frame
    pub fn answer_frame(&self, sdp: String) -> Result<String> {
        SignalingMessage::Answer { sdp }.to_json()
    }

    /// Candidate frame for a locally gathered candidate
    pub fn candidate_frame(&self, candidate: &IceCandidate) -> Result<String> {
        SignalingMessage::Candidate(CandidateMessage {
            mid: candidate.mid.clone(),
            index: candidate.index,
            candidate: candidate.candidate.clone(),
        })
        .to_json()
    }

    /// Pong frame, with statistics when they could be sampled
    pub fn pong_frame(&self, stats: Option<Value>) -> Result<String> {
        SignalingMessage::Pong { stats }.to_json()
    }

    fn peer_config(&self, offer: &OfferMessage) -> PeerConfig {
        let (ice_servers, ice_transport_policy) = match &offer.config {
            Some(c) => (
                c.ice_servers
                    .iter()
                    .map(|s| IceServer {
                        urls: s.urls.clone(),
                        username: s.username.clone().unwrap_or_default(),
                        credential: s.credential.clone().unwrap_or_default(),
                    })
                    .collect(),
                match c.ice_transport_policy.as_deref() {
                    Some("relay") => IceTransportPolicy::Relay,
                    _ => IceTransportPolicy::All,
                },
            ),
            None => (Vec::new(), IceTransportPolicy::All),
        };

        PeerConfig {
            ice_servers,
            ice_transport_policy,
            port: self.config.port,
            role: self.config.role,
            audio: self.config.audio,
            video: self.config.video,
        }
    }
}

fn media_request(enabled: bool, codec_type: Option<&str>, bit_rate: Option<u32>) -> Option<MediaRequest> {
    if !enabled {
        return Some(MediaRequest::Enabled(false));
    }
    if codec_type.is_none() && bit_rate.is_none() {
        return None;
    }
    Some(MediaRequest::Params(MediaParams {
        codec_type: codec_type.map(str::to_string),
        bit_rate,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Role;
    use serde_json::json;

    fn negotiator() -> Negotiator {
        Negotiator::new(SessionConfig::new("wss://sora.example.com/signaling", "sora"))
    }

    fn frame_value(frame: &str) -> Value {
        serde_json::from_str(frame).unwrap()
    }

    #[test]
    fn test_connect_frame_minimal() {
        let frame = frame_value(&negotiator().connect_frame().unwrap());

        assert_eq!(frame["type"], "connect");
        assert_eq!(frame["role"], "sendonly");
        assert_eq!(frame["channel_id"], "sora");
        assert!(frame.get("multistream").is_none());
        assert!(frame.get("audio").is_none());
        assert!(frame.get("video").is_none());
        assert!(frame.get("metadata").is_none());
    }

    #[test]
    fn test_connect_frame_full() {
        let mut config = SessionConfig::new("wss://sora.example.com/signaling", "sora");
        config.role = Role::RecvOnly;
        config.audio = false;
        config.video_codec_type = Some("VP9".to_string());
        config.video_bit_rate = Some(800);
        config.metadata = Some(json!({"access_token": "t"}));
        config.signaling_notify_metadata = Some(json!({"name": "cam-1"}));
        config.multistream = true;
        config.spotlight = true;
        config.spotlight_number = Some(2);
        config.simulcast = true;

        let frame = frame_value(&Negotiator::new(config).connect_frame().unwrap());

        assert_eq!(frame["role"], "recvonly");
        assert_eq!(frame["audio"], json!(false));
        assert_eq!(frame["video"], json!({"codec_type": "VP9", "bit_rate": 800}));
        assert_eq!(frame["metadata"]["access_token"], "t");
        assert_eq!(frame["signaling_notify_metadata"]["name"], "cam-1");
        assert_eq!(frame["multistream"], json!(true));
        assert_eq!(frame["spotlight"], json!(true));
        assert_eq!(frame["spotlight_number"], json!(2));
        assert_eq!(frame["simulcast"], json!(true));
    }

    #[test]
    fn test_decode_offer_builds_peer_config() {
        let mut config = SessionConfig::new("wss://sora.example.com/signaling", "sora");
        config.port = Some(50000);
        let negotiator = Negotiator::new(config);

        let inbound = negotiator
            .decode(
                r#"{"type":"offer","sdp":"v=0","config":{"iceServers":[{"urls":["turn:t:3478"],"username":"u","credential":"c"}],"iceTransportPolicy":"relay"}}"#,
            )
            .unwrap();

        let Inbound::Offer { sdp, peer_config } = inbound else {
            panic!("expected offer");
        };
        assert_eq!(sdp, "v=0");
        assert_eq!(peer_config.ice_transport_policy, IceTransportPolicy::Relay);
        assert_eq!(peer_config.ice_servers[0].credential, "c");
        assert_eq!(peer_config.port, Some(50000));
    }

    #[test]
    fn test_decode_candidate() {
        let inbound = negotiator()
            .decode(r#"{"type":"candidate","mid":"0","index":0,"candidate":"candidate:1 1 udp 1 10.0.0.1 5000 typ host"}"#)
            .unwrap();

        assert_eq!(
            inbound,
            Inbound::Candidate(IceCandidate {
                mid: "0".to_string(),
                index: 0,
                candidate: "candidate:1 1 udp 1 10.0.0.1 5000 typ host".to_string(),
            })
        );
    }

    #[test]
    fn test_decode_pass_through_kinds() {
        let n = negotiator();
        assert!(matches!(n.decode(r#"{"type":"push","data":{"x":1}}"#).unwrap(), Inbound::Push(v) if v["data"]["x"] == 1));
        assert!(matches!(n.decode(r#"{"type":"switched","ignore_disconnect_websocket":true}"#).unwrap(), Inbound::Switched(_)));
        assert_eq!(
            n.decode(r#"{"type":"redirect","location":"wss://b.example.com/signaling"}"#).unwrap(),
            Inbound::Redirect { location: "wss://b.example.com/signaling".to_string() }
        );
        assert_eq!(
            n.decode(r#"{"type":"disconnect"}"#).unwrap(),
            Inbound::Disconnect { reason: None }
        );
    }

    #[test]
    fn test_decode_rejects_garbage_and_client_kinds() {
        let n = negotiator();
        for frame in ["", "not json", "{}", r#"{"type":"answer","sdp":"x"}"#, r#"{"type":"pong"}"#] {
            let err = n.decode(frame).unwrap_err();
            assert!(err.is_protocol_error(), "frame {:?} gave {:?}", frame, err);
        }
    }

    #[test]
    fn test_pong_and_candidate_frames() {
        let n = negotiator();
        assert_eq!(n.pong_frame(None).unwrap(), r#"{"type":"pong"}"#);

        let pong = frame_value(&n.pong_frame(Some(json!([{"type": "inbound-rtp"}]))).unwrap());
        assert_eq!(pong["stats"][0]["type"], "inbound-rtp");

        let candidate = frame_value(
            &n.candidate_frame(&IceCandidate {
                mid: "1".to_string(),
                index: 1,
                candidate: "candidate:x".to_string(),
            })
            .unwrap(),
        );
        assert_eq!(candidate, json!({"type": "candidate", "mid": "1", "index": 1, "candidate": "candidate:x"}));
    }
}
