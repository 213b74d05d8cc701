//! Media engine backed by webrtc-rs
//!
//! Answers the SFU's offer with a `webrtc::RTCPeerConnection`. The
//! transceivers webrtc-rs creates from the offer get their direction from the
//! session role and the audio/video flags; attaching local tracks to publish
//! is up to the caller through [`WebRtcSession::peer_connection`].

use super::{
    ConnectivityState, IceCandidate, IceServer, IceTransportPolicy, MediaEngine, MediaObserver,
    MediaSession, PeerConfig,
};
use crate::config::Role;
use crate::{Error, Result};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine as RtcMediaEngine;
use webrtc::api::setting_engine::SettingEngine;
use webrtc::api::APIBuilder;
use webrtc::ice::udp_network::{EphemeralUDP, UDPNetwork};
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::ice_transport::ice_connection_state::RTCIceConnectionState;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::policy::ice_transport_policy::RTCIceTransportPolicy;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::RTPCodecType;
use webrtc::rtp_transceiver::rtp_transceiver_direction::RTCRtpTransceiverDirection;

/// Media engine creating webrtc-rs peer connections
#[derive(Debug, Default, Clone)]
pub struct WebRtcMediaEngine;

impl WebRtcMediaEngine {
    /// Create the engine
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl MediaEngine for WebRtcMediaEngine {
    #[instrument(skip(self, config, observer))]
    async fn create_session(
        &self,
        config: &PeerConfig,
        observer: Arc<dyn MediaObserver>,
    ) -> Result<Arc<dyn MediaSession>> {
        let session = WebRtcSession::new(config, observer).await?;
        Ok(Arc::new(session))
    }
}

/// One webrtc-rs peer connection
pub struct WebRtcSession {
    /// Unique identifier for this session instance
    id: String,

    /// Actual WebRTC peer connection
    peer_connection: Arc<RTCPeerConnection>,

    role: Role,
    audio: bool,
    video: bool,
}

impl WebRtcSession {
    /// Create a peer connection and hook its callbacks to `observer`
    pub async fn new(config: &PeerConfig, observer: Arc<dyn MediaObserver>) -> Result<Self> {
        let id = uuid::Uuid::new_v4().to_string();

        info!(
            session_id = %id,
            ice_servers = config.ice_servers.len(),
            policy = ?config.ice_transport_policy,
            role = %config.role,
            audio = config.audio,
            video = config.video,
            "Creating media session"
        );

        let mut media_engine = RtcMediaEngine::default();
        media_engine
            .register_default_codecs()
            .map_err(|e| Error::WebRtcError(format!("Failed to register codecs: {}", e)))?;

        let interceptor_registry =
            register_default_interceptors(Default::default(), &mut media_engine).map_err(|e| {
                Error::WebRtcError(format!("Failed to register interceptors: {}", e))
            })?;

        let mut setting_engine = SettingEngine::default();
        if let Some(port) = config.port {
            let udp = EphemeralUDP::new(port, port)
                .map_err(|e| Error::InvalidConfig(format!("Invalid media port {}: {}", port, e)))?;
            setting_engine.set_udp_network(UDPNetwork::Ephemeral(udp));
        }

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(interceptor_registry)
            .with_setting_engine(setting_engine)
            .build();

        let rtc_config = RTCConfiguration {
            ice_servers: config.ice_servers.iter().map(to_rtc_ice_server).collect(),
            ice_transport_policy: match config.ice_transport_policy {
                IceTransportPolicy::All => RTCIceTransportPolicy::All,
                IceTransportPolicy::Relay => RTCIceTransportPolicy::Relay,
            },
            ..Default::default()
        };

        let peer_connection =
            Arc::new(api.new_peer_connection(rtc_config).await.map_err(|e| {
                Error::WebRtcError(format!("Failed to create peer connection: {}", e))
            })?);

        // Both handlers run on webrtc-rs tasks; they only forward to the observer.
        let state_observer = Arc::clone(&observer);
        peer_connection.on_ice_connection_state_change(Box::new(
            move |s: RTCIceConnectionState| {
                if let Some(state) = from_rtc_state(s) {
                    state_observer.on_connectivity_change(state);
                }
                Box::pin(async {})
            },
        ));

        let candidate_observer = Arc::clone(&observer);
        let session_id = id.clone();
        peer_connection.on_ice_candidate(Box::new(move |c: Option<RTCIceCandidate>| {
            if let Some(candidate) = c {
                match candidate.to_json() {
                    Ok(init) => candidate_observer.on_local_candidate(IceCandidate {
                        mid: init.sdp_mid.unwrap_or_default(),
                        index: init.sdp_mline_index.unwrap_or_default(),
                        candidate: init.candidate,
                    }),
                    Err(e) => warn!(session_id = %session_id, "Failed to encode local candidate: {}", e),
                }
            }
            Box::pin(async {})
        }));

        Ok(Self {
            id,
            peer_connection,
            role: config.role,
            audio: config.audio,
            video: config.video,
        })
    }

    /// Underlying peer connection, for attaching local tracks
    pub fn peer_connection(&self) -> &Arc<RTCPeerConnection> {
        &self.peer_connection
    }

    /// Point every offered transceiver the way the role asks
    async fn apply_directions(&self) {
        for transceiver in self.peer_connection.get_transceivers().await {
            let enabled = match transceiver.kind() {
                RTPCodecType::Audio => self.audio,
                RTPCodecType::Video => self.video,
                _ => continue,
            };
            let direction = transceiver_direction(self.role, enabled);
            debug!(
                session_id = %self.id,
                kind = %transceiver.kind(),
                %direction,
                "Setting transceiver direction"
            );
            transceiver.set_direction(direction).await;
        }
    }
}

#[async_trait]
impl MediaSession for WebRtcSession {
    fn id(&self) -> &str {
        &self.id
    }

    async fn set_remote_offer(&self, sdp: &str) -> Result<String> {
        let offer = RTCSessionDescription::offer(sdp.to_string())
            .map_err(|e| Error::SdpError(format!("Failed to parse offer: {}", e)))?;

        self.peer_connection
            .set_remote_description(offer)
            .await
            .map_err(|e| Error::SdpError(format!("Failed to set remote description: {}", e)))?;

        self.apply_directions().await;

        let answer = self
            .peer_connection
            .create_answer(None)
            .await
            .map_err(|e| Error::SdpError(format!("Failed to create answer: {}", e)))?;

        self.peer_connection
            .set_local_description(answer)
            .await
            .map_err(|e| Error::SdpError(format!("Failed to set local description: {}", e)))?;

        let local_desc = self
            .peer_connection
            .local_description()
            .await
            .ok_or_else(|| {
                Error::SdpError("No local description after setting answer".to_string())
            })?;

        debug!(session_id = %self.id, "Created SDP answer");

        Ok(local_desc.sdp)
    }

    async fn add_remote_candidate(&self, candidate: &IceCandidate) -> Result<()> {
        let init = RTCIceCandidateInit {
            candidate: candidate.candidate.clone(),
            sdp_mid: Some(candidate.mid.clone()),
            sdp_mline_index: Some(candidate.index),
            ..Default::default()
        };

        self.peer_connection
            .add_ice_candidate(init)
            .await
            .map_err(|e| Error::IceCandidateError(format!("Failed to add ICE candidate: {}", e)))
    }

    async fn stats(&self) -> Result<serde_json::Value> {
        let report = self.peer_connection.get_stats().await;

        let reports = report
            .reports
            .values()
            .map(serde_json::to_value)
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| Error::StatsError(format!("Failed to encode stats: {}", e)))?;

        Ok(serde_json::Value::Array(reports))
    }

    async fn dispose(&self) -> Result<()> {
        info!(session_id = %self.id, "Closing media session");

        self.peer_connection
            .close()
            .await
            .map_err(|e| Error::WebRtcError(format!("Failed to close peer connection: {}", e)))
    }
}

fn to_rtc_ice_server(server: &IceServer) -> RTCIceServer {
    #[allow(clippy::needless_update)]
    RTCIceServer {
        urls: server.urls.clone(),
        username: server.username.clone(),
        credential: server.credential.clone(),
        ..Default::default()
    }
}

fn transceiver_direction(role: Role, enabled: bool) -> RTCRtpTransceiverDirection {
    match (enabled && role.sends(), enabled && role.receives()) {
        (true, true) => RTCRtpTransceiverDirection::Sendrecv,
        (true, false) => RTCRtpTransceiverDirection::Sendonly,
        (false, true) => RTCRtpTransceiverDirection::Recvonly,
        (false, false) => RTCRtpTransceiverDirection::Inactive,
    }
}

fn from_rtc_state(state: RTCIceConnectionState) -> Option<ConnectivityState> {
    let state = match state {
        RTCIceConnectionState::New => ConnectivityState::New,
        RTCIceConnectionState::Checking => ConnectivityState::Checking,
        RTCIceConnectionState::Connected => ConnectivityState::Connected,
        RTCIceConnectionState::Completed => ConnectivityState::Completed,
        RTCIceConnectionState::Disconnected => ConnectivityState::Disconnected,
        RTCIceConnectionState::Failed => ConnectivityState::Failed,
        RTCIceConnectionState::Closed => ConnectivityState::Closed,
        _ => return None,
    };
    Some(state)
}
